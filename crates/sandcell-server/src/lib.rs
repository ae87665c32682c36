//! sandcell Server
//!
//! This crate runs untrusted script fragments in per-connection Boa
//! sandboxes. Requests and results never travel over the socket: the peer
//! names a record in its own store, and the server answers with the
//! identifiers of the records it wrote into its store.

pub mod config;
pub mod listener;
pub mod records;
pub mod runtime;
pub mod session;
pub mod state;
pub mod worker;

pub use config::ServerConfig;
pub use listener::{READY_LINE, SandboxServer};
pub use runtime::{CapabilityRegistry, Dispatch, Emission, ExecutionContext};
pub use session::ConnectionSession;
pub use state::ServerState;
