//! sandcell Common Types and Shared Record Store
//!
//! This crate provides the pieces shared by the sandcell server and the
//! processes that talk to it:
//!
//! - **Protocol Layer**: wire messages, script/task descriptors, error types
//! - **Codec**: the extended-JSON payload format stored in records
//! - **Identifiers**: monotonic base-36 record identifiers
//! - **Store**: the file-backed, memory-mapped record store
//!
//! # Architecture
//!
//! Payloads never travel over the socket. A peer writes a record into its
//! own store, sends `<clientId>-<identifier>` to the server, and the server
//! answers with the bare identifier of a record it wrote into *its* store:
//!
//! ```text
//! peer store  --(clientA-00abc)-->  server  --(0k2x...)-->  peer
//!                                     |
//!                                     v
//!                               server store
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sandcell_common::{WireMessage, RecordKind};
//!
//! let message = WireMessage::parse("clientA-00abc").unwrap();
//! assert_eq!(message, WireMessage::Fetch {
//!     client_id: "clientA".into(),
//!     id: "00abc".into(),
//! });
//!
//! let delete = WireMessage::parse("delete-00abc-task").unwrap();
//! assert_eq!(delete, WireMessage::Delete { id: "00abc".into(), kind: RecordKind::Task });
//! ```

pub mod codec;
pub mod ident;
pub mod protocol;
pub mod store;

pub use codec::PayloadCodec;
pub use ident::IdGenerator;
pub use protocol::*;
pub use store::{Record, ShareReader, ShareWriter, StoreStats};
