pub mod capabilities;
pub mod context;
pub mod dispatch;

mod bindings;
mod conversions;


pub use bindings::Emission;
pub use capabilities::{CapabilityFn, CapabilityRegistry};
pub use context::ExecutionContext;
pub use dispatch::Dispatch;
