pub mod identity;

pub use identity::{GateState, Identity, RequestContext};
