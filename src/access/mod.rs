//! Authorization: who may do what, and over which states.

pub mod permissions;
pub mod scope;

pub use permissions::{authorize, has_all_state_access, has_permission};
pub use scope::StateScope;
