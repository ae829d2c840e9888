//! Worker module - identity of a polling process

pub mod identity;

pub use identity::NamedIdentity;
