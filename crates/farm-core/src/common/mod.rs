//! Shared protocol bindings, domain helpers and the crate error type.

pub mod error;
pub mod proto;
pub mod types;

pub use error::{Error, Result};
