//! Common types, protocol definitions, and errors shared across `tenant-crypt` crates.

pub mod error;
pub mod protocol;

pub use error::{ErrorKind, ServiceError};
