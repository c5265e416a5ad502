//! Shared types

pub mod error;

pub use error::{MiesError, Result};
