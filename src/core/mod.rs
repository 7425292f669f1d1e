//! Core types shared by the CLI.
//!
//! - [`TscopeError`] - error categories shown to users
//! - [`ErrorContext`] - an error plus optional details and suggestion
//! - [`user_friendly_error`] - turns any [`anyhow::Error`] into an [`ErrorContext`]

pub mod error;

pub use error::{ErrorContext, TscopeError, user_friendly_error};
