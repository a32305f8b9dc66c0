//! Subcommand implementations.
//!
//! Each command has a `run` entry taking the loaded configuration and an
//! `*_impl` function over already-built components, which the tests call.

pub mod purge;
pub mod resolve;

use pixstash_core::Error;
use serde::Serialize;

/// A cache error as reported in command output.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorOutput {
    pub code: &'static str,
    pub message: String,
}

impl From<&Error> for ErrorOutput {
    fn from(err: &Error) -> Self {
        Self { code: err.code(), message: err.to_string() }
    }
}
