//! Shared types for the noney workspace: errors, configuration, the
//! generation event wire format, message records and chat-model types.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;
pub mod tool;
pub mod trace;

pub use error::{Error, Result};
