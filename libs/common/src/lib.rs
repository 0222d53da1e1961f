//! Shared service plumbing
//!
//! - logging bootstrap (bracketed console format, daily file output)
//! - graceful shutdown signalling
//! - hex helpers for EPCs and frame dumps

pub mod hex;
pub mod logging;
pub mod shutdown;

pub use logging::{LogConfig, LoggingError};
