//! Per-reader logging
//!
//! Every line carries the reader name as a structured field so output from
//! several readers in one process stays separable.

use tracing::Level;

use crate::session::SessionState;

/// Reader-scoped logger injected into sessions and codecs
#[derive(Debug, Clone)]
pub struct ReaderLogger {
    pub reader: String,
}

macro_rules! reader_event {
    ($level:expr, $reader:expr, $msg:expr) => {
        match $level {
            Level::ERROR => tracing::error!(reader = %$reader, "{}", $msg),
            Level::WARN => tracing::warn!(reader = %$reader, "{}", $msg),
            Level::INFO => tracing::info!(reader = %$reader, "{}", $msg),
            Level::DEBUG => tracing::debug!(reader = %$reader, "{}", $msg),
            _ => tracing::trace!(reader = %$reader, "{}", $msg),
        }
    };
}

impl ReaderLogger {
    pub fn new(reader: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
        }
    }

    fn log(&self, level: Level, message: String) {
        reader_event!(level, self.reader, message);
    }

    /// Log connection attempt
    pub fn log_connect(&self, transport: &str, target: &str) {
        self.log(
            Level::INFO,
            format!("[CONNECT] {} to {}", transport, target),
        );
    }

    /// Log session state change
    pub fn log_status(&self, old_state: SessionState, new_state: SessionState, reason: &str) {
        self.log(
            Level::DEBUG,
            format!("[STATUS] {} -> {} - {}", old_state, new_state, reason),
        );
    }

    /// Log retry attempt
    pub fn log_retry(&self, attempt: u32, delay_ms: u64, reason: &str) {
        self.log(
            Level::WARN,
            format!("[RETRY] Attempt {}, delay {}ms - {}", attempt, delay_ms, reason),
        );
    }

    /// Log raw frame bytes
    pub fn log_frame(&self, direction: &str, data: &[u8], message: &str) {
        self.log(
            Level::DEBUG,
            format!(
                "[{}] {} bytes: [{}] - {}",
                direction,
                data.len(),
                common::hex::encode_spaced(data),
                message
            ),
        );
    }

    /// Log a rejected frame
    pub fn log_framing(&self, message: &str) {
        self.log(Level::WARN, format!("[FRAMING] {}", message));
    }

    /// Log bytes dropped while regaining frame alignment
    pub fn log_resync(&self, discarded: usize) {
        self.log(
            Level::DEBUG,
            format!("[RESYNC] Skipped {} bytes", discarded),
        );
    }

    /// Log a non-fatal condition the caller continues past
    pub fn log_warn(&self, message: &str) {
        self.log(Level::WARN, message.to_string());
    }

    /// Log an error
    pub fn log_error(&self, operation: &str, error: &str) {
        self.log(Level::ERROR, format!("[ERROR] {} - {}", operation, error));
    }

    /// Log a debug detail
    pub fn log_debug(&self, message: &str) {
        self.log(Level::DEBUG, message.to_string());
    }
}
