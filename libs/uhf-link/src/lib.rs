//! UHF RFID reader link library
//!
//! Talks to UHF readers over TCP or serial links:
//! - **Transport**: bounded-timeout byte streams (`transport`)
//! - **Codec**: length/header framing with CRC-16 or two's-complement checks (`codec`)
//! - **Session**: command/response exchange and real-time inventory (`session`)
//! - **Metrics**: link counters and framing-health windows (`metrics`)

pub mod codec;
pub mod crc;
pub mod error;
pub mod logger;
pub mod metrics;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use codec::{ChecksumKind, Decoded, FrameCodec, FramingError, FramingStyle, ProtocolVariant};
pub use error::{LinkError, Result};
pub use logger::ReaderLogger;
pub use metrics::{FramingHealth, HealthVerdict, LinkMetrics, LinkMetricsSnapshot};
pub use session::{ReaderSession, SessionConfig, SessionEvent, SessionState};
pub use transport::{Endpoint, SerialTransport, TcpTransport, Transport};
pub use types::{Frame, InventoryParams, TagReport, CMD_INVENTORY, CMD_READER_INFO};
