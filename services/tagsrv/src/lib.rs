//! Tag inventory service
//!
//! Polls UHF readers through `uhf-link`, debounces what they report and
//! hands distinct EPCs to an upstream sink (ERP JSON-RPC or log-only).
//!
//! ```text
//! ReaderSupervisor ─► ReaderPoller ─► TagAggregator ─► TagSink
//!   (backoff)          (inventory)     (debounce,        (ERP /
//!                                       idle flush)       log)
//! ```

pub mod aggregator;
pub mod config;
pub mod poller;
pub mod simulator;
pub mod sink;
pub mod supervisor;
pub mod tools;

pub use aggregator::{AggregatorSettings, TagAggregator};
pub use config::{ConfigError, TagsrvConfig};
pub use poller::{PollExit, ReaderPoller};
pub use simulator::ReaderSimulator;
pub use sink::{build_sink, DeliveryError, DeliveryStats, ErpSink, LogSink, TagSink};
pub use supervisor::{ReaderSupervisor, ReconnectPolicy};
