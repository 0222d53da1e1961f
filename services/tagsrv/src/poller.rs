//! Per-reader polling loop
//!
//! inventory → aggregate → flush check → sleep, until cancelled or the link
//! keeps failing. Stop requests are honoured between cycles only.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uhf_link::{FramingHealth, HealthVerdict, LinkError, ReaderLogger, ReaderSession};

use crate::aggregator::TagAggregator;
use crate::config::ReaderConfig;

/// Loop tuning for one reader
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_interval: Duration,
    /// Consecutive failed cycles before the loop gives up on the link
    pub error_threshold: u32,
    pub health_window: Duration,
    pub crc_failure_ratio: f64,
    pub health_windows: u32,
}

impl PollerSettings {
    pub fn from_reader(reader: &ReaderConfig) -> Self {
        Self {
            poll_interval: reader.poll_interval(),
            error_threshold: reader.error_threshold.max(1),
            health_window: Duration::from_millis(reader.health_window_ms),
            crc_failure_ratio: reader.crc_failure_ratio,
            health_windows: reader.health_windows,
        }
    }
}

/// Why a polling run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollExit {
    /// Stop was requested
    Cancelled,
    /// Too many consecutive failures; the last one is attached
    LinkLost(LinkError),
}

/// Owns one reader's session and aggregator
#[derive(Debug)]
pub struct ReaderPoller {
    session: ReaderSession,
    aggregator: TagAggregator,
    settings: PollerSettings,
    health: FramingHealth,
    logger: ReaderLogger,
}

impl ReaderPoller {
    pub fn new(
        session: ReaderSession,
        aggregator: TagAggregator,
        settings: PollerSettings,
        logger: ReaderLogger,
    ) -> Self {
        let health = FramingHealth::new(
            settings.health_window,
            settings.crc_failure_ratio,
            settings.health_windows,
        );
        Self {
            session,
            aggregator,
            settings,
            health,
            logger,
        }
    }

    pub fn session(&self) -> &ReaderSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ReaderSession {
        &mut self.session
    }

    pub fn aggregator(&self) -> &TagAggregator {
        &self.aggregator
    }

    pub fn logger(&self) -> &ReaderLogger {
        &self.logger
    }

    /// Poll until cancelled or the link is lost
    ///
    /// The session must already be connected. On exit any pending batch is
    /// flushed once and the session is disconnected.
    pub async fn run(&mut self, cancel: &CancellationToken) -> PollExit {
        info!(reader = %self.logger.reader, "Starting inventory loop");
        let mut consecutive_errors = 0u32;

        let exit = loop {
            if cancel.is_cancelled() {
                break PollExit::Cancelled;
            }

            match self.session.inventory_real_time().await {
                Ok(tags) => {
                    consecutive_errors = 0;
                    if !tags.is_empty() {
                        let accepted = self.aggregator.observe(&tags).await;
                        debug!(
                            reader = %self.logger.reader,
                            "{} tags read, {} accepted", tags.len(), accepted
                        );
                    }
                },
                Err(e) => {
                    consecutive_errors += 1;
                    self.logger.log_warn(&format!(
                        "Inventory failed ({}/{}): {}",
                        consecutive_errors, self.settings.error_threshold, e
                    ));
                    if consecutive_errors >= self.settings.error_threshold {
                        break PollExit::LinkLost(e);
                    }
                },
            }

            self.aggregator.maybe_flush().await;
            self.aggregator.purge();
            self.check_health();

            tokio::select! {
                _ = cancel.cancelled() => break PollExit::Cancelled,
                _ = tokio::time::sleep(self.settings.poll_interval) => {},
            }
        };

        self.shutdown().await;
        exit
    }

    fn check_health(&mut self) {
        match self.health.evaluate(self.session.metrics()) {
            Some(HealthVerdict::Degraded { ratio, windows }) => warn!(
                reader = %self.logger.reader,
                "Persistent CRC failures: {:.0}% of frames over {} windows. Check the protocol variant and baud rate configured for {}",
                ratio * 100.0,
                windows,
                self.session.config().endpoint
            ),
            Some(HealthVerdict::Noisy { ratio }) => debug!(
                reader = %self.logger.reader,
                "Noisy window: {:.0}% CRC failures", ratio * 100.0
            ),
            Some(HealthVerdict::Healthy) | None => {},
        }
    }

    async fn shutdown(&mut self) {
        if self.aggregator.pending() > 0 {
            info!(
                reader = %self.logger.reader,
                "Flushing {} pending tags before disconnect",
                self.aggregator.pending()
            );
            self.aggregator.flush().await;
        }

        if let Err(e) = self.session.disconnect().await {
            self.logger.log_debug(&format!("disconnect: {e}"));
        }
    }
}
