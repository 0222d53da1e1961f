//! Reader supervision
//!
//! Connects each reader with exponential backoff and jitter, runs its
//! polling loop, and rebuilds the link when the loop reports it lost.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uhf_link::{LinkMetrics, ReaderLogger, ReaderSession};

use crate::aggregator::{AggregatorSettings, TagAggregator};
use crate::config::{ReaderConfig, SupervisorConfig, TagsrvConfig};
use crate::poller::{PollExit, PollerSettings, ReaderPoller};
use crate::sink::{DeliveryStats, TagSink};

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier for exponential delay
    pub backoff_multiplier: f64,
    /// Whether to add ±25% jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Delay after the `attempt`-th consecutive failure (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;

        // delay = initial_delay * multiplier ^ (attempt - 1), capped
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.max(1.0).powi(exponent);
        let mut delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);

        if self.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }
}

/// Keeps one reader connected and polling
#[derive(Debug)]
pub struct ReaderSupervisor {
    name: String,
    poller: ReaderPoller,
    policy: ReconnectPolicy,
}

impl ReaderSupervisor {
    pub fn new(name: impl Into<String>, poller: ReaderPoller, policy: ReconnectPolicy) -> Self {
        Self {
            name: name.into(),
            poller,
            policy,
        }
    }

    /// Wire up session, aggregator and poller for `reader`
    pub fn from_config(
        reader: &ReaderConfig,
        config: &TagsrvConfig,
        sink: Arc<dyn TagSink>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        let logger = ReaderLogger::new(reader.name.clone());
        let session = ReaderSession::new(
            reader.session_config(),
            logger.clone(),
            Arc::new(LinkMetrics::default()),
        );
        let aggregator = TagAggregator::new(
            AggregatorSettings::from_config(&config.aggregator, config.sink.timeout()),
            reader.source_id(),
            sink,
            stats,
        );
        let poller = ReaderPoller::new(
            session,
            aggregator,
            PollerSettings::from_reader(reader),
            logger,
        );

        Self::new(
            reader.name.clone(),
            poller,
            ReconnectPolicy::from_config(&config.supervisor),
        )
    }

    pub fn poller(&self) -> &ReaderPoller {
        &self.poller
    }

    /// Run until `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> ReaderPoller {
        let mut attempt = 0u32;

        while !cancel.is_cancelled() {
            let endpoint = self.poller.session().config().endpoint.clone();

            match self.poller.session_mut().connect().await {
                Ok(()) => {
                    if attempt > 0 {
                        info!(reader = %self.name, "Reconnected after {} failed attempts", attempt);
                    }
                    attempt = 0;

                    match self.poller.run(&cancel).await {
                        PollExit::Cancelled => break,
                        PollExit::LinkLost(e) => {
                            warn!(reader = %self.name, "Link to {} lost: {}. Reconnecting", endpoint, e);
                            continue;
                        },
                    }
                },
                Err(e) => {
                    attempt += 1;
                    let delay = self.policy.delay_for(attempt);
                    error!(
                        reader = %self.name,
                        "Cannot reach reader over {} at {}: {}. Check power, cabling or network path, and the configured {}; retry {} in {:?}",
                        endpoint.kind(),
                        endpoint.target(),
                        e,
                        match endpoint {
                            uhf_link::Endpoint::Tcp { .. } => "host and port",
                            uhf_link::Endpoint::Serial { .. } => "device path and baud rate",
                        },
                        attempt,
                        delay
                    );
                    self.poller.logger().log_retry(attempt, delay.as_millis() as u64, &e.to_string());

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }

        info!(reader = %self.name, "Reader stopped");
        self.poller
    }
}
