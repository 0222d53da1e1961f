//! Tag aggregation
//!
//! Debounces repeated reads of the same EPC and buffers distinct EPCs into
//! a batch that is delivered once the reader goes quiet (idle flush) or the
//! batch grows too large (size flush). In per-tag mode every accepted EPC is
//! delivered immediately instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info};
use uhf_link::TagReport;

use crate::config::{AggregatorConfig, AggregatorMode};
use crate::sink::{DeliveryError, DeliveryStats, TagSink};

/// Aggregator timing and sizing
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub mode: AggregatorMode,
    /// Minimum gap before the same EPC is accepted again
    pub debounce: Duration,
    /// Quiet period after the last accepted tag that triggers a batch flush
    pub flush_idle: Duration,
    pub max_batch_size: usize,
    /// Debounce entries older than this are purged
    pub retention: Duration,
    /// Upper bound on one sink call
    pub delivery_timeout: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from_config(&AggregatorConfig::default(), Duration::from_secs(10))
    }
}

impl AggregatorSettings {
    pub fn from_config(config: &AggregatorConfig, delivery_timeout: Duration) -> Self {
        Self {
            mode: config.mode,
            debounce: Duration::from_millis(config.debounce_ms),
            flush_idle: Duration::from_millis(config.flush_idle_ms),
            max_batch_size: config.max_batch_size,
            retention: Duration::from_millis(config.retention_ms),
            delivery_timeout,
        }
    }
}

/// EPC → instant it was last accepted
#[derive(Debug, Default)]
pub struct DebounceTable {
    entries: HashMap<String, Instant>,
}

impl DebounceTable {
    /// Accept `epc` unless it was accepted within `window`; stamps on accept
    pub fn accept(&mut self, epc: &str, now: Instant, window: Duration) -> bool {
        match self.entries.get_mut(epc) {
            Some(last) if now.saturating_duration_since(*last) <= window => false,
            Some(last) => {
                *last = now;
                true
            },
            None => {
                self.entries.insert(epc.to_string(), now);
                true
            },
        }
    }

    /// Drop entries older than `retention`, returning how many were removed
    pub fn purge(&mut self, now: Instant, retention: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, last| now.saturating_duration_since(*last) < retention);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distinct EPCs collected since the last flush
#[derive(Debug, Default)]
pub struct TagBatch {
    epcs: BTreeSet<String>,
    collected_since: Option<Instant>,
    last_added: Option<Instant>,
}

impl TagBatch {
    /// Add an accepted EPC; the idle clock restarts even when already present
    pub fn add(&mut self, epc: String, now: Instant) -> bool {
        self.collected_since.get_or_insert(now);
        self.last_added = Some(now);
        self.epcs.insert(epc)
    }

    pub fn len(&self) -> usize {
        self.epcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epcs.is_empty()
    }

    pub fn collected_since(&self) -> Option<Instant> {
        self.collected_since
    }

    /// Time since the last accepted tag
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_added.map(|t| now.saturating_duration_since(t))
    }

    /// Take the EPCs (sorted) and reset
    pub fn take(&mut self) -> Vec<String> {
        self.collected_since = None;
        self.last_added = None;
        std::mem::take(&mut self.epcs).into_iter().collect()
    }
}

/// Per-reader aggregator feeding a shared sink
pub struct TagAggregator {
    settings: AggregatorSettings,
    source: String,
    debounce: DebounceTable,
    batch: TagBatch,
    sink: Arc<dyn TagSink>,
    stats: Arc<DeliveryStats>,
}

impl std::fmt::Debug for TagAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagAggregator")
            .field("source", &self.source)
            .field("mode", &self.settings.mode)
            .field("pending", &self.batch.len())
            .finish()
    }
}

impl TagAggregator {
    pub fn new(
        settings: AggregatorSettings,
        source: impl Into<String>,
        sink: Arc<dyn TagSink>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            settings,
            source: source.into(),
            debounce: DebounceTable::default(),
            batch: TagBatch::default(),
            sink,
            stats,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn stats(&self) -> &Arc<DeliveryStats> {
        &self.stats
    }

    /// Feed one inventory round; returns how many EPCs were accepted
    pub async fn observe(&mut self, tags: &[TagReport]) -> usize {
        let now = Instant::now();
        let mut accepted = 0;

        for tag in tags {
            let epc = tag.epc_hex();
            if !self.debounce.accept(&epc, now, self.settings.debounce) {
                continue;
            }
            accepted += 1;

            match self.settings.mode {
                AggregatorMode::PerTag => {
                    info!("Tag {} on antenna {} rssi 0x{:02X}", epc, tag.antenna, tag.rssi);
                    self.deliver_tag(&epc).await;
                },
                AggregatorMode::Batch => {
                    if self.batch.add(epc, now) {
                        debug!("Buffered tag, {} pending", self.batch.len());
                    }
                    if self.batch.len() >= self.settings.max_batch_size {
                        info!("Batch reached {} tags, flushing", self.batch.len());
                        self.flush().await;
                    }
                },
            }
        }

        accepted
    }

    /// Flush when the batch has been idle for the flush interval
    pub async fn maybe_flush(&mut self) -> bool {
        let now = Instant::now();
        match self.batch.idle_for(now) {
            Some(idle) if !self.batch.is_empty() && idle >= self.settings.flush_idle => {
                self.flush().await
            },
            _ => false,
        }
    }

    /// Deliver the pending batch now; returns whether anything was delivered
    pub async fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return false;
        }

        let epcs = self.batch.take();
        let outcome = self
            .bounded(self.sink.deliver_batch(&epcs, &self.source))
            .await;

        match outcome {
            Ok(()) => {
                info!("Delivered batch of {} tags from {}", epcs.len(), self.source);
                self.stats.record_delivered(epcs.len());
                true
            },
            Err(e) => {
                error!(
                    "Batch of {} tags from {} dropped, {} sink failed: {}",
                    epcs.len(),
                    self.source,
                    self.sink.name(),
                    e
                );
                self.stats.record_dropped();
                false
            },
        }
    }

    async fn deliver_tag(&self, epc: &str) {
        match self.bounded(self.sink.deliver_tag(epc, &self.source)).await {
            Ok(()) => self.stats.record_delivered(1),
            Err(e) => {
                error!(
                    "Tag {} from {} dropped, {} sink failed: {}",
                    epc,
                    self.source,
                    self.sink.name(),
                    e
                );
                self.stats.record_dropped();
            },
        }
    }

    async fn bounded<F>(&self, call: F) -> Result<(), DeliveryError>
    where
        F: std::future::Future<Output = Result<(), DeliveryError>>,
    {
        let limit = self.settings.delivery_timeout;
        timeout(limit, call)
            .await
            .unwrap_or(Err(DeliveryError::Timeout(limit)))
    }

    /// Drop debounce entries past the retention horizon
    pub fn purge(&mut self) -> usize {
        let removed = self
            .debounce
            .purge(Instant::now(), self.settings.retention);
        if removed > 0 {
            debug!("Purged {} debounce entries", removed);
        }
        removed
    }
}
