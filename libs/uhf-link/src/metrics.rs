//! Link statistics
//!
//! Lock-free counters updated by the codec and session, plus a windowed
//! framing-health check that tells a noisy line apart from a protocol
//! mismatch (every frame failing its checksum).

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::codec::FramingError;

/// Counters for one reader link
#[derive(Debug, Default)]
pub struct LinkMetrics {
    frames_decoded: AtomicU64,
    crc_mismatches: AtomicU64,
    length_rejections: AtomicU64,
    header_rejections: AtomicU64,
    truncated_frames: AtomicU64,
    resyncs: AtomicU64,
    bytes_discarded: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    commands_sent: AtomicU64,
}

/// Point-in-time copy of [`LinkMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkMetricsSnapshot {
    pub frames_decoded: u64,
    pub crc_mismatches: u64,
    pub length_rejections: u64,
    pub header_rejections: u64,
    pub truncated_frames: u64,
    pub resyncs: u64,
    pub bytes_discarded: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub commands_sent: u64,
}

impl LinkMetricsSnapshot {
    /// Frames that reached checksum verification
    pub fn checked_frames(&self) -> u64 {
        self.frames_decoded + self.crc_mismatches
    }
}

impl LinkMetrics {
    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, error: &FramingError) {
        let counter = match error {
            FramingError::ChecksumMismatch { .. } => &self.crc_mismatches,
            FramingError::LengthOutOfRange { .. } | FramingError::Overrun { .. } => {
                &self.length_rejections
            },
            FramingError::BadHeader(_) => &self.header_rejections,
            FramingError::Truncated { .. } | FramingError::Undersized(_) => {
                &self.truncated_frames
            },
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resync(&self, discarded: u64) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        self.bytes_discarded.fetch_add(discarded, Ordering::Relaxed);
    }

    pub fn record_command(&self, bytes: u64) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            crc_mismatches: self.crc_mismatches.load(Ordering::Relaxed),
            length_rejections: self.length_rejections.load(Ordering::Relaxed),
            header_rejections: self.header_rejections.load(Ordering::Relaxed),
            truncated_frames: self.truncated_frames.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
        }
    }
}

/// Verdict for one closed health window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthVerdict {
    /// Checksum failures within tolerance
    Healthy,
    /// High failure ratio in this window only
    Noisy { ratio: f64 },
    /// High failure ratio for several consecutive windows
    Degraded { ratio: f64, windows: u32 },
}

/// Windowed CRC-failure ratio tracker
#[derive(Debug)]
pub struct FramingHealth {
    window: Duration,
    threshold: f64,
    consecutive_limit: u32,
    window_start: Instant,
    baseline: LinkMetricsSnapshot,
    consecutive: u32,
}

impl FramingHealth {
    /// `threshold` is the CRC-failure ratio above which a window counts as bad
    pub fn new(window: Duration, threshold: f64, consecutive_limit: u32) -> Self {
        Self {
            window,
            threshold,
            consecutive_limit: consecutive_limit.max(1),
            window_start: Instant::now(),
            baseline: LinkMetricsSnapshot::default(),
            consecutive: 0,
        }
    }

    /// Close the current window if it has elapsed and classify it
    pub fn evaluate(&mut self, metrics: &LinkMetrics) -> Option<HealthVerdict> {
        let now = Instant::now();
        if now.duration_since(self.window_start) < self.window {
            return None;
        }

        let current = metrics.snapshot();
        let failures = current.crc_mismatches - self.baseline.crc_mismatches;
        let checked = current.checked_frames() - self.baseline.checked_frames();
        self.baseline = current;
        self.window_start = now;

        if checked == 0 {
            self.consecutive = 0;
            return Some(HealthVerdict::Healthy);
        }

        let ratio = failures as f64 / checked as f64;
        if ratio <= self.threshold {
            self.consecutive = 0;
            return Some(HealthVerdict::Healthy);
        }

        self.consecutive += 1;
        if self.consecutive >= self.consecutive_limit {
            Some(HealthVerdict::Degraded {
                ratio,
                windows: self.consecutive,
            })
        } else {
            Some(HealthVerdict::Noisy { ratio })
        }
    }
}
