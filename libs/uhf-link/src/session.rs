//! Reader session
//!
//! Owns one transport and runs the command/response exchange against a
//! single reader. A session carries at most one command in flight; the
//! `&mut self` receivers make concurrent use impossible.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::codec::{Decoded, FrameCodec, ProtocolVariant};
use crate::error::{LinkError, Result};
use crate::logger::ReaderLogger;
use crate::metrics::LinkMetrics;
use crate::transport::{self, Endpoint, Transport, DEFAULT_READ_TIMEOUT_MS};
use crate::types::{
    Frame, InventoryParams, TagReport, CMD_INVENTORY, CMD_READER_INFO, DEFAULT_ADDRESS,
};

/// Upper bound on consecutive resync rejections skipped by one receive
const MAX_RESYNC_SKIPS: usize = 256;

fn default_address() -> u8 {
    DEFAULT_ADDRESS
}

fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}

/// Static description of how to talk to one reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub endpoint: Endpoint,
    #[serde(default = "default_address")]
    pub address: u8,
    #[serde(default)]
    pub protocol: ProtocolVariant,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default)]
    pub inventory: InventoryParams,
}

impl SessionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            address: DEFAULT_ADDRESS,
            protocol: ProtocolVariant::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            inventory: InventoryParams::default(),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    CommandInFlight,
}

/// Inputs to the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Opened,
    CommandSent,
    ResponseDone,
    Closed,
}

impl SessionState {
    /// Transition table; `None` marks an illegal move
    pub fn next(self, event: SessionEvent) -> Option<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Disconnected, Opened) => Some(Connected),
            (Connected, CommandSent) => Some(CommandInFlight),
            (CommandInFlight, ResponseDone) => Some(Connected),
            (Connected, ResponseDone) => Some(Connected),
            (_, Closed) => Some(Disconnected),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "DISCONNECTED"),
            SessionState::Connected => write!(f, "CONNECTED"),
            SessionState::CommandInFlight => write!(f, "COMMAND_IN_FLIGHT"),
        }
    }
}

/// Command/response session with one reader
pub struct ReaderSession {
    config: SessionConfig,
    codec: FrameCodec,
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    logger: ReaderLogger,
    metrics: Arc<LinkMetrics>,
}

impl fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSession")
            .field("endpoint", &self.config.endpoint)
            .field("address", &self.config.address)
            .field("state", &self.state)
            .finish()
    }
}

impl ReaderSession {
    pub fn new(config: SessionConfig, logger: ReaderLogger, metrics: Arc<LinkMetrics>) -> Self {
        let codec = FrameCodec::new(config.protocol, logger.clone(), Arc::clone(&metrics));
        Self {
            config,
            codec,
            transport: None,
            state: SessionState::Disconnected,
            logger,
            metrics,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state != SessionState::Disconnected
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<LinkMetrics> {
        &self.metrics
    }

    fn apply(&mut self, event: SessionEvent, reason: &str) -> Result<()> {
        let old = self.state;
        let new = old.next(event).ok_or_else(|| {
            LinkError::Busy(format!("{event:?} not allowed while {old}"))
        })?;
        if old != new {
            self.logger.log_status(old, new, reason);
        }
        self.state = new;
        Ok(())
    }

    /// Open the configured endpoint
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.logger
            .log_connect(self.config.endpoint.kind(), &self.config.endpoint.to_string());
        let transport = transport::open(&self.config.endpoint).await?;
        self.connect_with(transport)
    }

    /// Adopt an already opened transport
    pub fn connect_with(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        let description = transport.describe();
        self.codec.reset();
        self.transport = Some(transport);
        self.apply(SessionEvent::Opened, &description)
    }

    /// Close the transport; safe to call when already disconnected
    pub async fn disconnect(&mut self) -> Result<()> {
        self.codec.reset();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                self.logger.log_debug(&format!("close: {e}"));
            }
        }
        self.apply(SessionEvent::Closed, "disconnect")
    }

    /// Drop the transport after an error that leaves it unusable
    async fn check_fatal(&mut self, error: &LinkError) {
        if error.needs_reconnect() && self.transport.is_some() {
            self.logger.log_error("link lost", &error.to_string());
            if let Err(e) = self.disconnect().await {
                self.logger.log_debug(&format!("disconnect: {e}"));
            }
        }
    }

    /// Encode and transmit one command
    pub async fn send_command(&mut self, command: u8, data: &[u8]) -> Result<()> {
        match self.state {
            SessionState::Disconnected => return Err(LinkError::NotConnected),
            SessionState::CommandInFlight => {
                return Err(LinkError::Busy(format!(
                    "command 0x{command:02X} issued while a response is pending"
                )))
            },
            SessionState::Connected => {},
        }

        let frame = self.codec.encode(self.config.address, command, data)?;
        match self.transmit(&frame).await {
            Ok(()) => {
                self.metrics.record_command(frame.len() as u64);
                self.logger
                    .log_frame("TX", &frame, &format!("command 0x{command:02X}"));
                self.apply(SessionEvent::CommandSent, "command sent")
            },
            Err(e) => {
                self.check_fatal(&e).await;
                Err(e)
            },
        }
    }

    async fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        let logger = self.logger.clone();
        let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;

        // Stale bytes from an earlier exchange would be read as this response
        if transport.flushes_before_command() {
            let buffered = self.codec.reset();
            match transport.discard_input().await {
                Ok(n) if n + buffered > 0 => logger.log_resync(n + buffered),
                Ok(_) => {},
                Err(e) => logger.log_debug(&format!("input reset: {e}")),
            }
        }

        transport.write_all(frame).await
    }

    /// Wait for one response frame using the configured read timeout
    ///
    /// Returns `None` when nothing valid arrived in time. Line noise is
    /// skipped; a frame cut short by the timeout ends the attempt.
    pub async fn receive_response(&mut self) -> Result<Option<Frame>> {
        let timeout = self.config.read_timeout();
        self.receive_within(timeout).await
    }

    async fn receive_within(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if self.state == SessionState::Disconnected {
            return Err(LinkError::NotConnected);
        }

        let result = self.decode_skipping_noise(timeout).await;
        match result {
            Ok(frame) => {
                self.apply(SessionEvent::ResponseDone, "response received")?;
                Ok(frame)
            },
            Err(e) => {
                if self.state == SessionState::CommandInFlight {
                    self.apply(SessionEvent::ResponseDone, "receive failed")?;
                }
                self.check_fatal(&e).await;
                Err(e)
            },
        }
    }

    async fn decode_skipping_noise(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let transport = self.transport.as_mut().ok_or(LinkError::NotConnected)?;
        let deadline = Instant::now() + timeout;

        for _ in 0..MAX_RESYNC_SKIPS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.codec.decode(transport.as_mut(), remaining).await? {
                Decoded::Frame(frame) => return Ok(Some(frame)),
                Decoded::Idle => return Ok(None),
                Decoded::Rejected(e) if e.needs_resync() => continue,
                Decoded::Rejected(_) => return Ok(None),
            }
        }

        Ok(None)
    }

    /// Run one real-time inventory round
    ///
    /// Sends the inventory command and collects tag responses for the
    /// configured listen window. Responses for other commands and malformed
    /// tag data are skipped.
    pub async fn inventory_real_time(&mut self) -> Result<Vec<TagReport>> {
        let params = self.config.inventory;
        self.send_command(CMD_INVENTORY, &params.request_data()).await?;

        let read_timeout = self.config.read_timeout();
        let deadline = Instant::now() + Duration::from_millis(params.listen_window_ms);
        let mut tags = Vec::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.receive_within(read_timeout.min(remaining)).await? {
                Some(frame) if frame.command == CMD_INVENTORY => match TagReport::parse(&frame.data) {
                    Some(tag) => tags.push(tag),
                    None => self.logger.log_debug(&format!(
                        "Malformed inventory data: {}",
                        common::hex::encode_spaced(&frame.data)
                    )),
                },
                Some(frame) => self.logger.log_debug(&format!(
                    "Unexpected response cmd 0x{:02X} during inventory",
                    frame.command
                )),
                None => {},
            }
        }

        if self.state == SessionState::CommandInFlight {
            self.apply(SessionEvent::ResponseDone, "inventory window closed")?;
        }
        Ok(tags)
    }

    /// Request the reader information block
    pub async fn get_reader_information(&mut self) -> Result<Option<Frame>> {
        self.send_command(CMD_READER_INFO, &[]).await?;
        self.receive_response().await
    }
}
