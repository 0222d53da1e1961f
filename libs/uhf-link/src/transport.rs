//! Reader transports
//!
//! Byte-stream endpoints (TCP socket or serial device) with bounded reads.
//! Transports know nothing about framing; the codec drives them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use crate::error::{LinkError, Result};

/// Default TCP port of network readers
pub const DEFAULT_TCP_PORT: u16 = 6000;

/// Default serial baud rate
pub const DEFAULT_BAUD_RATE: u32 = 57600;

/// Default TCP connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Default per-read timeout
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// Where a reader lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Endpoint {
    /// Network reader
    Tcp {
        host: String,
        #[serde(default = "default_tcp_port")]
        port: u16,
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
    },
    /// USB/serial reader, 8 data bits, no parity, one stop bit
    Serial {
        device: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

impl Endpoint {
    /// TCP endpoint with default connect timeout
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// Serial endpoint
    pub fn serial(device: impl Into<String>, baud_rate: u32) -> Self {
        Endpoint::Serial {
            device: device.into(),
            baud_rate,
        }
    }

    /// Host name or device path, used as the upstream source identifier
    pub fn target(&self) -> &str {
        match self {
            Endpoint::Tcp { host, .. } => host,
            Endpoint::Serial { device, .. } => device,
        }
    }

    /// Transport kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Endpoint::Tcp { .. } => "TCP",
            Endpoint::Serial { .. } => "serial",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port, .. } => write!(f, "TCP {host}:{port}"),
            Endpoint::Serial { device, baud_rate } => {
                write!(f, "serial {device} @ {baud_rate} baud")
            },
        }
    }
}

/// Byte-stream transport to a reader
#[async_trait]
pub trait Transport: Send {
    /// Human-readable endpoint description
    fn describe(&self) -> String;

    /// Send all bytes
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `max` bytes available within `timeout`
    ///
    /// Returns an empty vector on timeout. Never blocks past `timeout`.
    async fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Discard input that has already arrived, returning the byte count when known
    async fn discard_input(&mut self) -> Result<usize>;

    /// Close the transport; calling it twice is harmless
    async fn close(&mut self) -> Result<()>;

    /// Whether stale input should be discarded before every command
    fn flushes_before_command(&self) -> bool {
        false
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data).await
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        (**self).read(max, timeout).await
    }

    async fn discard_input(&mut self) -> Result<usize> {
        (**self).discard_input().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }

    fn flushes_before_command(&self) -> bool {
        (**self).flushes_before_command()
    }
}

/// Open the transport described by `endpoint`
pub async fn open(endpoint: &Endpoint) -> Result<Box<dyn Transport>> {
    match endpoint {
        Endpoint::Tcp {
            host,
            port,
            connect_timeout_ms,
        } => {
            let transport =
                TcpTransport::connect(host, *port, Duration::from_millis(*connect_timeout_ms))
                    .await?;
            Ok(Box::new(transport))
        },
        Endpoint::Serial { device, baud_rate } => {
            let transport = SerialTransport::open(device, *baud_rate)?;
            Ok(Box::new(transport))
        },
    }
}

// ============================================================================
// TCP
// ============================================================================

/// TCP transport to a network reader
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    addr: String,
}

impl TcpTransport {
    /// Connect with a bounded connect timeout
    pub async fn connect(host: &str, port: u16, timeout_duration: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }

                info!("TCP connected: {}", addr);
                Ok(Self::from_stream(stream, addr))
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(LinkError::Connection(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(LinkError::Connection(format!(
                    "Connection to {addr} timed out after {}ms",
                    timeout_duration.as_millis()
                )))
            },
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, addr: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            addr: addr.into(),
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(LinkError::NotConnected)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn describe(&self) -> String {
        format!("TCP {}", self.addr)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(data).await.map_err(|e| {
            error!("TCP TX: {}", e);
            LinkError::Io(format!("TCP send error: {e}"))
        })?;
        debug!("TCP TX: {}B", data.len());
        Ok(())
    }

    async fn read(&mut self, max: usize, timeout_duration: Duration) -> Result<Vec<u8>> {
        let stream = self.stream()?;
        let mut buf = vec![0u8; max];

        match timeout(timeout_duration, stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(LinkError::Io("TCP stream closed by reader".to_string())),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            },
            Ok(Err(e)) => {
                error!("TCP RX: {}", e);
                Err(LinkError::Io(format!("TCP read error: {e}")))
            },
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn discard_input(&mut self) -> Result<usize> {
        // Sockets have no input buffer reset; resync happens byte by byte
        Ok(0)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown: {}", e);
            }
            debug!("TCP closed: {}", self.addr);
        }
        Ok(())
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Serial transport to a USB/RS-232 reader
#[derive(Debug)]
pub struct SerialTransport {
    port: Option<SerialStream>,
    device: String,
    baud_rate: u32,
}

impl SerialTransport {
    /// Open the device at 8N1
    pub fn open(device: &str, baud_rate: u32) -> Result<Self> {
        debug!("Serial: {} @{}baud", device, baud_rate);

        match tokio_serial::new(device, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .timeout(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS))
            .open_native_async()
        {
            Ok(port) => {
                info!("Serial opened: {}", device);
                Ok(Self {
                    port: Some(port),
                    device: device.to_string(),
                    baud_rate,
                })
            },
            Err(e) => {
                error!("Serial err: {} - {}", device, e);
                Err(LinkError::Connection(format!(
                    "Failed to open serial port {device}: {e}"
                )))
            },
        }
    }

    fn port(&mut self) -> Result<&mut SerialStream> {
        self.port.as_mut().ok_or(LinkError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.device, self.baud_rate)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(data).await.map_err(|e| {
            error!("Serial TX: {}", e);
            LinkError::Io(format!("Serial send error: {e}"))
        })?;
        port.flush().await.map_err(|e| {
            error!("Serial flush: {}", e);
            LinkError::Io(format!("Serial flush error: {e}"))
        })?;
        debug!("Serial TX: {}B", data.len());
        Ok(())
    }

    async fn read(&mut self, max: usize, timeout_duration: Duration) -> Result<Vec<u8>> {
        let port = self.port()?;
        let mut buf = vec![0u8; max];

        match timeout(timeout_duration, port.read(&mut buf)).await {
            Ok(Ok(0)) => Err(LinkError::Io("Serial connection closed".to_string())),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => {
                error!("Serial RX: {}", e);
                Err(LinkError::Io(format!("Serial read error: {e}")))
            },
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let port = self.port()?;
        let pending = port.bytes_to_read().unwrap_or(0) as usize;
        port.clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| LinkError::Io(format!("Serial input reset error: {e}")))?;
        Ok(pending)
    }

    async fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!("Serial closed: {}", self.device);
        }
        Ok(())
    }

    fn flushes_before_command(&self) -> bool {
        true
    }
}
