//! Frame codec
//!
//! Encodes commands and decodes responses for the supported framing
//! variants. The default variant is length-prefixed with a reflected CRC-16:
//!
//! ```text
//! [len][addr][cmd][data ...][crc_lo][crc_hi]
//!   len = 2 + data.len() + 2   (bytes after the length byte)
//! ```
//!
//! The header-prefixed variant used by some firmware puts `0xA0` in front
//! of the length byte and may use a one-byte two's-complement checksum.
//! In every variant the checksum covers all preceding bytes of the frame.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::crc::{crc16, twos_complement};
use crate::error::{LinkError, Result};
use crate::logger::ReaderLogger;
use crate::metrics::LinkMetrics;
use crate::transport::Transport;
use crate::types::Frame;

/// Header byte of the header-prefixed framing
pub const DEFAULT_HEADER: u8 = 0xA0;

/// Smallest length byte accepted by default
pub const MIN_FRAME_LENGTH: u8 = 3;

/// Largest length byte accepted by default
pub const MAX_FRAME_LENGTH: u8 = 64;

fn default_header() -> u8 {
    DEFAULT_HEADER
}

fn default_min_length() -> u8 {
    MIN_FRAME_LENGTH
}

fn default_max_length() -> u8 {
    MAX_FRAME_LENGTH
}

/// How a frame starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingStyle {
    /// Length byte first
    LengthPrefixed,
    /// Fixed header byte, then the length byte
    HeaderPrefixed,
}

/// Trailing integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Reflected CRC-16, little-endian on the wire
    Crc16,
    /// One-byte two's complement of the byte sum
    TwosComplement,
}

impl ChecksumKind {
    /// Checksum width in bytes
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::Crc16 => 2,
            ChecksumKind::TwosComplement => 1,
        }
    }

    fn compute(self, data: &[u8]) -> u16 {
        match self {
            ChecksumKind::Crc16 => crc16(data),
            ChecksumKind::TwosComplement => u16::from(twos_complement(data)),
        }
    }

    fn append(self, frame: &mut Vec<u8>) {
        let value = self.compute(frame);
        match self {
            ChecksumKind::Crc16 => frame.extend_from_slice(&value.to_le_bytes()),
            ChecksumKind::TwosComplement => frame.push((value & 0xFF) as u8),
        }
    }

    fn read(self, bytes: &[u8]) -> u16 {
        match self {
            ChecksumKind::Crc16 => u16::from_le_bytes([bytes[0], bytes[1]]),
            ChecksumKind::TwosComplement => u16::from(bytes[0]),
        }
    }
}

/// Wire format variant spoken by a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVariant {
    pub framing: FramingStyle,
    pub checksum: ChecksumKind,
    #[serde(default = "default_header")]
    pub header: u8,
    #[serde(default = "default_min_length")]
    pub min_length: u8,
    #[serde(default = "default_max_length")]
    pub max_length: u8,
}

impl Default for ProtocolVariant {
    fn default() -> Self {
        Self::LENGTH_CRC16
    }
}

impl ProtocolVariant {
    /// `[len][addr][cmd][data][crc16]`
    pub const LENGTH_CRC16: Self = Self {
        framing: FramingStyle::LengthPrefixed,
        checksum: ChecksumKind::Crc16,
        header: DEFAULT_HEADER,
        min_length: MIN_FRAME_LENGTH,
        max_length: MAX_FRAME_LENGTH,
    };

    /// `[0xA0][len][addr][cmd][data][sum]`
    pub const HEADER_TWOS_COMPLEMENT: Self = Self {
        framing: FramingStyle::HeaderPrefixed,
        checksum: ChecksumKind::TwosComplement,
        header: DEFAULT_HEADER,
        min_length: MIN_FRAME_LENGTH,
        max_length: MAX_FRAME_LENGTH,
    };

    /// `[0xA0][len][addr][cmd][data][crc16]`
    pub const HEADER_CRC16: Self = Self {
        framing: FramingStyle::HeaderPrefixed,
        checksum: ChecksumKind::Crc16,
        header: DEFAULT_HEADER,
        min_length: MIN_FRAME_LENGTH,
        max_length: MAX_FRAME_LENGTH,
    };

    /// Variants tried by the probe tool, most common first
    pub const KNOWN: [Self; 3] = [
        Self::LENGTH_CRC16,
        Self::HEADER_TWOS_COMPLEMENT,
        Self::HEADER_CRC16,
    ];

    /// Short display name
    pub fn name(&self) -> String {
        let framing = match self.framing {
            FramingStyle::LengthPrefixed => "length".to_string(),
            FramingStyle::HeaderPrefixed => format!("header 0x{:02X}", self.header),
        };
        let checksum = match self.checksum {
            ChecksumKind::Crc16 => "CRC-16",
            ChecksumKind::TwosComplement => "two's complement",
        };
        format!("{framing} + {checksum}")
    }

    /// Validate length bounds
    pub fn validate(&self) -> Result<()> {
        if self.min_length < MIN_FRAME_LENGTH {
            return Err(LinkError::config(format!(
                "min_length {} is below {}",
                self.min_length, MIN_FRAME_LENGTH
            )));
        }
        if self.max_length < self.min_length {
            return Err(LinkError::config(format!(
                "max_length {} is below min_length {}",
                self.max_length, self.min_length
            )));
        }
        Ok(())
    }
}

/// A received frame was rejected
///
/// Expected line noise rather than a fatal error: decoding continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("invalid frame header 0x{0:02X}")]
    BadHeader(u8),

    #[error("invalid packet length {length} (accepted {min}..={max})")]
    LengthOutOfRange { length: u8, min: u8, max: u8 },

    #[error("incomplete packet: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("packet of {0} bytes too short for address, command and checksum")]
    Undersized(usize),

    #[error("CRC mismatch: calculated {calculated:04X}, received {received:04X}")]
    ChecksumMismatch { calculated: u16, received: u16 },

    #[error("packet length {length} runs into a later valid frame")]
    Overrun { length: u8 },
}

impl FramingError {
    /// Whether decoding can go on with the bytes already buffered
    ///
    /// Only a truncated frame means the read deadline passed.
    pub fn needs_resync(&self) -> bool {
        !matches!(self, FramingError::Truncated { .. })
    }
}

/// Outcome of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A checksum-verified frame
    Frame(Frame),
    /// Nothing arrived before the timeout
    Idle,
    /// Bytes arrived but did not form a valid frame
    Rejected(FramingError),
}

/// Encoder/decoder bound to one protocol variant
///
/// Holds the receive buffer of one stream; use one codec per transport.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    variant: ProtocolVariant,
    logger: ReaderLogger,
    metrics: Arc<LinkMetrics>,
    buffer: Vec<u8>,
    skipped: usize,
}

impl FrameCodec {
    pub fn new(variant: ProtocolVariant, logger: ReaderLogger, metrics: Arc<LinkMetrics>) -> Self {
        Self {
            variant,
            logger,
            metrics,
            buffer: Vec::new(),
            skipped: 0,
        }
    }

    pub fn variant(&self) -> &ProtocolVariant {
        &self.variant
    }

    /// Build a complete frame for `command`
    pub fn encode(&self, address: u8, command: u8, data: &[u8]) -> Result<Vec<u8>> {
        let length = 2 + data.len() + self.variant.checksum.width();
        if length > usize::from(self.variant.max_length) {
            return Err(LinkError::invalid_data(format!(
                "frame length {length} exceeds {}",
                self.variant.max_length
            )));
        }

        let mut frame = Vec::with_capacity(length + 2);
        if self.variant.framing == FramingStyle::HeaderPrefixed {
            frame.push(self.variant.header);
        }
        frame.push(length as u8);
        frame.push(address);
        frame.push(command);
        frame.extend_from_slice(data);
        self.variant.checksum.append(&mut frame);

        Ok(frame)
    }

    /// Bytes received but not yet consumed by a frame or a rejection
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Forget buffered input, returning how many bytes were dropped
    pub fn reset(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.skipped = 0;
        dropped
    }

    fn header_len(&self) -> usize {
        match self.variant.framing {
            FramingStyle::LengthPrefixed => 0,
            FramingStyle::HeaderPrefixed => 1,
        }
    }

    /// Classify the candidate frame starting at `bytes[0]`
    fn scan(&self, bytes: &[u8]) -> Scan {
        let h = self.header_len();
        if h == 1 {
            match bytes.first() {
                None => return Scan::Incomplete { total: 1 },
                Some(&header) if header != self.variant.header => {
                    return Scan::Invalid(FramingError::BadHeader(header))
                },
                Some(_) => {},
            }
        }

        let Some(&length) = bytes.get(h) else {
            return Scan::Incomplete { total: h + 1 };
        };
        if length < self.variant.min_length || length > self.variant.max_length {
            return Scan::Invalid(FramingError::LengthOutOfRange {
                length,
                min: self.variant.min_length,
                max: self.variant.max_length,
            });
        }

        let expected = usize::from(length);
        let cs_len = self.variant.checksum.width();
        if expected < 2 + cs_len {
            return Scan::Invalid(FramingError::Undersized(expected));
        }

        let total = h + 1 + expected;
        if bytes.len() < total {
            return Scan::Incomplete { total };
        }

        let split = total - cs_len;
        let calculated = self.variant.checksum.compute(&bytes[..split]);
        let received = self.variant.checksum.read(&bytes[split..total]);
        if calculated != received {
            return Scan::Invalid(FramingError::ChecksumMismatch {
                calculated,
                received,
            });
        }

        Scan::Frame { total }
    }

    /// Offset of the first complete, checksum-valid frame after the buffer start
    fn later_frame(&self) -> Option<usize> {
        (1..self.buffer.len())
            .find(|&offset| matches!(self.scan(&self.buffer[offset..]), Scan::Frame { .. }))
    }

    fn truncation(&self) -> FramingError {
        let h = self.header_len();
        match self.buffer.get(h) {
            Some(&length) => FramingError::Truncated {
                expected: usize::from(length),
                received: self.buffer.len() - h - 1,
            },
            None => FramingError::Truncated {
                expected: 1,
                received: 0,
            },
        }
    }

    /// Read and validate one frame from `transport`
    ///
    /// Received bytes accumulate in a rolling buffer. A rejection drops only
    /// the first buffered byte, so a frame that arrived behind line noise is
    /// found by rescanning what was already read. `timeout` bounds the whole
    /// call, however many reads it takes.
    pub async fn decode(&mut self, transport: &mut dyn Transport, timeout: Duration) -> Result<Decoded> {
        let deadline = Instant::now() + timeout;

        loop {
            let total = match self.scan(&self.buffer) {
                Scan::Frame { total } => return Ok(self.accept(total)),
                Scan::Invalid(error) => return Ok(self.reject(error)),
                Scan::Incomplete { total } => total,
            };

            // A length byte from noise can claim bytes that belong to a real frame
            if self.later_frame().is_some() {
                let h = self.header_len();
                let length = self.buffer.get(h).copied().unwrap_or_default();
                return Ok(self.reject(FramingError::Overrun { length }));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = if remaining.is_zero() {
                Vec::new()
            } else {
                transport.read(total - self.buffer.len(), remaining).await?
            };

            if chunk.is_empty() {
                if self.buffer.is_empty() {
                    return Ok(Decoded::Idle);
                }
                let error = self.truncation();
                return Ok(self.reject(error));
            }

            self.metrics.record_received(chunk.len() as u64);
            self.buffer.extend_from_slice(&chunk);
        }
    }

    fn accept(&mut self, total: usize) -> Decoded {
        let h = self.header_len();
        let split = total - self.variant.checksum.width();
        let raw: Vec<u8> = self.buffer.drain(..total).collect();

        if self.skipped > 0 {
            self.metrics.record_resync(self.skipped as u64);
            self.logger.log_resync(self.skipped);
            self.skipped = 0;
        }
        self.logger.log_frame("RX", &raw, "frame decoded");
        self.metrics.record_decoded();

        Decoded::Frame(Frame::new(raw[h + 1], raw[h + 2], raw[h + 3..split].to_vec()))
    }

    fn reject(&mut self, error: FramingError) -> Decoded {
        self.metrics.record_rejection(&error);
        self.logger.log_framing(&error.to_string());

        if !self.buffer.is_empty() {
            self.buffer.remove(0);
            self.skipped += 1;
        }

        Decoded::Rejected(error)
    }
}

/// Result of scanning the buffer start for a frame
enum Scan {
    /// A valid frame of `total` bytes
    Frame { total: usize },
    /// The first byte cannot start a frame
    Invalid(FramingError),
    /// A frame may start here but needs `total` bytes
    Incomplete { total: usize },
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use proptest::prelude::*;
    use tracing_test::traced_test;

    const TIMEOUT: Duration = Duration::from_millis(100);

    fn codec(variant: ProtocolVariant) -> FrameCodec {
        FrameCodec::new(
            variant,
            ReaderLogger::new("test"),
            Arc::new(LinkMetrics::default()),
        )
    }

    async fn decode_bytes(codec: &mut FrameCodec, bytes: Vec<u8>) -> Decoded {
        let (mut transport, _handle) = MockTransport::with_chunks(vec![bytes]);
        codec.decode(&mut transport, TIMEOUT).await.unwrap()
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    #[test]
    fn test_encode_inventory_request() {
        let codec = codec(ProtocolVariant::LENGTH_CRC16);
        let frame = codec.encode(0x00, 0x01, &[0x04, 0x00]).unwrap();
        assert_eq!(frame, vec![0x06, 0x00, 0x01, 0x04, 0x00, 0xAC, 0x36]);
    }

    #[test]
    fn test_encode_reader_info_request() {
        let codec = codec(ProtocolVariant::LENGTH_CRC16);
        let frame = codec.encode(0x00, 0x21, &[]).unwrap();
        assert_eq!(frame, vec![0x04, 0x00, 0x21, 0xD9, 0x6A]);
    }

    #[test]
    fn test_encode_header_twos_complement() {
        let codec = codec(ProtocolVariant::HEADER_TWOS_COMPLEMENT);
        let frame = codec.encode(0xFF, 0x21, &[]).unwrap();
        // A0 03 FF 21 + (0 - (A0+03+FF+21)) & FF
        assert_eq!(frame, vec![0xA0, 0x03, 0xFF, 0x21, 0x3D]);
    }

    #[test]
    fn test_encode_rejects_oversized_data() {
        let codec = codec(ProtocolVariant::LENGTH_CRC16);
        assert!(codec.encode(0x00, 0x01, &[0u8; 60]).is_ok());
        let err = codec.encode(0x00, 0x01, &[0u8; 61]).unwrap_err();
        assert!(matches!(err, LinkError::InvalidData(_)));
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    #[tokio::test]
    async fn test_decode_valid_frame() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let bytes = codec.encode(0x01, 0x21, &[0x02, 0x03]).unwrap();

        let decoded = decode_bytes(&mut codec, bytes).await;
        assert_eq!(decoded, Decoded::Frame(Frame::new(0x01, 0x21, vec![0x02, 0x03])));
        assert_eq!(codec.metrics.snapshot().frames_decoded, 1);
    }

    #[tokio::test]
    async fn test_decode_idle_on_silence() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let decoded = decode_bytes(&mut codec, Vec::new()).await;
        assert_eq!(decoded, Decoded::Idle);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_decode_bit_flip_is_crc_mismatch() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let mut bytes = codec.encode(0x00, 0x01, &[0x01, 0x00, 0x00, 0x02, 0xAA, 0xAA, 0x40]).unwrap();
        bytes[5] ^= 0x10;

        let decoded = decode_bytes(&mut codec, bytes).await;
        assert!(matches!(
            decoded,
            Decoded::Rejected(FramingError::ChecksumMismatch { .. })
        ));
        assert!(logs_contain("CRC mismatch"));
        assert_eq!(codec.metrics.snapshot().crc_mismatches, 1);
    }

    /// Decode until the stream goes idle, collecting frames and rejections
    async fn drain(
        codec: &mut FrameCodec,
        transport: &mut MockTransport,
    ) -> (Vec<Frame>, Vec<FramingError>) {
        let mut frames = Vec::new();
        let mut rejected = Vec::new();
        loop {
            match codec.decode(transport, TIMEOUT).await.unwrap() {
                Decoded::Frame(frame) => frames.push(frame),
                Decoded::Rejected(e) => rejected.push(e),
                Decoded::Idle => return (frames, rejected),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_length_out_of_range_skips_one_byte() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let valid = codec.encode(0x00, 0x21, &[]).unwrap();

        for bad_length in [2u8, 65] {
            let first = vec![bad_length, 0xDE, 0xAD, 0xBE, 0xEF];
            let (mut transport, handle) =
                MockTransport::with_chunks(vec![first, valid.clone()]);

            let decoded = codec.decode(&mut transport, TIMEOUT).await.unwrap();
            assert!(matches!(
                decoded,
                Decoded::Rejected(FramingError::LengthOutOfRange { length, .. }) if length == bad_length
            ));

            // The remaining noise bytes are rejected one at a time
            let (frames, rejected) = drain(&mut codec, &mut transport).await;
            assert_eq!(frames, vec![Frame::new(0x00, 0x21, vec![])]);
            assert_eq!(rejected.len(), 4);
            assert_eq!(handle.discards(), 0);
            assert_eq!(codec.buffered(), 0);
        }

        let snap = codec.metrics.snapshot();
        assert_eq!(snap.length_rejections, 10);
        assert_eq!(snap.resyncs, 2);
        assert_eq!(snap.bytes_discarded, 10);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_decode_in_range_noise_does_not_swallow_frame() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let info = Frame::new(0x00, 0x21, vec![0x02, 0x04]);
        let valid = codec.encode(info.address, info.command, &info.data).unwrap();

        // 0x30 claims 48 more bytes; only the reply follows
        let (mut transport, _handle) = MockTransport::with_chunks(vec![vec![0x30], valid]);

        let started = Instant::now();
        let decoded = codec.decode(&mut transport, TIMEOUT).await.unwrap();
        assert_eq!(decoded, Decoded::Rejected(FramingError::Overrun { length: 0x30 }));
        let decoded = codec.decode(&mut transport, TIMEOUT).await.unwrap();
        assert_eq!(decoded, Decoded::Frame(info));
        assert!(started.elapsed() < TIMEOUT);
        assert!(logs_contain("[RESYNC] Skipped 1 bytes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_finds_frame_behind_random_noise() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        for variant in [ProtocolVariant::LENGTH_CRC16, ProtocolVariant::HEADER_CRC16] {
            for seed in 0..20u64 {
                let mut codec = codec(variant);
                let mut rng = StdRng::seed_from_u64(seed);
                let sent = Frame::new(0x00, 0x21, vec![0x02, 0x04, 0x09]);

                let mut stream: Vec<u8> = (0..40).map(|_| rng.gen::<u8>()).collect();
                stream.extend(codec.encode(sent.address, sent.command, &sent.data).unwrap());
                let (mut transport, _handle) = MockTransport::with_chunks(vec![stream]);

                let (frames, rejected) = drain(&mut codec, &mut transport).await;
                assert_eq!(frames, vec![sent], "{} seed {seed}", variant.name());
                assert!(
                    rejected.iter().all(FramingError::needs_resync),
                    "{} seed {seed}: {rejected:?}",
                    variant.name()
                );
                assert_eq!(codec.metrics.snapshot().bytes_discarded, 40);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_bounded_by_one_timeout() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        // Length and address arrive, the rest never does
        let (mut transport, _handle) = MockTransport::with_chunks(vec![vec![0x06], vec![0x00]]);

        let started = Instant::now();
        let decoded = codec.decode(&mut transport, TIMEOUT).await.unwrap();
        assert_eq!(
            decoded,
            Decoded::Rejected(FramingError::Truncated {
                expected: 6,
                received: 1
            })
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= TIMEOUT && elapsed < TIMEOUT + Duration::from_millis(5));
        // Only the length byte is given up; the address byte is rescanned
        assert_eq!(codec.buffered(), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_buffer() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let (mut transport, _handle) = MockTransport::with_chunks(vec![vec![0x10, 0x00, 0x01]]);
        codec.decode(&mut transport, Duration::from_millis(10)).await.unwrap();
        assert_eq!(codec.buffered(), 2);
        assert_eq!(codec.reset(), 2);
        assert_eq!(codec.buffered(), 0);
    }

    #[tokio::test]
    async fn test_decode_truncated_frame() {
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let mut bytes = codec.encode(0x00, 0x01, &[0x04, 0x00]).unwrap();
        bytes.truncate(4);

        let decoded = decode_bytes(&mut codec, bytes).await;
        assert_eq!(
            decoded,
            Decoded::Rejected(FramingError::Truncated {
                expected: 6,
                received: 3
            })
        );
    }

    #[tokio::test]
    async fn test_decode_undersized_frame() {
        // Length 3 passes the bounds but cannot hold addr, cmd and a CRC-16
        let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
        let decoded = decode_bytes(&mut codec, vec![0x03, 0x00, 0x21, 0x00]).await;
        assert_eq!(decoded, Decoded::Rejected(FramingError::Undersized(3)));
    }

    #[tokio::test]
    async fn test_decode_header_variants() {
        for variant in [
            ProtocolVariant::HEADER_TWOS_COMPLEMENT,
            ProtocolVariant::HEADER_CRC16,
        ] {
            let mut codec = codec(variant);
            let bytes = codec.encode(0xFF, 0x21, &[0x09]).unwrap();
            let decoded = decode_bytes(&mut codec, bytes).await;
            assert_eq!(decoded, Decoded::Frame(Frame::new(0xFF, 0x21, vec![0x09])));

            let decoded = decode_bytes(&mut codec, vec![0x55, 0x04, 0xFF, 0x21]).await;
            assert_eq!(decoded, Decoded::Rejected(FramingError::BadHeader(0x55)));
        }
    }

    #[tokio::test]
    async fn test_twos_complement_detects_corruption() {
        let mut codec = codec(ProtocolVariant::HEADER_TWOS_COMPLEMENT);
        let mut bytes = codec.encode(0x00, 0x21, &[0x01, 0x02]).unwrap();
        bytes[4] = 0x03;
        let decoded = decode_bytes(&mut codec, bytes).await;
        assert!(matches!(
            decoded,
            Decoded::Rejected(FramingError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_variant_validation() {
        assert!(ProtocolVariant::LENGTH_CRC16.validate().is_ok());
        let inverted = ProtocolVariant {
            min_length: 10,
            max_length: 5,
            ..ProtocolVariant::LENGTH_CRC16
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_variant_names() {
        assert_eq!(ProtocolVariant::LENGTH_CRC16.name(), "length + CRC-16");
        assert_eq!(
            ProtocolVariant::HEADER_TWOS_COMPLEMENT.name(),
            "header 0xA0 + two's complement"
        );
    }

    proptest! {
        #[test]
        fn prop_encode_decode_preserves_frame(
            address in any::<u8>(),
            command in any::<u8>(),
            data in proptest::collection::vec(any::<u8>(), 0..=60),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let mut codec = codec(ProtocolVariant::LENGTH_CRC16);
            let bytes = codec.encode(address, command, &data).unwrap();
            prop_assert_eq!(usize::from(bytes[0]), bytes.len() - 1);

            let decoded = rt.block_on(decode_bytes(&mut codec, bytes));
            prop_assert_eq!(decoded, Decoded::Frame(Frame::new(address, command, data)));
        }
    }
}
