//! Reader simulator
//!
//! A TCP listener that speaks the length-prefixed CRC-16 protocol well
//! enough to exercise the service without hardware: inventory commands get
//! a burst of 1-3 tag frames, reader-information requests a fixed block.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uhf_link::{
    Decoded, FrameCodec, LinkMetrics, ProtocolVariant, ReaderLogger, TcpTransport, Transport,
    CMD_INVENTORY, CMD_READER_INFO,
};

/// Address the simulated reader answers from
pub const SIMULATOR_ADDRESS: u8 = 0x01;

/// Antenna reported for every simulated tag
pub const SIMULATOR_ANTENNA: u8 = 0x03;

/// RSSI reported for every simulated tag
pub const SIMULATOR_RSSI: u8 = 0x81;

/// Gap between tag frames in one burst
pub const TAG_FRAME_GAP: Duration = Duration::from_millis(50);

/// Reader information block: firmware 3.1, type 0x0F, protocols, band edges, power, scan time
pub const READER_INFO: [u8; 8] = [0x03, 0x01, 0x0F, 0x02, 0x31, 0x80, 0x1E, 0x0A];

/// EPCs served when none are configured
pub const DEFAULT_EPCS: [&str; 2] = ["E20000195607022216503895", "E20000195607022216503896"];

/// Simulated network reader
#[derive(Debug)]
pub struct ReaderSimulator {
    listener: TcpListener,
    epcs: Arc<Vec<Vec<u8>>>,
    seed: Option<u64>,
}

impl ReaderSimulator {
    /// Bind to `addr`; EPCs are hex strings
    pub async fn bind(addr: &str, epcs: &[String]) -> anyhow::Result<Self> {
        let epcs = epcs
            .iter()
            .map(|epc| {
                common::hex::decode(epc)
                    .filter(|bytes| !bytes.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("invalid EPC '{epc}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let epcs = if epcs.is_empty() {
            DEFAULT_EPCS
                .iter()
                .filter_map(|epc| common::hex::decode(epc))
                .collect()
        } else {
            epcs
        };

        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            epcs: Arc::new(epcs),
            seed: None,
        })
    }

    /// Deterministic tag bursts
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients until cancelled; each client is served on its own task
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        info!("Simulator listening on {}", self.listener.local_addr()?);
        let mut client_index = 0u64;

        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted?,
            };
            info!("Simulator client: {}", peer);

            let rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(client_index)),
                None => StdRng::from_entropy(),
            };
            client_index += 1;

            let epcs = Arc::clone(&self.epcs);
            let cancel = cancel.clone();
            let transport = TcpTransport::from_stream(stream, peer.to_string());
            tokio::spawn(async move {
                serve_client(transport, peer.to_string(), epcs, rng, cancel).await;
            });
        }

        info!("Simulator stopped");
        Ok(())
    }
}

fn codec() -> FrameCodec {
    FrameCodec::new(
        ProtocolVariant::LENGTH_CRC16,
        ReaderLogger::new("simulator"),
        Arc::new(LinkMetrics::default()),
    )
}

/// Inventory response frame for one tag
pub fn tag_frame(epc: &[u8]) -> Option<Vec<u8>> {
    let mut data = Vec::with_capacity(epc.len() + 5);
    data.extend_from_slice(&[SIMULATOR_ANTENNA, 0x01, 0x01, u8::try_from(epc.len()).ok()?]);
    data.extend_from_slice(epc);
    data.push(SIMULATOR_RSSI);
    codec().encode(SIMULATOR_ADDRESS, CMD_INVENTORY, &data).ok()
}

async fn serve_client<T: Transport>(
    mut transport: T,
    peer: String,
    epcs: Arc<Vec<Vec<u8>>>,
    mut rng: StdRng,
    cancel: CancellationToken,
) {
    let mut codec = codec();

    loop {
        let decoded = tokio::select! {
            _ = cancel.cancelled() => break,
            decoded = codec.decode(&mut transport, Duration::from_secs(1)) => decoded,
        };

        let request = match decoded {
            Ok(Decoded::Frame(frame)) => frame,
            Ok(Decoded::Idle) | Ok(Decoded::Rejected(_)) => continue,
            Err(e) => {
                debug!("Simulator client {} gone: {}", peer, e);
                break;
            },
        };

        let result = match request.command {
            CMD_INVENTORY => send_burst(&mut transport, &epcs, &mut rng).await,
            CMD_READER_INFO => match codec.encode(SIMULATOR_ADDRESS, CMD_READER_INFO, &READER_INFO) {
                Ok(frame) => transport.write_all(&frame).await,
                Err(e) => Err(e),
            },
            other => {
                debug!("Simulator ignoring command 0x{:02X}", other);
                Ok(())
            },
        };

        if let Err(e) = result {
            warn!("Simulator write to {} failed: {}", peer, e);
            break;
        }
    }

    if let Err(e) = transport.close().await {
        debug!("Simulator close {}: {}", peer, e);
    }
}

async fn send_burst(
    transport: &mut dyn Transport,
    epcs: &[Vec<u8>],
    rng: &mut StdRng,
) -> uhf_link::Result<()> {
    if epcs.is_empty() {
        return Ok(());
    }

    let count = rng.gen_range(1..=3);
    for i in 0..count {
        let epc = &epcs[rng.gen_range(0..epcs.len())];
        if let Some(frame) = tag_frame(epc) {
            transport.write_all(&frame).await?;
        }
        if i + 1 < count {
            tokio::time::sleep(TAG_FRAME_GAP).await;
        }
    }
    Ok(())
}
