//! One-shot reader tools behind the `scan`, `info` and `probe` subcommands

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};
use uhf_link::{
    Endpoint, Frame, LinkMetrics, ProtocolVariant, ReaderLogger, ReaderSession, SessionConfig,
    TagReport,
};

/// Outcome of trying one protocol variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub variant: ProtocolVariant,
    /// Reader information payload when the variant produced a valid reply
    pub reply: Option<Vec<u8>>,
}

impl ProbeResult {
    pub fn matched(&self) -> bool {
        self.reply.is_some()
    }
}

fn session(config: SessionConfig) -> ReaderSession {
    let logger = ReaderLogger::new(config.endpoint.target().to_string());
    ReaderSession::new(config, logger, Arc::new(LinkMetrics::default()))
}

async fn connected(config: SessionConfig) -> Result<ReaderSession> {
    let endpoint = config.endpoint.clone();
    let mut session = session(config);
    session
        .connect()
        .await
        .with_context(|| format!("failed to open {endpoint}"))?;
    Ok(session)
}

/// Run one inventory window and return what was seen
pub async fn scan(config: SessionConfig) -> Result<Vec<TagReport>> {
    let mut session = connected(config).await?;
    let result = session.inventory_real_time().await;
    session.disconnect().await.ok();
    result.context("inventory failed")
}

/// Fetch the reader information frame
pub async fn info(config: SessionConfig) -> Result<Option<Frame>> {
    let mut session = connected(config).await?;
    let result = session.get_reader_information().await;
    session.disconnect().await.ok();
    result.context("reader information request failed")
}

/// Send the information request under every known protocol variant
///
/// Each variant gets a fresh connection so leftovers from a previous
/// attempt cannot be mistaken for a reply.
pub async fn probe(endpoint: Endpoint, address: u8, read_timeout_ms: u64) -> Result<Vec<ProbeResult>> {
    let mut results = Vec::with_capacity(ProtocolVariant::KNOWN.len());

    for variant in ProtocolVariant::KNOWN {
        let mut config = SessionConfig::new(endpoint.clone());
        config.address = address;
        config.protocol = variant;
        config.read_timeout_ms = read_timeout_ms;

        let mut session = connected(config).await?;
        let reply = match session.get_reader_information().await {
            Ok(frame) => frame.map(|f| f.data),
            Err(e) => {
                debug!("Probe with {} failed: {}", variant.name(), e);
                None
            },
        };
        session.disconnect().await.ok();

        info!(
            "Probe {}: {}",
            variant.name(),
            if reply.is_some() { "reply" } else { "no reply" }
        );
        results.push(ProbeResult { variant, reply });
    }

    Ok(results)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::simulator::{ReaderSimulator, READER_INFO};
    use tokio_util::sync::CancellationToken;

    async fn simulator() -> (Endpoint, CancellationToken) {
        let sim = ReaderSimulator::bind("127.0.0.1:0", &[]).await.unwrap().with_seed(7);
        let port = sim.local_addr().unwrap().port();
        let cancel = CancellationToken::new();
        tokio::spawn(sim.run(cancel.clone()));
        (Endpoint::tcp("127.0.0.1", port), cancel)
    }

    #[tokio::test]
    async fn test_info_against_simulator() {
        let (endpoint, cancel) = simulator().await;
        let frame = info(SessionConfig::new(endpoint)).await.unwrap().unwrap();
        assert_eq!(frame.data, READER_INFO.to_vec());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_probe_finds_length_crc16() {
        let (endpoint, cancel) = simulator().await;
        let results = probe(endpoint, 0x00, 200).await.unwrap();

        assert_eq!(results.len(), ProtocolVariant::KNOWN.len());
        let matched: Vec<_> = results.iter().filter(|r| r.matched()).collect();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].variant, ProtocolVariant::LENGTH_CRC16);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_scan_unreachable_reader() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = scan(SessionConfig::new(Endpoint::tcp("127.0.0.1", port)))
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to open"));
    }
}
