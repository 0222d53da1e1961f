//! Shared helpers for tagsrv integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tagsrv::sink::{DeliveryError, TagSink};
use uhf_link::{FrameCodec, LinkMetrics, ProtocolVariant, ReaderLogger, CMD_INVENTORY};

/// One sink call as seen by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Batch { epcs: Vec<String>, source: String },
    Tag { epc: String, source: String },
}

/// Sink that records every call
#[derive(Debug, Default, Clone)]
pub struct RecordingSink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl RecordingSink {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.deliveries()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Batch { epcs, .. } => Some(epcs),
                Delivery::Tag { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl TagSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver_batch(&self, epcs: &[String], source: &str) -> Result<(), DeliveryError> {
        self.deliveries.lock().push(Delivery::Batch {
            epcs: epcs.to_vec(),
            source: source.to_string(),
        });
        Ok(())
    }

    async fn deliver_tag(&self, epc: &str, source: &str) -> Result<(), DeliveryError> {
        self.deliveries.lock().push(Delivery::Tag {
            epc: epc.to_string(),
            source: source.to_string(),
        });
        Ok(())
    }
}

/// Length-prefixed CRC-16 inventory response carrying `epc`
pub fn inventory_frame(epc: &[u8]) -> Vec<u8> {
    let codec = FrameCodec::new(
        ProtocolVariant::LENGTH_CRC16,
        ReaderLogger::new("support"),
        Arc::new(LinkMetrics::default()),
    );
    let mut data = vec![0x01, 0x00, 0x00, epc.len() as u8];
    data.extend_from_slice(epc);
    data.push(0xC0);
    codec
        .encode(0x00, CMD_INVENTORY, &data)
        .expect("inventory frame fits")
}
