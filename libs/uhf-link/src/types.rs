//! Reader protocol types
//!
//! Frames, tag reports and the command set used by the inventory pipeline.

use serde::{Deserialize, Serialize};

/// Real-time inventory command
pub const CMD_INVENTORY: u8 = 0x01;

/// Get reader information command
pub const CMD_READER_INFO: u8 = 0x21;

/// Default reader address
pub const DEFAULT_ADDRESS: u8 = 0x00;

/// Default Q value for inventory rounds
pub const DEFAULT_Q: u8 = 4;

/// Default Gen2 session for inventory rounds
pub const DEFAULT_SESSION: u8 = 0;

/// Offset of the EPC length byte in inventory response data
const INVENTORY_EPC_LEN_OFFSET: usize = 3;

/// Decoded protocol frame (checksum already verified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Reader address
    pub address: u8,
    /// Command byte
    pub command: u8,
    /// Command data, checksum excluded
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(address: u8, command: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            data: data.into(),
        }
    }
}

/// A single tag observation from an inventory response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagReport {
    /// Raw EPC bytes
    pub epc: Vec<u8>,
    /// Received signal strength as reported by the reader
    pub rssi: u8,
    /// Antenna port the tag was seen on
    pub antenna: u8,
}

impl TagReport {
    /// EPC as an uppercase hex string (two characters per byte)
    pub fn epc_hex(&self) -> String {
        common::hex::encode_upper(&self.epc)
    }

    /// Parse inventory response data
    ///
    /// Layout: `[antenna, rsv, rsv, epc_len, epc(epc_len), rssi]`.
    /// Returns `None` when the data is shorter than the layout requires.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let epc_len = *data.get(INVENTORY_EPC_LEN_OFFSET)? as usize;
        let epc_start = INVENTORY_EPC_LEN_OFFSET + 1;
        let rssi_index = epc_start + epc_len;
        if data.len() < rssi_index + 1 {
            return None;
        }

        Some(Self {
            epc: data[epc_start..rssi_index].to_vec(),
            rssi: data[rssi_index],
            antenna: data[0],
        })
    }
}

/// Inventory round parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryParams {
    /// Q value (slot count exponent)
    pub q: u8,
    /// Gen2 session
    pub session: u8,
    /// Wall-clock window for collecting tag responses
    pub listen_window_ms: u64,
}

impl Default for InventoryParams {
    fn default() -> Self {
        Self {
            q: DEFAULT_Q,
            session: DEFAULT_SESSION,
            listen_window_ms: 500,
        }
    }
}

impl InventoryParams {
    /// Request data for the inventory command
    pub fn request_data(&self) -> [u8; 2] {
        [self.q, self.session]
    }
}
