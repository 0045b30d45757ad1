//! Sync wire protocol
//!
//! Sync exchanges are one-shot: a `SyncRequest` prefixes the exchange,
//! followed by either a snapshot response (full dump) or one pushed diff,
//! then the connection closes. Control-plane traffic shares the same
//! listener via the `Envelope` wrapper and may keep its connection open
//! for further messages.

use serde::{Deserialize, Serialize};

use crate::connector::ControlMessage;

/// Top-level frame on the sync listener: the two transports are
/// multiplexed over one port, each keeping its own message shapes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    Sync(SyncRequest),
    Control(ControlMessage),
}

/// Request tag prefixing every sync exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRequest {
    /// "Send me your complete registry snapshot"
    FullDump,
    /// "One diff follows; apply it"
    DiffPush,
}

impl SyncRequest {
    /// Get the request type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            SyncRequest::FullDump => "FullDump",
            SyncRequest::DiffPush => "DiffPush",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Body length in bytes
    pub length: u32,
    /// CRC32 of the body
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Create a header for the given body
    pub fn new(body: &[u8]) -> Self {
        Self {
            length: body.len() as u32,
            checksum: crc32fast::hash(body),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            length: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            checksum: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}
