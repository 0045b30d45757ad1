//! State Sync Transport
//!
//! Point-to-point TCP anti-entropy between peers: full-snapshot transfer
//! for bootstrap and single-diff pushes for eager propagation. Every
//! message travels as a length-and-checksum framed bincode body.

mod client;
pub mod protocol;
mod server;

pub use client::SyncClient;
pub use protocol::{Envelope, FrameHeader, SyncRequest};
pub use server::SyncServer;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Upper bound on a frame body; a corrupt length field must not be able
/// to request an unbounded allocation.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Read one framed message from a reader
pub async fn read_message<T, R>(reader: &mut R) -> Result<T>
where
    T: DeserializeOwned,
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge(header.length));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    if crc32fast::hash(&body) != header.checksum {
        return Err(Error::ChecksumMismatch);
    }

    Ok(bincode::deserialize(&body)?)
}

/// Write one framed message to a writer
pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<()>
where
    T: Serialize,
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    let body = bincode::serialize(message)?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}
