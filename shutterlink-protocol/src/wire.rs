//! Wire format for transfer sessions.
//!
//! Both transfer directions (photographer to node, node to node) share one
//! session shape over a single TCP stream:
//!
//! 1. Header frame: 4-byte big-endian length + UTF-8 JSON ([`TransferHeader`])
//! 2. Acknowledgement frame: same framing, JSON ([`AckResponse`]); any status
//!    other than `"ready"` aborts the session
//! 3. Body: for each manifest entry in order, exactly `size` raw bytes in
//!    chunks of at most 1 MiB, with no inter-chunk framing
//! 4. Per-file acknowledgement: a length-prefixed UTF-8 reply, `"OK"` or
//!    `"CHECKSUM_ERROR"`
//!
//! The JSON field names and the MD5 hex checksums are a wire contract and
//! must not change.

use crate::{Result, TransferError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Fixed TCP port all roles listen on
pub const TRANSFER_PORT: u16 = 45678;

/// Maximum read/write unit while streaming file bytes (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound on a framed payload; anything larger is a malformed prefix
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Per-file acknowledgement payload on digest match
pub const FILE_ACK_OK: &str = "OK";

/// Per-file acknowledgement payload on digest mismatch
pub const FILE_ACK_CHECKSUM_ERROR: &str = "CHECKSUM_ERROR";

/// One file declared in a session's manifest.
///
/// `name` may carry a relative sub-path (`raw/a.cr2`) for folder transfers.
/// `checksum` is the lowercase MD5 hex digest of the file's contents,
/// computed by the sender before the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifestEntry {
    pub name: String,
    pub size: u64,
    pub checksum: String,
}

/// Session header, sent once per session. Fully determines the session
/// shape: the receiver knows every file name, size, and checksum before the
/// first body byte arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHeader {
    /// Sender display name ("photographer" on the wire, kept for
    /// compatibility with existing peers)
    #[serde(rename = "photographer")]
    pub sender: String,

    /// Ordered file manifest
    pub files: Vec<FileManifestEntry>,

    /// True when an entire folder is being sent with its structure preserved
    #[serde(default)]
    pub is_folder_transfer: bool,

    /// Original folder name, present only for folder transfers
    #[serde(default)]
    pub folder_name: Option<String>,
}

impl TransferHeader {
    /// Sum of all declared file sizes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// Receiver's reply to the header frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub status: String,
    #[serde(default)]
    pub folder: Option<String>,
}

impl AckResponse {
    /// Accept the session; `folder` is the absolute destination path.
    pub fn ready(folder: impl Into<String>) -> Self {
        Self {
            status: "ready".to_string(),
            folder: Some(folder.into()),
        }
    }

    /// Refuse the session with an error status.
    pub fn error(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            folder: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

/// Write a length-prefixed frame: 4-byte big-endian length, then the payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a length-prefixed frame, rejecting implausible lengths.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_LEN {
        return Err(TransferError::Protocol(format!(
            "frame length {} exceeds limit {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Serialize a value as JSON and write it as one frame.
pub async fn write_json_frame<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    write_frame(writer, &payload).await
}

/// Read one frame and deserialize its JSON payload.
pub async fn read_json_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let payload = read_frame(reader).await?;
    serde_json::from_slice(&payload)
        .map_err(|e| TransferError::Protocol(format!("malformed payload: {}", e)))
}
