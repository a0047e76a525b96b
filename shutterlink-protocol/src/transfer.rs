//! Transfer session execution.
//!
//! The streaming algorithm is shared by both directions: the photographer
//! client and the node-to-node folder sender run [`run_outbound`]; every
//! accepted connection runs [`run_inbound`]. Functions are generic over the
//! stream so sessions can be exercised over in-memory pipes in tests.
//!
//! Every socket operation is bounded by an explicit timeout; expiry is a
//! [`TransferError::Connection`], since an unbounded blocking read would pin
//! its handler forever.

use crate::destination::{resolve_destination, resolve_folder_destination, NamingConfig};
use crate::manifest::OutgoingFile;
use crate::wire::{
    read_frame, read_json_frame, write_frame, write_json_frame, AckResponse, FileManifestEntry,
    TransferHeader, CHUNK_SIZE, FILE_ACK_CHECKSUM_ERROR, FILE_ACK_OK,
};
use crate::{Result, TransferError};
use md5::{Digest, Md5};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout for establishing an outbound connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for any single frame or chunk read/write
pub const IO_TIMEOUT: Duration = Duration::from_secs(60);

/// Summary of a completed inbound session.
#[derive(Debug, Clone)]
pub struct InboundReport {
    pub sender: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub destination: PathBuf,
    pub is_folder_transfer: bool,
}

/// Connect to a peer with timeout and low-latency socket options.
pub async fn connect(addr: &str) -> Result<TcpStream> {
    match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(TransferError::Connection(format!("connect {}: {}", addr, e))),
        Err(_) => Err(TransferError::Connection(format!(
            "connect {} timed out",
            addr
        ))),
    }
}

async fn timed<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(IO_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransferError::Connection("operation timed out".to_string())),
    }
}

/// Socket-level I/O failures are connection errors, not generic I/O.
fn as_connection(err: TransferError) -> TransferError {
    match err {
        TransferError::Io(e) => TransferError::Connection(e.to_string()),
        other => other,
    }
}

/// Map a wire name to a relative path, rejecting anything that could
/// escape the destination folder.
fn sanitize_wire_name(name: &str) -> Result<PathBuf> {
    let mut path = PathBuf::new();
    for part in name.split(['/', '\\']) {
        if part.is_empty() || part == "." || part == ".." {
            return Err(TransferError::Protocol(format!(
                "unsafe file name on wire: {:?}",
                name
            )));
        }
        path.push(part);
    }
    Ok(path)
}

/// Run the receiving side of one session over an accepted stream.
///
/// Resolves the destination under the naming lock (serializing the
/// filesystem scan against concurrent sessions), acknowledges, then streams
/// every manifest entry in order, verifying each file's digest before
/// acknowledging it. `on_start` fires once the destination is known;
/// `on_progress` is called with `(received_total, total)` per chunk.
pub async fn run_inbound<S, FStart, FProgress>(
    stream: &mut S,
    naming: &Mutex<NamingConfig>,
    mut on_start: FStart,
    mut on_progress: FProgress,
) -> Result<InboundReport>
where
    S: AsyncRead + AsyncWrite + Unpin,
    FStart: FnMut(&TransferHeader, &Path),
    FProgress: FnMut(u64, u64),
{
    let header: TransferHeader = timed(read_json_frame(stream)).await.map_err(as_connection)?;
    let total_bytes = header.total_bytes();

    debug!(
        "inbound session from {}: {} files, {} bytes",
        header.sender,
        header.files.len(),
        total_bytes
    );

    // The scan-and-create is the racy part; one resolution at a time.
    let destination = {
        let naming = naming.lock().await;
        let resolved = match (&header.folder_name, header.is_folder_transfer) {
            (Some(folder_name), true) => {
                resolve_folder_destination(&naming.base_path, folder_name)
            }
            _ => resolve_destination(&naming, &header.sender),
        };
        match resolved {
            Ok(dest) => dest,
            Err(e) => {
                let _ = timed(write_json_frame(
                    stream,
                    &AckResponse::error(format!("error: {}", e)),
                ))
                .await;
                return Err(e);
            }
        }
    };

    timed(write_json_frame(
        stream,
        &AckResponse::ready(destination.to_string_lossy()),
    ))
    .await
    .map_err(as_connection)?;

    on_start(&header, &destination);

    let mut received_total: u64 = 0;
    for entry in &header.files {
        receive_one(stream, &destination, entry, &mut |delta| {
            received_total += delta;
            on_progress(received_total, total_bytes);
        })
        .await?;
    }

    info!(
        "inbound session from {} complete: {} files into {}",
        header.sender,
        header.files.len(),
        destination.display()
    );

    Ok(InboundReport {
        sender: header.sender,
        file_count: header.files.len(),
        total_bytes,
        destination,
        is_folder_transfer: header.is_folder_transfer,
    })
}

/// Receive one manifest entry: stream its bytes to disk while updating a
/// running digest, then acknowledge. A digest mismatch sends the
/// checksum-error reply and aborts; remaining manifest entries are never
/// attempted.
async fn receive_one<S, F>(
    stream: &mut S,
    destination: &Path,
    entry: &FileManifestEntry,
    on_bytes: &mut F,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let relative = sanitize_wire_name(&entry.name)?;
    let file_path = destination.join(relative);

    if let Some(parent) = file_path.parent() {
        if parent != destination {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::FolderCreation {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
    }

    let mut file = File::create(&file_path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut remaining = entry.size;

    while remaining > 0 {
        let to_read = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = timed(async {
            stream
                .read(&mut buffer[..to_read])
                .await
                .map_err(|e| TransferError::Connection(e.to_string()))
        })
        .await?;

        if n == 0 {
            return Err(TransferError::Connection(format!(
                "connection lost receiving {}",
                entry.name
            )));
        }

        file.write_all(&buffer[..n]).await?;
        hasher.update(&buffer[..n]);
        remaining -= n as u64;
        on_bytes(n as u64);
    }

    file.flush().await?;

    let digest = hex::encode(hasher.finalize());
    if !digest.eq_ignore_ascii_case(&entry.checksum) {
        warn!(
            "checksum mismatch for {}: declared {}, computed {}",
            entry.name, entry.checksum, digest
        );
        let _ = timed(write_frame(stream, FILE_ACK_CHECKSUM_ERROR.as_bytes())).await;
        return Err(TransferError::ChecksumMismatch {
            file: entry.name.clone(),
        });
    }

    timed(write_frame(stream, FILE_ACK_OK.as_bytes()))
        .await
        .map_err(as_connection)?;
    Ok(())
}

/// Run the sending side of one session over a connected stream.
///
/// Writes the header, waits for the ready acknowledgement, then streams
/// every file in manifest order, waiting for each file's acknowledgement
/// before starting the next. `on_progress` is called with
/// `(sent_total, total)` per chunk; `on_file_done` fires after a file's
/// acknowledgement (the point at which a duplicate-log entry becomes
/// durable). Returns the destination folder reported by the receiver.
pub async fn run_outbound<S, FProgress, FFileDone>(
    stream: &mut S,
    sender_name: &str,
    files: &[OutgoingFile],
    folder_name: Option<&str>,
    mut on_progress: FProgress,
    mut on_file_done: FFileDone,
) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
    FProgress: FnMut(u64, u64),
    FFileDone: FnMut(&OutgoingFile),
{
    let header = TransferHeader {
        sender: sender_name.to_string(),
        files: files.iter().map(|f| f.entry.clone()).collect(),
        is_folder_transfer: folder_name.is_some(),
        folder_name: folder_name.map(str::to_string),
    };
    let total_bytes = header.total_bytes();

    timed(write_json_frame(stream, &header))
        .await
        .map_err(as_connection)?;

    let ack: AckResponse = timed(read_json_frame(stream)).await.map_err(as_connection)?;
    if !ack.is_ready() {
        return Err(TransferError::ServerNotReady(ack.status));
    }

    let mut sent_total: u64 = 0;
    for file in files {
        send_one(stream, file, &mut |delta| {
            sent_total += delta;
            on_progress(sent_total, total_bytes);
        })
        .await?;
        on_file_done(file);
    }

    info!(
        "outbound session complete: {} files, {} bytes",
        files.len(),
        total_bytes
    );

    Ok(ack.folder.unwrap_or_default())
}

/// Send one file's bytes and wait for its acknowledgement.
async fn send_one<S, F>(stream: &mut S, file: &OutgoingFile, on_bytes: &mut F) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut source = File::open(&file.path).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut remaining = file.entry.size;

    while remaining > 0 {
        let to_read = remaining.min(CHUNK_SIZE as u64) as usize;
        let n = source.read(&mut buffer[..to_read]).await?;
        if n == 0 {
            // The file shrank since the manifest was computed.
            return Err(TransferError::Protocol(format!(
                "{} truncated during send",
                file.entry.name
            )));
        }

        timed(async {
            stream
                .write_all(&buffer[..n])
                .await
                .map_err(|e| TransferError::Connection(e.to_string()))
        })
        .await?;

        remaining -= n as u64;
        on_bytes(n as u64);
    }

    let reply = timed(read_frame(stream)).await.map_err(as_connection)?;
    match std::str::from_utf8(&reply) {
        Ok(FILE_ACK_OK) => Ok(()),
        Ok(FILE_ACK_CHECKSUM_ERROR) => Err(TransferError::ChecksumMismatch {
            file: file.entry.name.clone(),
        }),
        _ => Err(TransferError::Protocol(format!(
            "unexpected file acknowledgement: {}",
            String::from_utf8_lossy(&reply)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{collect_folder, OutgoingFile};
    use tempfile::TempDir;

    fn naming(base: &Path) -> Mutex<NamingConfig> {
        Mutex::new(NamingConfig {
            base_path: base.to_path_buf(),
            template: "{num:02d} - {name}".to_string(),
            use_day_folders: false,
            day_label: String::new(),
        })
    }

    #[tokio::test]
    async fn round_trip_single_file() {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();

        let source = source_dir.path().join("IMG_1.CR2");
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&source, &payload).await.unwrap();
        let files = vec![OutgoingFile::from_path(&source).await.unwrap()];

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let naming = naming(dest_dir.path());

        let mut inbound_last = (0u64, 0u64);
        let mut started: Vec<String> = Vec::new();

        let inbound = run_inbound(
            &mut server,
            &naming,
            |header, dest| {
                started.push(format!("{}|{}", header.sender, dest.display()));
            },
            |received, total| inbound_last = (received, total),
        );
        let outbound = run_outbound(&mut client, "Ana", &files, None, |_, _| {}, |_| {});

        let (report, folder) = tokio::try_join!(inbound, outbound).unwrap();

        assert_eq!(report.sender, "Ana");
        assert_eq!(report.file_count, 1);
        assert_eq!(report.total_bytes, payload.len() as u64);
        assert_eq!(report.destination, dest_dir.path().join("01 - Ana"));
        assert_eq!(folder, report.destination.to_string_lossy());
        assert_eq!(started.len(), 1);
        assert_eq!(inbound_last, (payload.len() as u64, payload.len() as u64));

        let landed = tokio::fs::read(report.destination.join("IMG_1.CR2"))
            .await
            .unwrap();
        assert_eq!(landed, payload);
    }

    #[tokio::test]
    async fn folder_transfer_preserves_structure() {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();

        let shoot = source_dir.path().join("Shoot_Final");
        tokio::fs::create_dir_all(shoot.join("raw")).await.unwrap();
        tokio::fs::write(shoot.join("sel.jpg"), b"selected").await.unwrap();
        tokio::fs::write(shoot.join("raw/a.cr2"), b"raw bytes").await.unwrap();

        let (folder_name, files) = collect_folder(&shoot).await.unwrap();

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let naming = naming(dest_dir.path());

        let inbound = run_inbound(&mut server, &naming, |_, _| {}, |_, _| {});
        let outbound = run_outbound(
            &mut client,
            "Ana",
            &files,
            Some(folder_name.as_str()),
            |_, _| {},
            |_| {},
        );

        let (report, _) = tokio::try_join!(inbound, outbound).unwrap();

        assert!(report.is_folder_transfer);
        assert_eq!(report.destination, dest_dir.path().join("Shoot_Final"));
        let nested = tokio::fs::read(report.destination.join("raw/a.cr2"))
            .await
            .unwrap();
        assert_eq!(nested, b"raw bytes");
    }

    #[tokio::test]
    async fn checksum_mismatch_aborts_session() {
        let source_dir = TempDir::new().unwrap();
        let dest_dir = TempDir::new().unwrap();

        let source = source_dir.path().join("IMG_1.CR2");
        tokio::fs::write(&source, b"genuine bytes").await.unwrap();

        // Declare a digest that cannot match the bytes on the wire.
        let mut file = OutgoingFile::from_path(&source).await.unwrap();
        file.entry.checksum = "00000000000000000000000000000000".to_string();
        let files = vec![file];

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let naming = naming(dest_dir.path());

        let inbound = run_inbound(&mut server, &naming, |_, _| {}, |_, _| {});
        let outbound = run_outbound(&mut client, "Ana", &files, None, |_, _| {}, |_| {});

        let (inbound_result, outbound_result) = tokio::join!(inbound, outbound);

        assert!(matches!(
            inbound_result,
            Err(TransferError::ChecksumMismatch { .. })
        ));
        assert!(matches!(
            outbound_result,
            Err(TransferError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn non_ready_ack_aborts_sender() {
        let source_dir = TempDir::new().unwrap();
        let source = source_dir.path().join("IMG_1.CR2");
        tokio::fs::write(&source, b"bytes").await.unwrap();
        let files = vec![OutgoingFile::from_path(&source).await.unwrap()];

        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let receiver = async {
            let _header: TransferHeader = read_json_frame(&mut server).await?;
            write_json_frame(&mut server, &AckResponse::error("error: no base path")).await
        };
        let outbound = run_outbound(&mut client, "Ana", &files, None, |_, _| {}, |_| {});

        let (recv_result, send_result) = tokio::join!(receiver, outbound);
        recv_result.unwrap();

        match send_result {
            Err(TransferError::ServerNotReady(status)) => {
                assert_eq!(status, "error: no base path");
            }
            other => panic!("expected ServerNotReady, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn traversal_names_are_rejected() {
        let dest_dir = TempDir::new().unwrap();
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let naming = naming(dest_dir.path());

        let sender = async {
            let header = TransferHeader {
                sender: "mallory".to_string(),
                files: vec![FileManifestEntry {
                    name: "../escape.txt".to_string(),
                    size: 4,
                    checksum: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
                }],
                is_folder_transfer: false,
                folder_name: None,
            };
            write_json_frame(&mut client, &header).await?;
            let _ack: AckResponse = read_json_frame(&mut client).await?;
            Ok::<_, TransferError>(())
        };
        let inbound = run_inbound(&mut server, &naming, |_, _| {}, |_, _| {});

        let (send_result, inbound_result) = tokio::join!(sender, inbound);
        send_result.unwrap();

        assert!(matches!(inbound_result, Err(TransferError::Protocol(_))));
        assert!(!dest_dir.path().join("../escape.txt").exists());
    }

    #[test]
    fn wire_name_sanitizing() {
        assert!(sanitize_wire_name("IMG_1.CR2").is_ok());
        assert_eq!(
            sanitize_wire_name("raw/a.cr2").unwrap(),
            PathBuf::from("raw").join("a.cr2")
        );
        assert!(sanitize_wire_name("raw\\a.cr2").is_ok());
        assert!(sanitize_wire_name("../evil").is_err());
        assert!(sanitize_wire_name("/abs/path").is_err());
        assert!(sanitize_wire_name("").is_err());
    }
}
