//! Transfer coordination.
//!
//! Owns the registries of active inbound and outbound sessions, runs the
//! accept loop, dispatches one task per connection, and emits progress and
//! completion events. The registries are the only state the UI layer reads;
//! readers always get snapshot copies, and all mutation goes through the
//! coordinator's own methods. Registry locks are held only for map access,
//! never across I/O.

use crate::destination::NamingConfig;
use crate::duplicates::DuplicateGuard;
use crate::history::{HistoryEntry, TransferHistory};
use crate::manifest::{collect_folder, OutgoingFile};
use crate::peer::PeerRecord;
use crate::session::{
    InboundSession, InboundStatus, OutboundSession, OutboundStatus, SpeedTracker,
};
use crate::transfer::{connect, run_inbound, run_outbound};
use crate::Result;
use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long a finished inbound session stays visible in the registry
pub const INBOUND_EVICT_DELAY: Duration = Duration::from_secs(10);

/// How long a finished outbound session stays visible in the registry
pub const OUTBOUND_EVICT_DELAY: Duration = Duration::from_secs(5);

/// Progress and completion notifications for the consuming layer.
///
/// Delivered on an unbounded channel; the consumer drains it on its own
/// context and never shares state with the handler tasks.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    InboundStarted {
        id: String,
        sender: String,
        file_count: usize,
        total_bytes: u64,
        destination: PathBuf,
    },
    InboundProgress {
        id: String,
        received: u64,
        total: u64,
        speed_bps: f64,
        eta: String,
    },
    InboundCompleted {
        id: String,
        destination: PathBuf,
    },
    InboundFailed {
        id: String,
        reason: String,
    },
    OutboundStatusChanged {
        id: String,
        status: OutboundStatus,
    },
    OutboundProgress {
        id: String,
        sent: u64,
        total: u64,
        speed_bps: f64,
        eta: String,
    },
}

struct Inner {
    /// Naming parameters; the lock also serializes destination resolution
    naming: tokio::sync::Mutex<NamingConfig>,
    inbound: RwLock<HashMap<String, InboundSession>>,
    outbound: RwLock<HashMap<String, OutboundSession>>,
    history: Mutex<TransferHistory>,
    /// Day label recorded into history entries, when day organization is on
    history_day: RwLock<Option<String>>,
    event_tx: mpsc::UnboundedSender<TransferEvent>,
}

impl Inner {
    fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event);
    }

    fn update_inbound(&self, id: &str, f: impl FnOnce(&mut InboundSession)) {
        if let Ok(mut inbound) = self.inbound.write() {
            if let Some(session) = inbound.get_mut(id) {
                f(session);
            }
        }
    }

    fn update_outbound(&self, id: &str, f: impl FnOnce(&mut OutboundSession)) {
        if let Ok(mut outbound) = self.outbound.write() {
            if let Some(session) = outbound.get_mut(id) {
                f(session);
            }
        }
    }

    fn set_outbound_status(&self, id: &str, status: OutboundStatus) {
        self.update_outbound(id, |s| s.status = status.clone());
        self.emit(TransferEvent::OutboundStatusChanged {
            id: id.to_string(),
            status,
        });
    }
}

/// Runs the accept loop and owns all session state.
#[derive(Clone)]
pub struct TransferCoordinator {
    inner: Arc<Inner>,
}

impl TransferCoordinator {
    /// Create a coordinator and the event receiver for the consuming layer.
    pub fn new(
        naming: NamingConfig,
        history_path: impl Into<PathBuf>,
        history_day: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            inner: Arc::new(Inner {
                naming: tokio::sync::Mutex::new(naming),
                inbound: RwLock::new(HashMap::new()),
                outbound: RwLock::new(HashMap::new()),
                history: Mutex::new(TransferHistory::load(history_path)),
                history_day: RwLock::new(history_day),
                event_tx,
            }),
        };
        (coordinator, event_rx)
    }

    /// Replace the naming configuration (e.g. after a day change).
    pub async fn set_naming(&self, naming: NamingConfig, history_day: Option<String>) {
        *self.inner.naming.lock().await = naming;
        if let Ok(mut day) = self.inner.history_day.write() {
            *day = history_day;
        }
    }

    /// Run the accept loop forever. Each accepted connection gets its own
    /// handler task; handler failures never reach this loop.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!(
            "accepting transfers on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_default()
        );

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay failed for {}: {}", addr, e);
                    }
                    let inner = self.inner.clone();
                    tokio::spawn(async move {
                        handle_inbound(inner, stream, addr.to_string()).await;
                    });
                }
                Err(e) => {
                    // Transient accept failures must not kill the loop.
                    warn!("accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Queue an outbound send of individual files. Duplicate policy is the
    /// caller's: it must have resolved duplicates before calling. When a
    /// guard is given, each file is recorded as sent the moment its
    /// acknowledgement arrives. Returns the outbound session id.
    pub fn send_files(
        &self,
        target: &PeerRecord,
        sender_name: &str,
        paths: Vec<PathBuf>,
        guard: Option<Arc<Mutex<DuplicateGuard>>>,
    ) -> String {
        let label = format!("{} files", paths.len());
        self.spawn_outbound(
            target,
            sender_name.to_string(),
            label,
            Source::Files(paths),
            guard,
        )
    }

    /// Queue an outbound folder transfer: the folder's structure and name
    /// are preserved on the receiving side. Folder transfers never consult
    /// the duplicate log. Returns the outbound session id.
    pub fn send_folder(&self, target: &PeerRecord, sender_name: &str, folder: PathBuf) -> String {
        let label = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| folder.to_string_lossy().into_owned());
        self.spawn_outbound(
            target,
            sender_name.to_string(),
            label,
            Source::Folder(folder),
            None,
        )
    }

    fn spawn_outbound(
        &self,
        target: &PeerRecord,
        sender_name: String,
        label: String,
        source: Source,
        guard: Option<Arc<Mutex<DuplicateGuard>>>,
    ) -> String {
        let session = OutboundSession::new(label, target.display_name.clone());
        let id = session.id.clone();

        if let Ok(mut outbound) = self.inner.outbound.write() {
            outbound.insert(id.clone(), session);
        }
        self.inner.emit(TransferEvent::OutboundStatusChanged {
            id: id.clone(),
            status: OutboundStatus::Preparing,
        });

        let inner = self.inner.clone();
        let addr = target.addr();
        let target_key = target.display_name.clone();
        let session_id = id.clone();

        tokio::spawn(async move {
            let result =
                run_send(&inner, &session_id, &addr, &sender_name, source, &target_key, guard)
                    .await;

            let status = match result {
                Ok(()) => OutboundStatus::Done,
                Err(e) => {
                    warn!("outbound session {} failed: {}", session_id, e);
                    OutboundStatus::Failed(e.to_string())
                }
            };
            inner.set_outbound_status(&session_id, status);

            tokio::time::sleep(OUTBOUND_EVICT_DELAY).await;
            if let Ok(mut outbound) = inner.outbound.write() {
                outbound.remove(&session_id);
            }
        });

        id
    }

    /// Snapshot of the active inbound sessions.
    pub fn inbound_sessions(&self) -> Vec<InboundSession> {
        self.inner
            .inbound
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the active outbound sessions.
    pub fn outbound_sessions(&self) -> Vec<OutboundSession> {
        self.inner
            .outbound
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the completed-transfer history, newest first.
    pub fn history_entries(&self) -> Vec<HistoryEntry> {
        self.inner
            .history
            .lock()
            .map(|h| h.entries().to_vec())
            .unwrap_or_default()
    }
}

enum Source {
    Files(Vec<PathBuf>),
    Folder(PathBuf),
}

/// The body of one outbound task: prepare, connect, stream.
async fn run_send(
    inner: &Inner,
    id: &str,
    addr: &str,
    sender_name: &str,
    source: Source,
    target_key: &str,
    guard: Option<Arc<Mutex<DuplicateGuard>>>,
) -> Result<()> {
    // Preparing: manifest with checksums, one full read per file.
    let (folder_name, files) = match source {
        Source::Files(paths) => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                files.push(OutgoingFile::from_path(path).await?);
            }
            (None, files)
        }
        Source::Folder(folder) => {
            let (name, files) = collect_folder(&folder).await?;
            (Some(name), files)
        }
    };

    let total_bytes: u64 = files.iter().map(|f| f.entry.size).sum();
    inner.update_outbound(id, |s| s.total_bytes = total_bytes);

    inner.set_outbound_status(id, OutboundStatus::Connecting);
    let mut stream = connect(addr).await?;

    inner.set_outbound_status(id, OutboundStatus::Sending);

    let mut tracker = SpeedTracker::new();
    run_outbound(
        &mut stream,
        sender_name,
        &files,
        folder_name.as_deref(),
        |sent, total| {
            inner.update_outbound(id, |s| s.sent_bytes = sent);
            if let Some((speed_bps, eta)) = tracker.sample(sent, total) {
                inner.emit(TransferEvent::OutboundProgress {
                    id: id.to_string(),
                    sent,
                    total,
                    speed_bps,
                    eta,
                });
            }
        },
        |file| {
            if let Some(guard) = &guard {
                if let Ok(mut guard) = guard.lock() {
                    if let Err(e) = guard.record_sent(&file.entry.name, file.entry.size, target_key)
                    {
                        warn!("cannot record sent file {}: {}", file.entry.name, e);
                    }
                }
            }
        },
    )
    .await?;

    Ok(())
}

/// The body of one inbound handler task. All failures terminate in a
/// `Failed(reason)` status on this session's record only.
async fn handle_inbound(inner: Arc<Inner>, mut stream: tokio::net::TcpStream, id: String) {
    debug!("connection from {}", id);

    if let Ok(mut inbound) = inner.inbound.write() {
        inbound.insert(id.clone(), InboundSession::new(id.clone()));
    }

    let mut tracker = SpeedTracker::new();
    let result = run_inbound(
        &mut stream,
        &inner.naming,
        |header, destination| {
            inner.update_inbound(&id, |session| {
                session.sender = header.sender.clone();
                session.file_count = header.files.len();
                session.total_bytes = header.total_bytes();
                session.destination = Some(destination.to_path_buf());
            });
            inner.emit(TransferEvent::InboundStarted {
                id: id.clone(),
                sender: header.sender.clone(),
                file_count: header.files.len(),
                total_bytes: header.total_bytes(),
                destination: destination.to_path_buf(),
            });
        },
        |received, total| {
            if let Some((speed_bps, eta)) = tracker.sample(received, total) {
                inner.update_inbound(&id, |session| {
                    session.received_bytes = received;
                    session.speed_bps = speed_bps;
                    session.eta = eta.clone();
                });
                inner.emit(TransferEvent::InboundProgress {
                    id: id.clone(),
                    received,
                    total,
                    speed_bps,
                    eta,
                });
            }
        },
    )
    .await;

    match result {
        Ok(report) => {
            inner.update_inbound(&id, |session| {
                session.status = InboundStatus::Done;
                session.received_bytes = report.total_bytes;
            });

            let day = inner.history_day.read().ok().and_then(|d| (*d).clone());
            let entry = HistoryEntry {
                timestamp: Local::now(),
                sender: report.sender.clone(),
                file_count: report.file_count,
                total_size: report.total_bytes,
                folder: report.destination.to_string_lossy().into_owned(),
                day,
            };
            if let Ok(mut history) = inner.history.lock() {
                if let Err(e) = history.add(entry) {
                    warn!("cannot persist history: {}", e);
                }
            }

            inner.emit(TransferEvent::InboundCompleted {
                id: id.clone(),
                destination: report.destination,
            });
        }
        Err(e) => {
            warn!("inbound session {} failed: {}", id, e);
            inner.update_inbound(&id, |session| {
                session.status = InboundStatus::Failed(e.to_string());
            });
            inner.emit(TransferEvent::InboundFailed {
                id: id.clone(),
                reason: e.to_string(),
            });
        }
    }

    tokio::time::sleep(INBOUND_EVICT_DELAY).await;
    if let Ok(mut inbound) = inner.inbound.write() {
        inbound.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_delays() {
        assert_eq!(INBOUND_EVICT_DELAY, Duration::from_secs(10));
        assert_eq!(OUTBOUND_EVICT_DELAY, Duration::from_secs(5));
    }
}
