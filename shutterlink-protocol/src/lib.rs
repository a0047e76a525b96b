//! Shutterlink transfer engine.
//!
//! Non-UI core for moving media batches between machines on a local
//! network: mDNS peer discovery by role, a length-prefixed TCP transfer
//! protocol with per-file integrity checking, templated destination-folder
//! naming, and same-day duplicate-send tracking. The surrounding
//! application supplies a display name, a base directory, naming
//! preferences, and file lists; it reads back peer snapshots, session
//! registries, and completed-transfer history.

pub mod coordinator;
pub mod destination;
pub mod duplicates;
pub mod history;
pub mod manifest;
pub mod media;
pub mod peer;
pub mod session;
pub mod settings;
pub mod transfer;
pub mod wire;

mod error;

pub use coordinator::{
    TransferCoordinator, TransferEvent, INBOUND_EVICT_DELAY, OUTBOUND_EVICT_DELAY,
};
pub use destination::{
    format_name, next_sequence_number, resolve_destination, resolve_folder_destination,
    NamingConfig, DEFAULT_TEMPLATES,
};
pub use duplicates::{file_key, DuplicateGuard, DuplicateMatch, DuplicateResolution, SentRecord};
pub use error::{Result, TransferError};
pub use history::{HistoryEntry, TransferHistory, MAX_HISTORY_ENTRIES};
pub use manifest::{checksum_file, collect_folder, OutgoingFile};
pub use media::{collect_media_files, is_media_file, MEDIA_EXTENSIONS};
pub use peer::{local_ip, PeerDirectory, PeerFilter, PeerRecord, PeerRole, SERVICE_TYPE};
pub use session::{
    format_eta, InboundSession, InboundStatus, OutboundSession, OutboundStatus, SpeedTracker,
    PROGRESS_INTERVAL,
};
pub use settings::NodeSettings;
pub use transfer::{connect, run_inbound, run_outbound, InboundReport};
pub use wire::{
    AckResponse, FileManifestEntry, TransferHeader, CHUNK_SIZE, FILE_ACK_CHECKSUM_ERROR,
    FILE_ACK_OK, TRANSFER_PORT,
};
