//! Session records and progress sampling.
//!
//! Session records are owned by the handler task that created them and
//! mirrored into the coordinator registries for the reporting layer to
//! snapshot. Speed and ETA are advisory and never affect protocol
//! correctness.

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Minimum wall-clock interval between progress samples
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

/// Inbound session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundStatus {
    Transferring,
    Done,
    Failed(String),
}

/// Outbound session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundStatus {
    Preparing,
    Connecting,
    Sending,
    Done,
    Failed(String),
}

/// One accepted connection's transfer, as seen by the reporting layer.
#[derive(Debug, Clone)]
pub struct InboundSession {
    /// Peer address string
    pub id: String,
    pub sender: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub received_bytes: u64,
    pub status: InboundStatus,
    pub destination: Option<PathBuf>,
    pub started_at: Instant,
    pub speed_bps: f64,
    pub eta: String,
}

impl InboundSession {
    pub fn new(id: String) -> Self {
        Self {
            id,
            sender: String::new(),
            file_count: 0,
            total_bytes: 0,
            received_bytes: 0,
            status: InboundStatus::Transferring,
            destination: None,
            started_at: Instant::now(),
            speed_bps: 0.0,
            eta: String::new(),
        }
    }
}

/// One outbound send request.
#[derive(Debug, Clone)]
pub struct OutboundSession {
    /// Random short token
    pub id: String,
    /// Folder name being sent, or a files summary
    pub folder_label: String,
    pub destination_name: String,
    pub sent_bytes: u64,
    pub total_bytes: u64,
    pub status: OutboundStatus,
}

impl OutboundSession {
    pub fn new(folder_label: String, destination_name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            folder_label,
            destination_name,
            sent_bytes: 0,
            total_bytes: 0,
            status: OutboundStatus::Preparing,
        }
    }
}

/// Format a remaining-seconds estimate: whole seconds, or minutes plus
/// seconds above one minute.
pub fn format_eta(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else {
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

/// Throttled speed/ETA sampler: at most one sample per
/// [`PROGRESS_INTERVAL`], speed averaged over the whole session.
#[derive(Debug)]
pub struct SpeedTracker {
    started: Instant,
    last_sample: Option<Instant>,
}

impl SpeedTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_sample: None,
        }
    }

    /// Returns `(bytes_per_second, eta_label)` when enough wall-clock time
    /// has passed since the previous sample, `None` otherwise.
    pub fn sample(&mut self, transferred: u64, total: u64) -> Option<(f64, String)> {
        let now = Instant::now();
        if let Some(last) = self.last_sample {
            if now.duration_since(last) < PROGRESS_INTERVAL {
                return None;
            }
        }
        self.last_sample = Some(now);

        let elapsed = now.duration_since(self.started).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }

        let speed = transferred as f64 / elapsed;
        let eta = if speed > 0.0 && total > transferred {
            format_eta(((total - transferred) as f64 / speed) as u64)
        } else {
            String::new()
        };

        Some((speed, eta))
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_label_formats() {
        assert_eq!(format_eta(0), "0s");
        assert_eq!(format_eta(42), "42s");
        assert_eq!(format_eta(60), "1m 0s");
        assert_eq!(format_eta(133), "2m 13s");
    }

    #[test]
    fn tracker_reports_first_sample_then_throttles() {
        let mut tracker = SpeedTracker::new();
        std::thread::sleep(Duration::from_millis(10));

        let first = tracker.sample(1024, 4096);
        assert!(first.is_some());
        let (speed, eta) = first.unwrap();
        assert!(speed > 0.0);
        assert!(!eta.is_empty());

        // Immediately after, the interval has not elapsed.
        assert!(tracker.sample(2048, 4096).is_none());
    }

    #[test]
    fn tracker_omits_eta_when_complete() {
        let mut tracker = SpeedTracker::new();
        std::thread::sleep(Duration::from_millis(10));

        let (_, eta) = tracker.sample(4096, 4096).unwrap();
        assert!(eta.is_empty());
    }

    #[test]
    fn outbound_ids_are_short_tokens() {
        let session = OutboundSession::new("Shoot_Final".to_string(), "Ana".to_string());
        assert_eq!(session.id.len(), 8);
        assert_eq!(session.status, OutboundStatus::Preparing);
    }
}
