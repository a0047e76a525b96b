//! Peer discovery and advertisement.
//!
//! Each running node registers one record under the `_phototransfer` mDNS
//! service category, carrying a `role` TXT property and, for editors, a
//! human display `name`. Watchers observe the category and receive the
//! full current snapshot of matching peers on every add or remove, never a
//! diff.
//!
//! The mDNS daemon delivers events on its own background thread; snapshots
//! are marshaled to the caller through a channel, so the consumer never
//! shares mutable state with the watcher.

use crate::{Result, TransferError};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Well-known service category all roles advertise under
pub const SERVICE_TYPE: &str = "_phototransfer._tcp.local.";

/// A peer's function in the network.
///
/// Photographer clients only browse; they never advertise a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Tagger,
    Editor,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Tagger => "tagger",
            PeerRole::Editor => "editor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tagger" => Some(PeerRole::Tagger),
            "editor" => Some(PeerRole::Editor),
            _ => None,
        }
    }
}

/// A discovered node. Ephemeral; created and removed by discovery events,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Opaque discovery key (the service's full name)
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub role: PeerRole,
    /// The `name` TXT property, or the service name when absent
    pub display_name: String,
}

impl PeerRecord {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Which records a watcher wants delivered.
#[derive(Debug, Clone)]
pub enum PeerFilter {
    /// Exact role match; used by file-sending clients
    Role(PeerRole),
    /// Editors only, excluding the record whose address equals this node's
    /// own address; used by nodes offering peer-to-peer folder sending
    EditorsExcept(String),
}

impl PeerFilter {
    pub fn matches(&self, peer: &PeerRecord) -> bool {
        match self {
            PeerFilter::Role(role) => peer.role == *role,
            PeerFilter::EditorsExcept(own_ip) => {
                peer.role == PeerRole::Editor && peer.ip != *own_ip
            }
        }
    }
}

/// Advertises this node and maintains a live view of the service category.
pub struct PeerDirectory {
    daemon: ServiceDaemon,
    registered: Option<String>,
}

impl PeerDirectory {
    /// Create the underlying mDNS daemon. Fails with
    /// [`TransferError::DiscoveryUnavailable`] when the multicast socket
    /// cannot be set up.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| TransferError::DiscoveryUnavailable(e.to_string()))?;
        Ok(Self {
            daemon,
            registered: None,
        })
    }

    /// Register one discoverable record for this process. Idempotent per
    /// process lifetime; reversed by [`shutdown`](Self::shutdown) or drop.
    pub fn advertise(
        &mut self,
        role: PeerRole,
        display_name: Option<&str>,
        ip: &str,
        port: u16,
    ) -> Result<()> {
        if self.registered.is_some() {
            return Ok(());
        }

        let instance = format!(
            "shutterlink-{}-{}",
            role.as_str(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let host = format!(
            "{}.local.",
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "shutterlink".to_string())
        );

        let mut properties = HashMap::new();
        properties.insert("role".to_string(), role.as_str().to_string());
        if let Some(name) = display_name {
            properties.insert("name".to_string(), name.to_string());
        }

        let info = ServiceInfo::new(SERVICE_TYPE, &instance, &host, ip, port, properties)
            .map_err(|e| TransferError::DiscoveryUnavailable(e.to_string()))?;
        let fullname = info.get_fullname().to_string();

        self.daemon
            .register(info)
            .map_err(|e| TransferError::DiscoveryUnavailable(e.to_string()))?;

        debug!("advertised {} on {}:{}", fullname, ip, port);
        self.registered = Some(fullname);
        Ok(())
    }

    /// Begin observing the service category. On every add or remove the
    /// filter is re-applied and the full filtered snapshot is sent on the
    /// returned channel.
    pub fn watch(&self, filter: PeerFilter) -> Result<mpsc::UnboundedReceiver<Vec<PeerRecord>>> {
        let browser = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| TransferError::DiscoveryUnavailable(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();

        // The mdns receiver blocks, so the watcher gets a plain thread; the
        // channel is the only thing shared with the caller's context.
        std::thread::spawn(move || {
            let mut peers: HashMap<String, PeerRecord> = HashMap::new();

            while let Ok(event) = browser.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let role = info
                            .get_properties()
                            .get("role")
                            .map(|v| v.val_str().to_string())
                            .unwrap_or_default();
                        let Some(role) = PeerRole::parse(&role) else {
                            debug!("ignoring record with unknown role: {}", info.get_fullname());
                            continue;
                        };

                        let Some(ip) = info.get_addresses().iter().next().map(|a| a.to_string())
                        else {
                            warn!("no address for service {}", info.get_fullname());
                            continue;
                        };

                        let display_name = info
                            .get_properties()
                            .get("name")
                            .map(|v| v.val_str().to_string())
                            .filter(|n| !n.is_empty())
                            .unwrap_or_else(|| info.get_fullname().to_string());

                        let record = PeerRecord {
                            id: info.get_fullname().to_string(),
                            ip,
                            port: info.get_port(),
                            role,
                            display_name,
                        };

                        debug!("resolved peer {} ({})", record.display_name, record.addr());
                        peers.insert(record.id.clone(), record);
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        debug!("peer removed: {}", fullname);
                        peers.remove(&fullname);
                    }
                    _ => continue,
                }

                let mut snapshot: Vec<PeerRecord> =
                    peers.values().filter(|p| filter.matches(p)).cloned().collect();
                snapshot.sort_by(|a, b| a.id.cmp(&b.id));

                if tx.send(snapshot).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Withdraw this node's record and stop the daemon.
    pub fn shutdown(&mut self) {
        if let Some(fullname) = self.registered.take() {
            let _ = self.daemon.unregister(&fullname);
        }
        let _ = self.daemon.shutdown();
    }
}

impl Drop for PeerDirectory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Best-effort local IP detection: the address a routed UDP socket binds to.
/// No packet is actually sent.
pub fn local_ip() -> Result<String> {
    use std::net::UdpSocket;

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("8.8.8.8:80")?;
    Ok(socket.local_addr()?.ip().to_string())
}
