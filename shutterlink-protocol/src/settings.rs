//! Settings contract consumed from the persistence collaborator.
//!
//! The engine does not load or save these itself; the surrounding
//! application owns that. The type is (de)serializable so any persistence
//! layer can round-trip it.

use crate::destination::NamingConfig;
use crate::peer::PeerRole;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node-level settings chosen by the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Display name shown to peers (editors advertise it)
    pub display_name: String,
    pub role: PeerRole,
    /// Base directory all destinations resolve under
    pub base_path: PathBuf,
    #[serde(default = "default_template")]
    pub folder_template: String,
    /// Day organization; only taggers bucket by day
    #[serde(default = "default_true")]
    pub use_day_folders: bool,
    /// Numbering restarts per day bucket. Carried for the settings surface;
    /// the scan-based numbering already scopes to the day bucket.
    #[serde(default = "default_true")]
    pub reset_numbering_daily: bool,
    #[serde(default = "default_day_prefix")]
    pub day_prefix: String,
    #[serde(default = "default_current_day")]
    pub current_day: String,
}

fn default_template() -> String {
    "{num:02d} - {name}".to_string()
}

fn default_true() -> bool {
    true
}

fn default_day_prefix() -> String {
    "DAY".to_string()
}

fn default_current_day() -> String {
    "DAY 1".to_string()
}

impl NodeSettings {
    /// Naming parameters for the destination resolver. Day buckets apply
    /// only when this node is a tagger with day organization on.
    pub fn naming(&self) -> NamingConfig {
        NamingConfig {
            base_path: self.base_path.clone(),
            template: self.folder_template.clone(),
            use_day_folders: self.role == PeerRole::Tagger && self.use_day_folders,
            day_label: self.current_day.clone(),
        }
    }

    /// Day label recorded into history entries, when day organization is
    /// active.
    pub fn history_day(&self) -> Option<String> {
        if self.role == PeerRole::Tagger && self.use_day_folders {
            Some(self.current_day.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let raw = r#"{"display_name":"Ana","role":"editor","base_path":"/data/urgent"}"#;
        let settings: NodeSettings = serde_json::from_str(raw).unwrap();

        assert_eq!(settings.folder_template, "{num:02d} - {name}");
        assert!(settings.use_day_folders);
        assert_eq!(settings.day_prefix, "DAY");
        assert_eq!(settings.current_day, "DAY 1");
    }

    #[test]
    fn editors_never_bucket_by_day() {
        let settings = NodeSettings {
            display_name: "Ana".to_string(),
            role: PeerRole::Editor,
            base_path: PathBuf::from("/data/urgent"),
            folder_template: default_template(),
            use_day_folders: true,
            reset_numbering_daily: true,
            day_prefix: default_day_prefix(),
            current_day: default_current_day(),
        };

        assert!(!settings.naming().use_day_folders);
        assert!(settings.history_day().is_none());
    }

    #[test]
    fn tagger_day_bucketing_flows_through() {
        let settings = NodeSettings {
            display_name: String::new(),
            role: PeerRole::Tagger,
            base_path: PathBuf::from("/data/raws"),
            folder_template: default_template(),
            use_day_folders: true,
            reset_numbering_daily: true,
            day_prefix: default_day_prefix(),
            current_day: "DAY 3".to_string(),
        };

        let naming = settings.naming();
        assert!(naming.use_day_folders);
        assert_eq!(naming.day_label, "DAY 3");
        assert_eq!(settings.history_day().as_deref(), Some("DAY 3"));
    }
}
