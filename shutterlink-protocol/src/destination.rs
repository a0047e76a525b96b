//! Destination folder naming.
//!
//! Turns a template + sender name + sequence number + current time into a
//! concrete destination folder. Sequence numbers are derived by scanning
//! the scope directory at request time, so numbering survives restarts
//! without a persisted counter. Concurrent resolutions against the same
//! scope must be serialized by the caller (the coordinator holds a lock
//! around resolution).

use crate::{Result, TransferError};
use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Built-in folder naming templates offered to pickers.
pub const DEFAULT_TEMPLATES: &[&str] = &[
    "{num:02d} - {name}",
    "{name}_{num:03d}",
    "{num:02d}_{name}",
    "{date}_{num:02d} - {name}",
    "{name}_{date}_{time}",
    "{name}",
];

static NUM_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{num(?::(\d+)d)?\}").expect("valid literal regex"));

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid literal regex"));

/// Naming parameters consumed from the settings collaborator.
#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub base_path: PathBuf,
    pub template: String,
    /// When on, destinations nest under `base_path/day_label` and numbering
    /// is scoped to that day bucket.
    pub use_day_folders: bool,
    pub day_label: String,
}

impl NamingConfig {
    /// The directory whose subfolders define the current numbering scope.
    pub fn scope_dir(&self) -> PathBuf {
        if self.use_day_folders {
            self.base_path.join(&self.day_label)
        } else {
            self.base_path.clone()
        }
    }
}

/// Substitute template variables. `{name}` is copied verbatim, `{date}` is
/// `YYYY-MM-DD`, `{time}` is `HH-MM`, `{num}` / `{num:NNd}` is the sequence
/// number, zero-padded to NN digits when a width is given. Unknown braces
/// pass through literally.
pub fn format_name(template: &str, name: &str, num: u32, now: &DateTime<Local>) -> String {
    let result = template
        .replace("{name}", name)
        .replace("{date}", &now.format("%Y-%m-%d").to_string())
        .replace("{time}", &now.format("%H-%M").to_string());

    NUM_PATTERN
        .replace_all(&result, |caps: &regex::Captures<'_>| match caps.get(1) {
            Some(width) => {
                let digits: usize = width.as_str().parse().unwrap_or(0);
                format!("{:0width$}", num, width = digits)
            }
            None => num.to_string(),
        })
        .into_owned()
}

/// Next sequence number for a scope directory: one more than the largest
/// run of decimal digits found in any immediate subdirectory name. Creates
/// the scope (returning 1) when it does not exist yet.
pub fn next_sequence_number(scope: &Path) -> Result<u32> {
    if !scope.exists() {
        std::fs::create_dir_all(scope).map_err(|e| TransferError::FolderCreation {
            path: scope.to_path_buf(),
            source: e,
        })?;
        return Ok(1);
    }

    let mut max_num: u32 = 0;
    for entry in std::fs::read_dir(scope)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        for run in DIGIT_RUN.find_iter(&name.to_string_lossy()) {
            if let Ok(num) = run.as_str().parse::<u32>() {
                max_num = max_num.max(num);
            }
        }
    }

    Ok(max_num + 1)
}

/// Resolve and create the destination folder for a templated transfer.
pub fn resolve_destination(config: &NamingConfig, sender: &str) -> Result<PathBuf> {
    let scope = config.scope_dir();
    let num = next_sequence_number(&scope)?;
    let name = format_name(&config.template, sender, num, &Local::now());
    let dest = scope.join(name);

    std::fs::create_dir_all(&dest).map_err(|e| TransferError::FolderCreation {
        path: dest.clone(),
        source: e,
    })?;
    Ok(dest)
}

/// Resolve the destination for a folder transfer: the sender-supplied
/// folder name directly under the base path, bypassing templating and
/// numbering. Repeated sends with the same name merge into the same
/// destination.
pub fn resolve_folder_destination(base_path: &Path, folder_name: &str) -> Result<PathBuf> {
    let dest = base_path.join(folder_name);
    std::fs::create_dir_all(&dest).map_err(|e| TransferError::FolderCreation {
        path: dest.clone(),
        source: e,
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 15, 14, 30, 0).unwrap()
    }

    #[test]
    fn format_substitutes_all_variables() {
        let now = fixed_now();
        assert_eq!(format_name("{num:02d} - {name}", "Ana", 1, &now), "01 - Ana");
        assert_eq!(format_name("{name}_{num:03d}", "Mihai", 7, &now), "Mihai_007");
        assert_eq!(
            format_name("{date}_{num:02d} - {name}", "Ana", 12, &now),
            "2024-01-15_12 - Ana"
        );
        assert_eq!(
            format_name("{name}_{date}_{time}", "Ana", 1, &now),
            "Ana_2024-01-15_14-30"
        );
        assert_eq!(format_name("{num}", "Ana", 42, &now), "42");
    }

    #[test]
    fn format_is_deterministic_for_fixed_now() {
        let now = fixed_now();
        let a = format_name("{name}_{date}_{time}_{num:04d}", "Toni", 3, &now);
        let b = format_name("{name}_{date}_{time}_{num:04d}", "Toni", 3, &now);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_braces_pass_through() {
        let now = fixed_now();
        assert_eq!(format_name("{foo}/{name}", "Ana", 1, &now), "{foo}/Ana");
    }

    #[test]
    fn sequence_starts_at_one_for_missing_scope() {
        let temp = TempDir::new().unwrap();
        let scope = temp.path().join("DAY 1");

        assert_eq!(next_sequence_number(&scope).unwrap(), 1);
        // The scope is created as a side effect.
        assert!(scope.is_dir());
    }

    #[test]
    fn sequence_is_max_digit_run_plus_one() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("01 - Ana")).unwrap();
        std::fs::create_dir(temp.path().join("03_Mihai")).unwrap();

        assert_eq!(next_sequence_number(temp.path()).unwrap(), 4);
    }

    #[test]
    fn sequence_ignores_plain_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("02 - Ana")).unwrap();
        std::fs::write(temp.path().join("99.txt"), b"x").unwrap();

        assert_eq!(next_sequence_number(temp.path()).unwrap(), 3);
    }

    #[test]
    fn resolve_creates_templated_folder() {
        let temp = TempDir::new().unwrap();
        let config = NamingConfig {
            base_path: temp.path().to_path_buf(),
            template: "{num:02d} - {name}".to_string(),
            use_day_folders: false,
            day_label: String::new(),
        };

        let dest = resolve_destination(&config, "Ana").unwrap();
        assert_eq!(dest, temp.path().join("01 - Ana"));
        assert!(dest.is_dir());

        // The created folder bumps the next sequence number.
        let dest = resolve_destination(&config, "Mihai").unwrap();
        assert_eq!(dest, temp.path().join("02 - Mihai"));
    }

    #[test]
    fn resolve_nests_under_day_bucket() {
        let temp = TempDir::new().unwrap();
        let config = NamingConfig {
            base_path: temp.path().to_path_buf(),
            template: "{num:02d} - {name}".to_string(),
            use_day_folders: true,
            day_label: "DAY 2".to_string(),
        };

        let dest = resolve_destination(&config, "Ana").unwrap();
        assert_eq!(dest, temp.path().join("DAY 2").join("01 - Ana"));
    }

    #[test]
    fn folder_destination_reuses_existing() {
        let temp = TempDir::new().unwrap();

        let first = resolve_folder_destination(temp.path(), "Shoot_Final").unwrap();
        let second = resolve_folder_destination(temp.path(), "Shoot_Final").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }
}
