//! Manifest construction on the sending side.
//!
//! A manifest entry is immutable once computed; the sender reads each file
//! exactly once to produce its MD5 digest, before any network I/O starts.

use crate::wire::{FileManifestEntry, CHUNK_SIZE};
use crate::{Result, TransferError};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

/// A local file paired with its manifest entry.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    /// Absolute path to read bytes from
    pub path: PathBuf,
    /// Entry as it will appear in the session header
    pub entry: FileManifestEntry,
}

impl OutgoingFile {
    /// Build an entry for a single file; the wire name is the file name.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::Protocol(format!("invalid file name: {}", path.display())))?
            .to_string();
        Self::with_wire_name(path, name).await
    }

    /// Build an entry whose wire name is given explicitly (used for folder
    /// transfers, where the name carries the relative sub-path).
    pub async fn with_wire_name(path: impl AsRef<Path>, name: String) -> Result<Self> {
        let path = path.as_ref();
        let size = tokio::fs::metadata(path).await?.len();
        let checksum = checksum_file(path).await?;

        Ok(Self {
            path: path.to_path_buf(),
            entry: FileManifestEntry { name, size, checksum },
        })
    }
}

/// Compute the lowercase MD5 hex digest of a file, reading it in chunks.
pub async fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = File::open(path.as_ref()).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Collect every file under `folder` recursively, with wire names relative
/// to the folder (`/`-separated), sorted by name. Returns the folder's own
/// name alongside, to be preserved on the receiving side.
pub async fn collect_folder(folder: impl AsRef<Path>) -> Result<(String, Vec<OutgoingFile>)> {
    let folder = folder.as_ref();
    let folder_name = folder
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            TransferError::Protocol(format!("invalid folder name: {}", folder.display()))
        })?
        .to_string();

    let mut paths = Vec::new();
    for entry in WalkDir::new(folder).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(folder)
                .map_err(|_| TransferError::Protocol("path outside folder".to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            paths.push((entry.path().to_path_buf(), name));
        }
    }

    if paths.is_empty() {
        return Err(TransferError::Protocol(format!(
            "folder is empty: {}",
            folder.display()
        )));
    }

    paths.sort_by(|a, b| a.1.cmp(&b.1));

    let mut files = Vec::with_capacity(paths.len());
    for (path, name) in paths {
        files.push(OutgoingFile::with_wire_name(&path, name).await?);
    }

    Ok((folder_name, files))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn checksum_matches_known_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let digest = checksum_file(&path).await.unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[tokio::test]
    async fn from_path_records_name_and_size() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("IMG_1.CR2");
        tokio::fs::write(&path, vec![0u8; 1024]).await.unwrap();

        let file = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(file.entry.name, "IMG_1.CR2");
        assert_eq!(file.entry.size, 1024);
        assert_eq!(file.entry.checksum.len(), 32);
    }

    #[tokio::test]
    async fn collect_folder_preserves_sub_paths() {
        let temp = TempDir::new().unwrap();
        let shoot = temp.path().join("Shoot_Final");
        tokio::fs::create_dir_all(shoot.join("raw")).await.unwrap();
        tokio::fs::write(shoot.join("b.jpg"), b"jpeg").await.unwrap();
        tokio::fs::write(shoot.join("raw/a.cr2"), b"raw bytes").await.unwrap();

        let (name, files) = collect_folder(&shoot).await.unwrap();
        assert_eq!(name, "Shoot_Final");

        let names: Vec<&str> = files.iter().map(|f| f.entry.name.as_str()).collect();
        assert_eq!(names, vec!["b.jpg", "raw/a.cr2"]);
    }

    #[tokio::test]
    async fn collect_empty_folder_fails() {
        let temp = TempDir::new().unwrap();
        let empty = temp.path().join("empty");
        tokio::fs::create_dir(&empty).await.unwrap();

        let err = collect_folder(&empty).await.unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }
}
