//! Media file filter.
//!
//! Fixed allow-list of raw-image, image, and video extensions used when a
//! dropped or selected folder is enumerated for sending. Matching is
//! case-insensitive.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Eligible extensions, lowercase, without the leading dot.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    // RAW - Canon
    "cr2", "cr3", "crw",
    // RAW - Nikon
    "nef", "nrw",
    // RAW - Sony
    "arw", "srf", "sr2",
    // RAW - Fujifilm
    "raf",
    // RAW - Panasonic/Leica
    "rw2", "rwl",
    // RAW - Olympus/OM System
    "orf",
    // RAW - Pentax
    "pef", "ptx",
    // RAW - Samsung
    "srw",
    // RAW - Hasselblad
    "3fr", "fff",
    // RAW - Phase One
    "iiq",
    // RAW - Sigma
    "x3f",
    // RAW - GoPro
    "gpr",
    // RAW - Adobe/generic
    "dng", "raw",
    // Images
    "jpg", "jpeg", "png", "tiff", "tif", "heic", "heif", "webp", "bmp", "gif",
    // Video
    "mp4", "mov", "avi", "mkv", "mxf", "m4v", "wmv",
    // Professional video RAW
    "braw", "r3d", "crm",
];

/// True when the path's extension is on the allow-list.
pub fn is_media_file(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Recursively collect all media files under `folder`, sorted by path.
pub fn collect_media_files(folder: impl AsRef<Path>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(folder.as_ref())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_media_file(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}
