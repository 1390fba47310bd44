//! Segment file naming conventions.
//!
//! Segment files are named `<id><ext>` (e.g. `7.seg`) inside the WAL
//! directory. The numeric id is the roster sort key: `10.seg` is newer
//! than `2.seg`, so ids are parsed and ordered as integers, never as
//! strings.

use std::io;
use std::path::{Path, PathBuf};

/// Generate a segment file path, e.g. `<dir>/7.seg`.
pub fn segment_file_path(dir: &Path, id: u64, extension: &str) -> PathBuf {
    dir.join(format!("{}{}", id, extension))
}

/// Parse a segment file basename and return its numeric id.
///
/// Returns `None` if the name doesn't end with `extension` or its stem
/// is not a plain decimal integer.
pub fn parse_segment_file_name(name: &str, extension: &str) -> Option<u64> {
    let stem = name.strip_suffix(extension)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// List all segment files in `dir`, sorted by numeric id ascending.
///
/// Non-recursive. Directories and files that don't parse as segment
/// names are reported through `skipped` so the caller can log them.
pub fn list_segment_files(
    dir: &Path,
    extension: &str,
    skipped: &mut Vec<PathBuf>,
) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut segments = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        let name = entry.file_name();
        match name.to_str().and_then(|n| parse_segment_file_name(n, extension)) {
            Some(id) => segments.push((id, path)),
            None => skipped.push(path),
        }
    }

    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

/// Create directory if it doesn't exist.
pub fn create_dir_if_missing(path: &Path) -> io::Result<()> {
    match std::fs::create_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
