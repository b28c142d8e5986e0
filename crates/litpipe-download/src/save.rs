//! Filename synthesis, checksum and saving.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use litpipe_core::record::ReferenceRecord;

/// Maximum characters of sanitized title in a filename.
const TITLE_LEN: usize = 50;

/// `<year>_<safe_title[:50]>.pdf`, keeping alphanumerics, space, dash and
/// underscore. Collisions overwrite, which is acceptable because the
/// checksum of what was actually kept is recorded.
pub fn synthesize_filename(record: &ReferenceRecord) -> String {
    let year = record
        .year
        .map(|y| y.to_string())
        .unwrap_or_else(|| "nd".to_string());
    let safe_title: String = record
        .title
        .as_deref()
        .unwrap_or("untitled")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .take(TITLE_LEN)
        .collect();
    let safe_title = safe_title.trim();
    if safe_title.is_empty() {
        format!("{year}_untitled.pdf")
    } else {
        format!("{year}_{safe_title}.pdf")
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write validated bytes into the corpus directory. A partial file is
/// removed if the write fails midway.
pub fn save_pdf(
    bytes: &[u8],
    record: &ReferenceRecord,
    target_dir: &Path,
) -> std::io::Result<(PathBuf, String)> {
    std::fs::create_dir_all(target_dir)?;
    let path = target_dir.join(synthesize_filename(record));
    if let Err(e) = std::fs::write(&path, bytes) {
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    Ok((path, sha256_hex(bytes)))
}
