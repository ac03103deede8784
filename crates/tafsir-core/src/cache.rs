//! On-disk layout for everything the player remembers between runs.
//!
//! Files live under a single root (`.cache/` by default): per-chapter
//! progress records, content API snapshots and the notification token list.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_CACHE_DIR: &str = ".cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    root: PathBuf,
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.root.join("progress")
    }

    pub fn progress_path(&self, chapter_id: u32) -> PathBuf {
        self.progress_dir().join(format!("chapter-{chapter_id}.toml"))
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.root.join("notifications").join("tokens.json")
    }
}

/// Hex SHA-256 over the given parts, separated so `["ab","c"]` and
/// `["a","bc"]` hash differently.
pub fn signature<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Write through a sibling temp file and rename so readers never observe a
/// half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = unique_temp_path(path);
    fs::write(&temp_path, contents)?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

fn unique_temp_path(path: &Path) -> PathBuf {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    let ts_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut temp_name = path
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("cache")
        .to_string();
    temp_name.push_str(&format!(".tmp-{ts_nanos}-{nonce}"));
    path.with_file_name(temp_name)
}

#[cfg(test)]
pub(crate) fn unique_temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after epoch")
        .as_nanos();
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let nonce = SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tafsir_test_{name}_{nanos}_{nonce}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = CacheLayout::new("/tmp/tafsir");
        assert_eq!(
            layout.progress_path(2),
            PathBuf::from("/tmp/tafsir/progress/chapter-2.toml")
        );
        assert_eq!(
            layout.tokens_path(),
            PathBuf::from("/tmp/tafsir/notifications/tokens.json")
        );
    }

    #[test]
    fn signature_separates_parts() {
        assert_ne!(signature(["ab", "c"]), signature(["a", "bc"]));
        assert_eq!(signature(["x"]), signature(["x"]));
    }

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let dir = unique_temp_dir("atomic");
        let path = dir.join("nested").join("file.txt");
        write_atomic(&path, b"one").expect("first write");
        write_atomic(&path, b"two").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "two");
        let _ = fs::remove_dir_all(dir);
    }
}
