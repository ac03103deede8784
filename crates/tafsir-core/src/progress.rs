//! Resume points for chapter playback.
//!
//! Stores report failures as errors; `ProgressCheckpointer` is the caller
//! that turns them into log lines so playback never waits on storage.

use crate::cache::{CacheLayout, write_atomic};
use crate::model::ProgressRecord;
use anyhow::{Context, Result, anyhow};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Positions closer than this to the last saved one are not worth a write.
const MIN_MEANINGFUL_DELTA_SECS: f64 = 0.5;

pub trait ProgressStore: Send + Sync {
    fn save(&self, record: &ProgressRecord) -> Result<()>;
    fn load(&self, chapter_id: u32) -> Result<Option<ProgressRecord>>;
    fn clear(&self, chapter_id: u32) -> Result<()>;
}

/// One small TOML file per chapter under the cache root.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    layout: CacheLayout,
}

impl FileProgressStore {
    pub fn new(layout: CacheLayout) -> Self {
        Self { layout }
    }

    fn path(&self, chapter_id: u32) -> PathBuf {
        self.layout.progress_path(chapter_id)
    }
}

impl ProgressStore for FileProgressStore {
    fn save(&self, record: &ProgressRecord) -> Result<()> {
        let path = self.path(record.chapter_id);
        let contents = toml::to_string(record).context("Serializing progress record")?;
        write_atomic(&path, contents.as_bytes())
            .with_context(|| format!("Writing progress to {}", path.display()))
    }

    fn load(&self, chapter_id: u32) -> Result<Option<ProgressRecord>> {
        let path = self.path(chapter_id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Reading {}", path.display()));
            }
        };
        let record: ProgressRecord =
            toml::from_str(&data).with_context(|| format!("Parsing {}", path.display()))?;
        if record.chapter_id != chapter_id {
            return Err(anyhow!(
                "progress file {} belongs to chapter {}",
                path.display(),
                record.chapter_id
            ));
        }
        Ok(Some(record))
    }

    fn clear(&self, chapter_id: u32) -> Result<()> {
        let path = self.path(chapter_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("Removing {}", path.display())),
        }
    }
}

/// Process-local store, used when persistence is disabled and in tests.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    records: Mutex<HashMap<u32, ProgressRecord>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn save(&self, record: &ProgressRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("progress store lock poisoned"))?;
        records.insert(record.chapter_id, record.clone());
        Ok(())
    }

    fn load(&self, chapter_id: u32) -> Result<Option<ProgressRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("progress store lock poisoned"))?;
        Ok(records.get(&chapter_id).cloned())
    }

    fn clear(&self, chapter_id: u32) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("progress store lock poisoned"))?;
        records.remove(&chapter_id);
        Ok(())
    }
}

/// Best-effort, throttled writer in front of a `ProgressStore`.
pub struct ProgressCheckpointer {
    store: Arc<dyn ProgressStore>,
    min_interval: Duration,
    last_saved_at: Option<Instant>,
    last_saved: Option<(u32, usize, f64)>,
    /// Chapter whose record was cleared; periodic writes stay off until a
    /// forced save.
    held: Option<u32>,
}

impl ProgressCheckpointer {
    pub fn new(store: Arc<dyn ProgressStore>, min_interval: Duration) -> Self {
        Self {
            store,
            min_interval,
            last_saved_at: None,
            last_saved: None,
            held: None,
        }
    }

    /// Periodic save during playback; skipped inside the throttle window or
    /// when the position has not meaningfully moved.
    pub fn checkpoint(&mut self, now: Instant, chapter_id: u32, part_index: usize, time: f64) -> bool {
        if self.held == Some(chapter_id) {
            return false;
        }
        if let Some(last_at) = self.last_saved_at {
            if now.saturating_duration_since(last_at) < self.min_interval {
                return false;
            }
        }
        if let Some((last_chapter, last_part, last_time)) = self.last_saved {
            if last_chapter == chapter_id
                && last_part == part_index
                && (last_time - time).abs() < MIN_MEANINGFUL_DELTA_SECS
            {
                return false;
            }
        }
        self.write(now, chapter_id, part_index, time)
    }

    /// Unthrottled save for pause, part changes, seeks and shutdown.
    pub fn save(&mut self, chapter_id: u32, part_index: usize, time: f64) -> bool {
        if self.held == Some(chapter_id) {
            self.held = None;
        }
        self.write(Instant::now(), chapter_id, part_index, time)
    }

    pub fn load(&self, chapter_id: u32) -> Option<ProgressRecord> {
        match self.store.load(chapter_id) {
            Ok(record) => record,
            Err(err) => {
                warn!(chapter_id, "Failed to load saved progress; starting fresh: {err:#}");
                None
            }
        }
    }

    pub fn clear(&mut self, chapter_id: u32) -> bool {
        if matches!(self.last_saved, Some((chapter, _, _)) if chapter == chapter_id) {
            self.last_saved = None;
            self.last_saved_at = None;
        }
        self.held = Some(chapter_id);
        match self.store.clear(chapter_id) {
            Ok(()) => {
                info!(chapter_id, "Cleared saved progress");
                true
            }
            Err(err) => {
                warn!(chapter_id, "Failed to clear saved progress: {err:#}");
                false
            }
        }
    }

    fn write(&mut self, now: Instant, chapter_id: u32, part_index: usize, time: f64) -> bool {
        let record = ProgressRecord::now(chapter_id, part_index, time);
        // Throttle on attempts, not successes, so a broken store is not hammered.
        self.last_saved_at = Some(now);
        match self.store.save(&record) {
            Ok(()) => {
                debug!(chapter_id, part_index, time, "Saved progress");
                self.last_saved = Some((chapter_id, part_index, record.current_time));
                true
            }
            Err(err) => {
                warn!(chapter_id, "Progress not saved; continuing playback: {err:#}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::unique_temp_dir;

    struct BrokenStore;

    impl ProgressStore for BrokenStore {
        fn save(&self, _record: &ProgressRecord) -> Result<()> {
            Err(anyhow!("quota exceeded"))
        }
        fn load(&self, _chapter_id: u32) -> Result<Option<ProgressRecord>> {
            Err(anyhow!("storage unavailable"))
        }
        fn clear(&self, _chapter_id: u32) -> Result<()> {
            Err(anyhow!("storage unavailable"))
        }
    }

    #[test]
    fn file_store_round_trips_and_clears() {
        let dir = unique_temp_dir("progress");
        let store = FileProgressStore::new(CacheLayout::new(&dir));
        store
            .save(&ProgressRecord::now(18, 2, 95.5))
            .expect("save progress");

        let loaded = store.load(18).expect("load").expect("record present");
        assert_eq!(loaded.current_part_index, 2);
        assert_eq!(loaded.current_time, 95.5);

        store.clear(18).expect("clear");
        assert!(store.load(18).expect("load after clear").is_none());
        store.clear(18).expect("clearing twice is fine");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn file_store_reports_corrupt_records() {
        let dir = unique_temp_dir("progress_corrupt");
        let layout = CacheLayout::new(&dir);
        write_atomic(&layout.progress_path(3), b"not = [valid").expect("seed file");
        let store = FileProgressStore::new(layout);
        assert!(store.load(3).is_err());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryProgressStore::new();
        store.save(&ProgressRecord::now(1, 0, 12.0)).expect("save");
        assert_eq!(store.load(1).expect("load").map(|r| r.current_time), Some(12.0));
        store.clear(1).expect("clear");
        assert!(store.load(1).expect("load").is_none());
    }

    #[test]
    fn checkpoint_is_throttled() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut checkpointer = ProgressCheckpointer::new(store.clone(), Duration::from_secs(5));
        let start = Instant::now();

        assert!(checkpointer.checkpoint(start, 2, 0, 1.0));
        assert!(!checkpointer.checkpoint(start + Duration::from_secs(1), 2, 0, 3.0));
        assert!(checkpointer.checkpoint(start + Duration::from_secs(6), 2, 0, 7.0));
        assert_eq!(store.load(2).expect("load").map(|r| r.current_time), Some(7.0));
    }

    #[test]
    fn checkpoint_skips_unchanged_position() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut checkpointer = ProgressCheckpointer::new(store, Duration::ZERO);
        let start = Instant::now();
        assert!(checkpointer.checkpoint(start, 2, 1, 30.0));
        assert!(!checkpointer.checkpoint(start, 2, 1, 30.2));
        assert!(checkpointer.checkpoint(start, 2, 0, 30.2));
    }

    #[test]
    fn clear_holds_periodic_writes_until_forced_save() {
        let store = Arc::new(MemoryProgressStore::new());
        let mut checkpointer = ProgressCheckpointer::new(store.clone(), Duration::from_secs(5));
        let start = Instant::now();
        assert!(checkpointer.checkpoint(start, 3, 0, 12.0));
        assert!(checkpointer.clear(3));
        assert!(!checkpointer.checkpoint(start + Duration::from_secs(10), 3, 0, 22.0));
        assert!(store.load(3).expect("load").is_none());
        assert!(checkpointer.checkpoint(start + Duration::from_secs(10), 4, 0, 1.0));

        assert!(checkpointer.save(3, 0, 25.0));
        assert!(checkpointer.checkpoint(start + Duration::from_secs(20), 3, 0, 35.0));
        assert_eq!(store.load(3).expect("load").map(|r| r.current_time), Some(35.0));
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let mut checkpointer = ProgressCheckpointer::new(Arc::new(BrokenStore), Duration::ZERO);
        assert!(!checkpointer.save(1, 0, 5.0));
        assert!(checkpointer.load(1).is_none());
        assert!(!checkpointer.clear(1));
    }
}
