//! Plain data shared by the content client, the audio catalog, the playback
//! core and the persistence layer.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use ts_rs::TS;

/// A single verse of a chapter, immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Verse {
    /// 1-based position within the chapter.
    pub id: u32,
    pub text: String,
    pub transliteration: String,
    pub translation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Chapter {
    pub id: u32,
    pub name_simple: String,
    pub name_arabic: String,
    pub translated_name: String,
    pub verses_count: u32,
    pub revelation_place: String,
}

/// Window of a part's audio during which a verse is recited or discussed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TimingInterval {
    pub verse_id: u32,
    #[serde(alias = "start")]
    pub start_time: f64,
    #[serde(alias = "end")]
    pub end_time: f64,
}

impl TimingInterval {
    pub fn new(verse_id: u32, start_time: f64, end_time: f64) -> Self {
        Self {
            verse_id,
            start_time,
            end_time,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_time.is_finite()
            && self.end_time.is_finite()
            && self.start_time >= 0.0
            && self.start_time <= self.end_time
    }

    /// Closed-interval containment; both edges count as inside.
    pub fn contains(&self, time: f64) -> bool {
        self.start_time <= time && time <= self.end_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AudioPart {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub timings: Vec<TimingInterval>,
}

/// Session-scoped playback state owned by the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default, TS)]
#[ts(export)]
pub struct PlaybackState {
    pub current_part_index: Option<usize>,
    pub current_time: f64,
    pub is_playing: bool,
    pub current_verse_id: Option<u32>,
}

/// Persisted resume point, one per chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProgressRecord {
    pub chapter_id: u32,
    pub current_part_index: usize,
    pub current_time: f64,
    /// Epoch milliseconds of the last write.
    #[ts(type = "number")]
    pub timestamp: u64,
}

impl ProgressRecord {
    pub fn now(chapter_id: u32, current_part_index: usize, current_time: f64) -> Self {
        Self {
            chapter_id,
            current_part_index,
            current_time: current_time.max(0.0),
            timestamp: unix_millis(),
        }
    }
}

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_edges_are_inclusive() {
        let interval = TimingInterval::new(3, 2.0, 4.0);
        assert!(interval.contains(2.0));
        assert!(interval.contains(4.0));
        assert!(!interval.contains(4.01));
    }

    #[test]
    fn inverted_or_nan_intervals_are_malformed() {
        assert!(!TimingInterval::new(1, 5.0, 4.0).is_well_formed());
        assert!(!TimingInterval::new(1, f64::NAN, 4.0).is_well_formed());
        assert!(TimingInterval::new(1, 4.0, 4.0).is_well_formed());
    }

    #[test]
    fn catalog_style_keys_deserialize() {
        let interval: TimingInterval =
            toml::from_str("verse_id = 2\nstart = 1.5\nend = 3.0").expect("parse interval");
        assert_eq!(interval, TimingInterval::new(2, 1.5, 3.0));
    }
}
