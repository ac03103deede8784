//! Playback position tracking for the active part.
//!
//! The tracker is fed the audio player's events and turns `AudioProcess`
//! ticks into verse changes. It never performs I/O so it can run inside the
//! player's polling tick.

use crate::model::{PlaybackState, TimingInterval};
use crate::timing::VerseTimingIndex;
use serde::Serialize;
use tracing::{debug, info, warn};
use ts_rs::TS;

/// Events emitted by an audio player for the currently loaded resource.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Media is decoded and playable. Duration is `None` when the container
    /// does not report one.
    Ready { duration: Option<f64> },
    AudioProcess { time: f64 },
    Play,
    Pause,
    Finish,
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct VerseChange {
    pub previous: Option<u32>,
    pub current: Option<u32>,
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerSignal {
    Ready,
    VerseChanged(VerseChange),
    Finished,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PlaybackTracker {
    index: VerseTimingIndex,
    state: PlaybackState,
    duration: Option<f64>,
}

impl PlaybackTracker {
    pub fn new(part_index: Option<usize>, timings: &[TimingInterval]) -> Self {
        Self {
            index: VerseTimingIndex::build(timings),
            state: PlaybackState {
                current_part_index: part_index,
                ..PlaybackState::default()
            },
            duration: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Reported media duration, falling back to the end of the last timed verse.
    pub fn duration(&self) -> Option<f64> {
        self.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| self.index.span().map(|(_, end)| end).filter(|end| *end > 0.0))
    }

    pub fn handle(&mut self, event: PlayerEvent) -> Vec<TrackerSignal> {
        match event {
            PlayerEvent::Ready { duration } => {
                self.duration = duration;
                debug!(?duration, "Player ready");
                vec![TrackerSignal::Ready]
            }
            PlayerEvent::AudioProcess { time } => {
                self.update_time(time).map(TrackerSignal::VerseChanged).into_iter().collect()
            }
            PlayerEvent::Play => {
                self.state.is_playing = true;
                Vec::new()
            }
            PlayerEvent::Pause => {
                self.state.is_playing = false;
                Vec::new()
            }
            PlayerEvent::Finish => {
                self.state.is_playing = false;
                info!(part = ?self.state.current_part_index, "Part playback finished");
                let mut signals = Vec::new();
                if let Some(change) = self.set_verse(None) {
                    signals.push(TrackerSignal::VerseChanged(change));
                }
                signals.push(TrackerSignal::Finished);
                signals
            }
            PlayerEvent::Error { message } => {
                self.state.is_playing = false;
                warn!(%message, "Audio player reported an error");
                vec![TrackerSignal::Failed(message)]
            }
        }
    }

    /// Record a new playback position and resolve the verse under it.
    pub fn update_time(&mut self, time: f64) -> Option<VerseChange> {
        if !time.is_finite() {
            return None;
        }
        self.state.current_time = time.max(0.0);
        let verse = self.index.verse_at(self.state.current_time);
        self.set_verse(verse)
    }

    /// Convert a `0..=1` fraction to a time and jump there. Returns the
    /// target time, or `None` when no duration is known yet.
    pub fn seek_fraction(&mut self, fraction: f64) -> Option<(f64, Option<VerseChange>)> {
        let duration = self.duration()?;
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let target = fraction * duration;
        Some((target, self.update_time(target)))
    }

    /// Fraction of the part at which `verse_id` is first heard.
    pub fn seek_fraction_for_verse(&self, verse_id: u32) -> Option<f64> {
        let start = self.index.first_start_for_verse(verse_id)?;
        let duration = self.duration()?;
        Some((start / duration).clamp(0.0, 1.0))
    }

    pub fn fraction_for_time(&self, time: f64) -> Option<f64> {
        let duration = self.duration()?;
        Some((time / duration).clamp(0.0, 1.0))
    }

    pub fn reset_position(&mut self) {
        self.state.current_time = 0.0;
        self.state.is_playing = false;
        self.state.current_verse_id = None;
    }

    fn set_verse(&mut self, verse: Option<u32>) -> Option<VerseChange> {
        if verse == self.state.current_verse_id {
            return None;
        }
        let change = VerseChange {
            previous: self.state.current_verse_id,
            current: verse,
            time: self.state.current_time,
        };
        self.state.current_verse_id = verse;
        debug!(previous = ?change.previous, current = ?change.current, time = change.time, "Verse changed");
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PlaybackTracker {
        PlaybackTracker::new(
            Some(0),
            &[
                TimingInterval::new(1, 0.0, 4.0),
                TimingInterval::new(2, 4.5, 9.0),
                TimingInterval::new(3, 9.0, 20.0),
            ],
        )
    }

    #[test]
    fn emits_verse_change_only_when_verse_differs() {
        let mut tracker = tracker();
        let first = tracker.handle(PlayerEvent::AudioProcess { time: 1.0 });
        assert_eq!(
            first,
            vec![TrackerSignal::VerseChanged(VerseChange {
                previous: None,
                current: Some(1),
                time: 1.0,
            })]
        );
        assert!(tracker.handle(PlayerEvent::AudioProcess { time: 2.0 }).is_empty());

        let gap = tracker.handle(PlayerEvent::AudioProcess { time: 4.2 });
        assert_eq!(gap.len(), 1);
        assert_eq!(tracker.state().current_verse_id, None);

        tracker.handle(PlayerEvent::AudioProcess { time: 5.0 });
        assert_eq!(tracker.state().current_verse_id, Some(2));
    }

    #[test]
    fn play_pause_toggle_state() {
        let mut tracker = tracker();
        tracker.handle(PlayerEvent::Play);
        assert!(tracker.state().is_playing);
        tracker.handle(PlayerEvent::Pause);
        assert!(!tracker.state().is_playing);
    }

    #[test]
    fn seek_uses_reported_duration() {
        let mut tracker = tracker();
        tracker.handle(PlayerEvent::Ready {
            duration: Some(40.0),
        });
        let (target, change) = tracker.seek_fraction(0.25).expect("duration known");
        assert_eq!(target, 10.0);
        assert_eq!(change.and_then(|c| c.current), Some(3));
    }

    #[test]
    fn seek_falls_back_to_timing_span() {
        let mut tracker = tracker();
        tracker.handle(PlayerEvent::Ready { duration: None });
        let (target, _) = tracker.seek_fraction(2.0).expect("span known");
        assert_eq!(target, 20.0);
        assert_eq!(tracker.seek_fraction_for_verse(2), Some(4.5 / 20.0));
    }

    #[test]
    fn seek_without_duration_or_timings_is_refused() {
        let mut tracker = PlaybackTracker::new(Some(0), &[]);
        assert!(tracker.seek_fraction(0.5).is_none());
    }

    #[test]
    fn finish_clears_verse_and_signals() {
        let mut tracker = tracker();
        tracker.handle(PlayerEvent::Play);
        tracker.handle(PlayerEvent::AudioProcess { time: 12.0 });
        let signals = tracker.handle(PlayerEvent::Finish);
        assert_eq!(signals.last(), Some(&TrackerSignal::Finished));
        assert!(!tracker.state().is_playing);
        assert_eq!(tracker.state().current_verse_id, None);
    }

    #[test]
    fn error_is_reported_without_panicking() {
        let mut tracker = tracker();
        let signals = tracker.handle(PlayerEvent::Error {
            message: "decode failed".to_string(),
        });
        assert_eq!(signals, vec![TrackerSignal::Failed("decode failed".to_string())]);
    }
}
