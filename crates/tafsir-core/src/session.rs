use crate::model::{AudioPart, Chapter, PlaybackState, Verse};
use crate::navigator::PartNavigator;
use crate::player::AudioPlayer;
use crate::progress::{ProgressCheckpointer, ProgressStore};
use crate::text_utils::matches_query;
use crate::tracker::{PlaybackTracker, PlayerEvent, TrackerSignal, VerseChange};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use ts_rs::TS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum AudioStatus {
    #[default]
    NoAudio,
    Loading,
    Ready,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct PartView {
    pub index: usize,
    pub id: String,
    pub title: String,
    pub has_timings: bool,
}

#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
pub struct ChapterSnapshot {
    pub chapter: Chapter,
    pub verses: Vec<Verse>,
    pub parts: Vec<PartView>,
    pub can_next_part: bool,
    pub can_prev_part: bool,
    pub playback: PlaybackState,
    pub duration: Option<f64>,
    pub progress_pct: f64,
    pub audio_status: AudioStatus,
    pub search_query: String,
    pub search_matches: Vec<u32>,
    pub selected_search_match: Option<usize>,
}

impl ChapterSnapshot {
    pub fn selected_verse_match(&self) -> Option<u32> {
        self.selected_search_match
            .and_then(|idx| self.search_matches.get(idx).copied())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, TS)]
#[serde(tag = "action", rename_all = "snake_case")]
#[ts(export)]
pub enum SessionCommand {
    GetSnapshot,
    Play,
    Pause,
    TogglePlayPause,
    NextPart,
    PrevPart,
    SelectPart { index: usize },
    Seek { fraction: f64 },
    SeekToVerse { verse_id: u32 },
    ClearProgress,
    SearchSetQuery { query: String },
    SearchNext,
    SearchPrev,
}

impl SessionCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetSnapshot => "chapter_get_snapshot",
            Self::Play => "chapter_play",
            Self::Pause => "chapter_pause",
            Self::TogglePlayPause => "chapter_toggle_play_pause",
            Self::NextPart => "chapter_next_part",
            Self::PrevPart => "chapter_prev_part",
            Self::SelectPart { .. } => "chapter_select_part",
            Self::Seek { .. } => "chapter_seek",
            Self::SeekToVerse { .. } => "chapter_seek_to_verse",
            Self::ClearProgress => "chapter_clear_progress",
            Self::SearchSetQuery { .. } => "chapter_search_set_query",
            Self::SearchNext => "chapter_search_next",
            Self::SearchPrev => "chapter_search_prev",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub action: &'static str,
    pub snapshot: ChapterSnapshot,
}

/// Things that happened while draining player events.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[ts(export)]
pub enum SessionNotice {
    AudioReady {
        part_index: usize,
        duration: Option<f64>,
    },
    AudioFailed {
        part_index: usize,
        message: String,
    },
    VerseChanged {
        change: VerseChange,
    },
    PartChanged {
        part_index: usize,
    },
    ChapterFinished,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub auto_advance: bool,
    pub save_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_advance: true,
            save_interval: Duration::from_secs(5),
        }
    }
}

/// Listening session for one chapter: verse text, its audio parts and the
/// single player that plays them.
pub struct ChapterSession<P: AudioPlayer> {
    chapter: Chapter,
    verses: Vec<Verse>,
    navigator: PartNavigator,
    tracker: PlaybackTracker,
    player: P,
    checkpointer: ProgressCheckpointer,
    options: SessionOptions,
    generation: u64,
    audio_status: AudioStatus,
    pending_resume: Option<f64>,
    notices: Vec<SessionNotice>,
    search_query: String,
    search_matches: Vec<u32>,
    selected_search_match: Option<usize>,
}

impl<P: AudioPlayer> ChapterSession<P> {
    pub fn open(
        chapter: Chapter,
        verses: Vec<Verse>,
        parts: Vec<AudioPart>,
        player: P,
        store: Arc<dyn ProgressStore>,
        options: SessionOptions,
    ) -> Self {
        let checkpointer = ProgressCheckpointer::new(store, options.save_interval);
        let mut session = Self {
            chapter,
            verses,
            navigator: PartNavigator::new(parts),
            tracker: PlaybackTracker::new(None, &[]),
            player,
            checkpointer,
            options,
            generation: 0,
            audio_status: AudioStatus::NoAudio,
            pending_resume: None,
            notices: Vec::new(),
            search_query: String::new(),
            search_matches: Vec::new(),
            selected_search_match: None,
        };

        if session.navigator.is_empty() {
            info!(
                chapter_id = session.chapter.id,
                "Chapter has no audio parts; text only"
            );
            return session;
        }

        let saved = session.checkpointer.load(session.chapter.id);
        match saved {
            Some(record) if record.current_part_index < session.navigator.len() => {
                info!(
                    chapter_id = session.chapter.id,
                    part = record.current_part_index,
                    time = record.current_time,
                    "Resuming saved progress"
                );
                session.navigator.select_part(record.current_part_index);
                session.pending_resume = Some(record.current_time).filter(|t| *t > 0.0);
            }
            Some(record) => {
                warn!(
                    chapter_id = session.chapter.id,
                    part = record.current_part_index,
                    parts = session.navigator.len(),
                    "Saved part is out of range; starting from the first part"
                );
                session.navigator.select_part(0);
            }
            None => {
                session.navigator.select_part(0);
            }
        }
        session.activate_current_part();
        session
    }

    pub fn chapter(&self) -> &Chapter {
        &self.chapter
    }

    pub fn verses(&self) -> &[Verse] {
        &self.verses
    }

    pub fn parts(&self) -> &[AudioPart] {
        self.navigator.parts()
    }

    pub fn current_part(&self) -> Option<&AudioPart> {
        self.navigator.current_part()
    }

    pub fn playback(&self) -> &PlaybackState {
        self.tracker.state()
    }

    pub fn audio_status(&self) -> &AudioStatus {
        &self.audio_status
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn has_audio(&self) -> bool {
        !self.navigator.is_empty()
    }

    pub fn apply_command(&mut self, command: SessionCommand) -> SessionEvent {
        let action = command.action();
        debug!(action, "Applying session command");
        match command {
            SessionCommand::GetSnapshot => {}
            SessionCommand::Play => self.play(),
            SessionCommand::Pause => self.pause(),
            SessionCommand::TogglePlayPause => self.toggle_play_pause(),
            SessionCommand::NextPart => {
                if self.navigator.next() {
                    self.on_part_changed(self.tracker.state().is_playing);
                }
            }
            SessionCommand::PrevPart => {
                if self.navigator.previous() {
                    self.on_part_changed(self.tracker.state().is_playing);
                }
            }
            SessionCommand::SelectPart { index } => self.select_part(index),
            SessionCommand::Seek { fraction } => self.seek(fraction),
            SessionCommand::SeekToVerse { verse_id } => self.seek_to_verse(verse_id),
            SessionCommand::ClearProgress => {
                self.checkpointer.clear(self.chapter.id);
            }
            SessionCommand::SearchSetQuery { query } => self.set_search_query(query),
            SessionCommand::SearchNext => self.search_next(),
            SessionCommand::SearchPrev => self.search_prev(),
        }
        SessionEvent {
            action,
            snapshot: self.snapshot(),
        }
    }

    pub fn play(&mut self) {
        if !self.has_audio() {
            debug!("Ignoring play; chapter has no audio");
            return;
        }
        if matches!(self.audio_status, AudioStatus::Failed { .. }) {
            info!("Retrying failed audio load");
            self.reload_current_part();
        }
        self.player.play();
    }

    pub fn pause(&mut self) {
        if !self.has_audio() {
            return;
        }
        self.player.pause();
        self.save_position();
    }

    pub fn toggle_play_pause(&mut self) {
        if self.tracker.state().is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn select_part(&mut self, index: usize) {
        let before = self.navigator.current_index();
        match self.navigator.select_part(index) {
            Some(selected) if Some(selected) != before => {
                self.on_part_changed(self.tracker.state().is_playing);
            }
            Some(_) => {}
            None => debug!(index, "Ignoring part selection; chapter has no audio"),
        }
    }

    pub fn seek(&mut self, fraction: f64) {
        if !self.has_audio() {
            return;
        }
        let Some((target, change)) = self.tracker.seek_fraction(fraction) else {
            debug!(fraction, "Cannot seek before the part duration is known");
            return;
        };
        if let Some(change) = change {
            self.notices.push(SessionNotice::VerseChanged { change });
        }
        if self.audio_status == AudioStatus::Ready {
            let fraction = self.tracker.fraction_for_time(target).unwrap_or(0.0);
            self.player.seek_to(fraction);
        } else {
            self.pending_resume = Some(target);
        }
        self.save_position();
    }

    /// Jump to the start of a verse, switching to the part that covers it
    /// when the current part does not.
    pub fn seek_to_verse(&mut self, verse_id: u32) {
        if let Some(fraction) = self.tracker.seek_fraction_for_verse(verse_id) {
            self.seek(fraction);
            return;
        }
        let target = self.navigator.parts().iter().enumerate().find_map(|(idx, part)| {
            part.timings
                .iter()
                .filter(|interval| interval.verse_id == verse_id && interval.is_well_formed())
                .map(|interval| interval.start_time)
                .reduce(f64::min)
                .map(|start| (idx, start))
        });
        let Some((part_index, start)) = target else {
            debug!(verse_id, "No audio timing covers this verse");
            return;
        };
        if Some(part_index) == self.navigator.current_index() {
            // Duration unknown yet; apply once the part is ready.
            self.pending_resume = Some(start);
            return;
        }
        let keep_playing = self.tracker.state().is_playing;
        self.navigator.select_part(part_index);
        self.on_part_changed(keep_playing);
        self.pending_resume = Some(start).filter(|t| *t > 0.0);
    }

    pub fn set_search_query(&mut self, query: String) {
        self.search_query = query;
        let query = self.search_query.trim();
        self.search_matches = if query.is_empty() {
            Vec::new()
        } else {
            self.verses
                .iter()
                .filter(|verse| {
                    verse.id.to_string() == query
                        || matches_query(
                            query,
                            &[
                                verse.text.as_str(),
                                verse.transliteration.as_str(),
                                verse.translation.as_str(),
                            ],
                        )
                })
                .map(|verse| verse.id)
                .collect()
        };
        self.selected_search_match = if self.search_matches.is_empty() {
            None
        } else {
            Some(0)
        };
        debug!(
            query = %self.search_query,
            matches = self.search_matches.len(),
            "Updated verse search"
        );
    }

    pub fn search_next(&mut self) {
        if self.search_matches.is_empty() {
            self.selected_search_match = None;
            return;
        }
        self.selected_search_match = Some(match self.selected_search_match {
            Some(current) => (current + 1) % self.search_matches.len(),
            None => 0,
        });
    }

    pub fn search_prev(&mut self) {
        if self.search_matches.is_empty() {
            self.selected_search_match = None;
            return;
        }
        self.selected_search_match = Some(match self.selected_search_match {
            Some(0) | None => self.search_matches.len() - 1,
            Some(current) => current - 1,
        });
    }

    /// Drain player events, advance parts when one finishes and checkpoint
    /// the listening position.
    pub fn pump(&mut self, now: Instant) -> Vec<SessionNotice> {
        if self.has_audio() {
            for tagged in self.player.poll_events() {
                if tagged.generation != self.generation {
                    debug!(
                        stale = tagged.generation,
                        current = self.generation,
                        event = ?tagged.event,
                        "Ignoring player event from a previous part"
                    );
                    continue;
                }
                self.handle_player_event(tagged.event);
            }
            if self.tracker.state().is_playing {
                if let Some(part_index) = self.navigator.current_index() {
                    self.checkpointer.checkpoint(
                        now,
                        self.chapter.id,
                        part_index,
                        self.tracker.state().current_time,
                    );
                }
            }
        }
        std::mem::take(&mut self.notices)
    }

    pub fn snapshot(&self) -> ChapterSnapshot {
        let playback = self.tracker.state().clone();
        let progress_pct = self
            .tracker
            .fraction_for_time(playback.current_time)
            .map(|fraction| fraction * 100.0)
            .unwrap_or(0.0);
        ChapterSnapshot {
            chapter: self.chapter.clone(),
            verses: self.verses.clone(),
            parts: self
                .navigator
                .parts()
                .iter()
                .enumerate()
                .map(|(index, part)| PartView {
                    index,
                    id: part.id.clone(),
                    title: part.title.clone(),
                    has_timings: !part.timings.is_empty(),
                })
                .collect(),
            can_next_part: self.navigator.has_next(),
            can_prev_part: self.navigator.has_previous(),
            playback,
            duration: self.tracker.duration(),
            progress_pct,
            audio_status: self.audio_status.clone(),
            search_query: self.search_query.clone(),
            search_matches: self.search_matches.clone(),
            selected_search_match: self.selected_search_match,
        }
    }

    /// Persist the current position and release the player.
    pub fn close(&mut self) {
        self.save_position();
        self.player.unload();
        info!(chapter_id = self.chapter.id, "Closed chapter session");
    }

    fn handle_player_event(&mut self, event: PlayerEvent) {
        for signal in self.tracker.handle(event) {
            match signal {
                TrackerSignal::Ready => self.on_ready(),
                TrackerSignal::VerseChanged(change) => {
                    self.notices.push(SessionNotice::VerseChanged { change });
                }
                TrackerSignal::Finished => self.on_finished(),
                TrackerSignal::Failed(message) => {
                    let part_index = self.navigator.current_index().unwrap_or(0);
                    self.audio_status = AudioStatus::Failed {
                        message: message.clone(),
                    };
                    self.pending_resume = None;
                    self.notices
                        .push(SessionNotice::AudioFailed { part_index, message });
                }
            }
        }
    }

    fn on_ready(&mut self) {
        self.audio_status = AudioStatus::Ready;
        let part_index = self.navigator.current_index().unwrap_or(0);
        self.notices.push(SessionNotice::AudioReady {
            part_index,
            duration: self.tracker.duration(),
        });
        if let Some(resume) = self.pending_resume.take() {
            match self.tracker.fraction_for_time(resume) {
                Some(fraction) => {
                    debug!(resume, fraction, "Applying resume position");
                    self.player.seek_to(fraction);
                    if let Some(change) = self.tracker.update_time(resume) {
                        self.notices.push(SessionNotice::VerseChanged { change });
                    }
                }
                None => warn!(resume, "Cannot resume; part duration unknown"),
            }
        }
    }

    fn on_finished(&mut self) {
        if self.options.auto_advance && self.navigator.next() {
            info!(
                part = ?self.navigator.current_index(),
                "Advancing to next part"
            );
            self.on_part_changed(true);
            return;
        }
        info!(chapter_id = self.chapter.id, "Reached end of chapter audio");
        if self.navigator.has_next() {
            self.save_position();
            return;
        }
        // Only an explicit clear removes the record; rewind to the part start.
        if let Some(part_index) = self.navigator.current_index() {
            self.checkpointer.save(self.chapter.id, part_index, 0.0);
        }
        self.notices.push(SessionNotice::ChapterFinished);
    }

    fn on_part_changed(&mut self, keep_playing: bool) {
        self.pending_resume = None;
        self.activate_current_part();
        if let Some(part_index) = self.navigator.current_index() {
            self.notices.push(SessionNotice::PartChanged { part_index });
            self.checkpointer.save(self.chapter.id, part_index, 0.0);
        }
        if keep_playing {
            self.player.play();
        }
    }

    fn activate_current_part(&mut self) {
        let Some(part) = self.navigator.current_part() else {
            return;
        };
        self.generation += 1;
        self.tracker = PlaybackTracker::new(self.navigator.current_index(), &part.timings);
        self.audio_status = AudioStatus::Loading;
        info!(
            part_id = %part.id,
            generation = self.generation,
            "Loading part audio"
        );
        let url = part.url.clone();
        self.player.load(&url, self.generation);
    }

    fn reload_current_part(&mut self) {
        let resume = self.tracker.state().current_time;
        self.activate_current_part();
        self.pending_resume = Some(resume).filter(|t| *t > 0.0);
    }

    fn save_position(&mut self) {
        if let Some(part_index) = self.navigator.current_index() {
            self.checkpointer.save(
                self.chapter.id,
                part_index,
                self.tracker.state().current_time,
            );
        }
    }
}

fn export_single_type<T: TS + 'static>(out_dir: &Path) -> Result<()> {
    T::export_all_to(out_dir).with_context(|| format!("Exporting {}", T::name()))
}

/// Write TypeScript definitions for the snapshot and command surface.
pub fn export_ts_bindings(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    for entry in
        fs::read_dir(out_dir).with_context(|| format!("Failed to list {}", out_dir.display()))?
    {
        let path = entry.context("Failed to read entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("ts") {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }

    export_single_type::<ChapterSnapshot>(out_dir)?;
    export_single_type::<SessionCommand>(out_dir)?;
    export_single_type::<SessionNotice>(out_dir)?;
    export_single_type::<crate::model::ProgressRecord>(out_dir)?;
    export_single_type::<crate::model::AudioPart>(out_dir)?;

    let index_content = r#"export type { AudioPart } from "./AudioPart";
export type { AudioStatus } from "./AudioStatus";
export type { Chapter } from "./Chapter";
export type { ChapterSnapshot } from "./ChapterSnapshot";
export type { PartView } from "./PartView";
export type { PlaybackState } from "./PlaybackState";
export type { ProgressRecord } from "./ProgressRecord";
export type { SessionCommand } from "./SessionCommand";
export type { SessionNotice } from "./SessionNotice";
export type { TimingInterval } from "./TimingInterval";
export type { Verse } from "./Verse";
export type { VerseChange } from "./VerseChange";
"#;
    fs::write(out_dir.join("index.ts"), index_content)
        .with_context(|| format!("Failed to write {}", out_dir.join("index.ts").display()))?;
    info!(out_dir = %out_dir.display(), "Exported TypeScript bindings");
    Ok(())
}
