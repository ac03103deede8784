//! Audio playback behind the `AudioPlayer` seam.
//!
//! Loading happens on a background thread (local path, `file://` or
//! `http(s)://`). Results come back over a channel and are turned into
//! `PlayerEvent`s by `poll_events`, each tagged with the generation the
//! caller passed to `load` so late results for an abandoned part can be told
//! apart from current ones.

use crate::cancellation::CancellationToken;
use crate::tracker::PlayerEvent;
use anyhow::{Context, Result, anyhow};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: PlayerEvent,
}

impl TaggedEvent {
    pub fn new(generation: u64, event: PlayerEvent) -> Self {
        Self { generation, event }
    }
}

pub trait AudioPlayer {
    /// Start loading `url`, replacing whatever was loaded before.
    fn load(&mut self, url: &str, generation: u64);
    fn play(&mut self);
    fn pause(&mut self);
    /// Seek to a fraction of the track, clamped to `0..=1`.
    fn seek_to(&mut self, fraction: f64);
    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn poll_events(&mut self) -> Vec<TaggedEvent>;
    fn unload(&mut self);
}

struct LoadedAudio {
    bytes: Arc<[u8]>,
    duration: Option<f64>,
}

struct LoadOutcome {
    generation: u64,
    result: std::result::Result<LoadedAudio, String>,
}

struct ActiveTrack {
    bytes: Arc<[u8]>,
    duration: Option<f64>,
    sink: Sink,
    offset: f64,
    started_at: Option<Instant>,
    finished: bool,
}

impl ActiveTrack {
    fn position(&self) -> f64 {
        let elapsed = self
            .started_at
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let position = self.offset + elapsed;
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    fn is_playing(&self) -> bool {
        self.started_at.is_some()
    }
}

/// `AudioPlayer` backed by a `rodio::Sink` on the default output device.
pub struct RodioPlayer {
    volume: f32,
    http: reqwest::blocking::Client,
    generation: u64,
    loading: Option<CancellationToken>,
    play_requested: bool,
    track: Option<ActiveTrack>,
    output: Option<(OutputStream, OutputStreamHandle)>,
    pending: Vec<TaggedEvent>,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
}

impl RodioPlayer {
    pub fn new(volume: f32) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Building audio HTTP client")?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            volume: volume.clamp(0.0, 2.0),
            http,
            generation: 0,
            loading: None,
            play_requested: false,
            track: None,
            output: None,
            pending: Vec::new(),
            tx,
            rx,
        })
    }

    fn emit(&mut self, event: PlayerEvent) {
        self.pending.push(TaggedEvent::new(self.generation, event));
    }

    fn new_sink(&mut self) -> Result<Sink> {
        if self.output.is_none() {
            let output = OutputStream::try_default().context("Opening audio output")?;
            info!("Opened audio output device");
            self.output = Some(output);
        }
        let (_, handle) = self
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("audio output unavailable"))?;
        let sink = Sink::try_new(handle).context("Creating sink")?;
        sink.set_volume(self.volume);
        sink.pause();
        Ok(sink)
    }

    fn install(&mut self, audio: LoadedAudio) -> Result<()> {
        let sink = self.new_sink()?;
        let decoder =
            Decoder::new(Cursor::new(Arc::clone(&audio.bytes))).context("Decoding audio")?;
        sink.append(decoder);
        self.track = Some(ActiveTrack {
            bytes: audio.bytes,
            duration: audio.duration,
            sink,
            offset: 0.0,
            started_at: None,
            finished: false,
        });
        Ok(())
    }

    fn seek_track(&mut self, target: f64) -> Result<()> {
        let Some(track) = self.track.as_mut() else {
            return Ok(());
        };
        let was_playing = track.is_playing() || track.finished && self.play_requested;
        if let Err(err) = track.sink.try_seek(Duration::from_secs_f64(target)) {
            debug!(target, "Sink seek unsupported ({err}); rebuilding source");
            let bytes = Arc::clone(&track.bytes);
            let sink = self.new_sink()?;
            let decoder = Decoder::new(Cursor::new(bytes)).context("Decoding audio")?;
            sink.append(decoder.skip_duration(Duration::from_secs_f64(target)));
            if let Some(track) = self.track.as_mut() {
                track.sink = sink;
            }
        }
        if let Some(track) = self.track.as_mut() {
            track.offset = target;
            track.finished = false;
            if was_playing {
                track.sink.play();
                track.started_at = Some(Instant::now());
            } else {
                track.started_at = None;
            }
        }
        Ok(())
    }

    fn drain_loads(&mut self) {
        while let Ok(outcome) = self.rx.try_recv() {
            if outcome.generation != self.generation {
                debug!(
                    stale = outcome.generation,
                    current = self.generation,
                    "Dropping stale audio load"
                );
                continue;
            }
            self.loading = None;
            match outcome.result {
                Ok(audio) => {
                    let duration = audio.duration;
                    match self.install(audio) {
                        Ok(()) => {
                            info!(generation = self.generation, ?duration, "Audio ready");
                            self.emit(PlayerEvent::Ready { duration });
                            if self.play_requested {
                                self.play();
                            }
                        }
                        Err(err) => {
                            warn!("Audio could not be prepared: {err:#}");
                            self.play_requested = false;
                            self.emit(PlayerEvent::Error {
                                message: format!("{err:#}"),
                            });
                        }
                    }
                }
                Err(message) => {
                    warn!(%message, "Audio load failed");
                    self.play_requested = false;
                    self.emit(PlayerEvent::Error { message });
                }
            }
        }
    }
}

impl AudioPlayer for RodioPlayer {
    fn load(&mut self, url: &str, generation: u64) {
        self.unload();
        self.generation = generation;
        let token = CancellationToken::replace(&mut self.loading);
        let tx = self.tx.clone();
        let http = self.http.clone();
        let url = url.to_string();
        info!(%url, generation, "Loading audio");
        thread::spawn(move || {
            let result = fetch_audio(&http, &url, &token).and_then(|bytes| {
                token.check_cancelled("fetched")?;
                let bytes: Arc<[u8]> = Arc::from(bytes);
                let duration = probe_duration(&bytes)?;
                token.check_cancelled("decoded")?;
                Ok(LoadedAudio { bytes, duration })
            });
            if token.is_cancelled() {
                debug!(%url, generation, "Audio load cancelled");
                return;
            }
            let _ = tx.send(LoadOutcome {
                generation,
                result: result.map_err(|err| format!("{err:#}")),
            });
        });
    }

    fn play(&mut self) {
        let Some(track) = self.track.as_ref() else {
            if self.loading.is_some() {
                debug!("Play requested while loading; deferring");
                self.play_requested = true;
            }
            return;
        };
        if track.is_playing() {
            return;
        }
        if track.finished {
            self.play_requested = true;
            if let Err(err) = self.seek_track(0.0) {
                warn!("Failed to rewind finished track: {err:#}");
                return;
            }
        }
        if let Some(track) = self.track.as_mut() {
            track.sink.play();
            if track.started_at.is_none() {
                track.started_at = Some(Instant::now());
            }
        }
        self.play_requested = false;
        debug!("Resuming playback");
        self.emit(PlayerEvent::Play);
    }

    fn pause(&mut self) {
        self.play_requested = false;
        let Some(track) = self.track.as_mut() else {
            return;
        };
        if !track.is_playing() {
            return;
        }
        track.offset = track.position();
        track.started_at = None;
        track.sink.pause();
        debug!(position = track.offset, "Pausing playback");
        self.emit(PlayerEvent::Pause);
    }

    fn seek_to(&mut self, fraction: f64) {
        let Some(duration) = self.duration() else {
            warn!("Cannot seek before the track duration is known");
            return;
        };
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let target = fraction * duration;
        if let Err(err) = self.seek_track(target) {
            warn!(target, "Seek failed: {err:#}");
            self.emit(PlayerEvent::Error {
                message: format!("{err:#}"),
            });
        }
    }

    fn current_time(&self) -> f64 {
        self.track.as_ref().map(ActiveTrack::position).unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.track.as_ref().and_then(|track| track.duration)
    }

    fn poll_events(&mut self) -> Vec<TaggedEvent> {
        self.drain_loads();
        let mut finished_at = None;
        let mut tick = None;
        if let Some(track) = self.track.as_mut() {
            if track.is_playing() {
                if track.sink.empty() {
                    let end = track.duration.unwrap_or_else(|| track.position());
                    track.offset = end;
                    track.started_at = None;
                    track.finished = true;
                    finished_at = Some(end);
                } else {
                    tick = Some(track.position());
                }
            }
        }
        if let Some(time) = tick {
            self.emit(PlayerEvent::AudioProcess { time });
        }
        if let Some(time) = finished_at {
            self.emit(PlayerEvent::AudioProcess { time });
            self.emit(PlayerEvent::Finish);
        }
        std::mem::take(&mut self.pending)
    }

    fn unload(&mut self) {
        if let Some(token) = self.loading.take() {
            token.cancel();
        }
        if let Some(track) = self.track.take() {
            track.sink.stop();
        }
        self.play_requested = false;
        self.pending.clear();
    }
}

fn fetch_audio(
    http: &reqwest::blocking::Client,
    url: &str,
    token: &CancellationToken,
) -> Result<Vec<u8>> {
    token.check_cancelled("start")?;
    if url.starts_with("http://") || url.starts_with("https://") {
        let bytes = http
            .get(url)
            .send()
            .with_context(|| format!("Requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("Audio server rejected {url}"))?
            .bytes()
            .with_context(|| format!("Downloading {url}"))?;
        debug!(%url, bytes = bytes.len(), "Downloaded audio");
        return Ok(bytes.to_vec());
    }
    let path = url.strip_prefix("file://").unwrap_or(url);
    fs::read(path).with_context(|| format!("Reading audio file {path}"))
}

/// Reported duration when the container knows it, otherwise measured by
/// decoding the whole stream once.
fn probe_duration(bytes: &Arc<[u8]>) -> Result<Option<f64>> {
    let decoder = Decoder::new(Cursor::new(Arc::clone(bytes))).context("Decoding audio")?;
    if let Some(duration) = decoder.total_duration() {
        return Ok(Some(duration.as_secs_f64()));
    }
    let rate = decoder.sample_rate() as f64;
    let channels = decoder.channels() as f64;
    if rate <= 0.0 || channels <= 0.0 {
        return Ok(None);
    }
    let samples = decoder.count() as f64;
    let seconds = samples / (rate * channels);
    Ok((seconds > 0.0).then_some(seconds))
}
