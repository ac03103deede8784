//! Interactive listening loop: stdin commands in, verse lines out.

use crate::cli::part_number;
use anyhow::{Context, Result, anyhow, bail};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tafsir_core::config::AppConfig;
use tafsir_core::model::{AudioPart, Chapter, Verse};
use tafsir_core::player::{AudioPlayer, RodioPlayer};
use tafsir_core::progress::ProgressStore;
use tafsir_core::session::{
    AudioStatus, ChapterSession, ChapterSnapshot, SessionCommand, SessionNotice, SessionOptions,
};
use tracing::{debug, info, warn};

const INTERACTIVE_HELP: &str = "\
Commands: play | pause | toggle | next | prev | part N | seek F | verse N
          find Q | find-next | find-prev | clear | status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(SessionCommand),
    Status,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Result<Input> {
    let line = line.trim();
    let (word, arg) = match line.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (line, ""),
    };
    let input = match word.to_ascii_lowercase().as_str() {
        "play" => Input::Command(SessionCommand::Play),
        "pause" => Input::Command(SessionCommand::Pause),
        "" | "toggle" | "p" => Input::Command(SessionCommand::TogglePlayPause),
        "next" | "n" => Input::Command(SessionCommand::NextPart),
        "prev" | "b" => Input::Command(SessionCommand::PrevPart),
        "part" => Input::Command(SessionCommand::SelectPart {
            index: part_number(arg)?,
        }),
        "seek" => Input::Command(SessionCommand::Seek {
            fraction: parse_fraction(arg)?,
        }),
        "verse" | "v" => Input::Command(SessionCommand::SeekToVerse {
            verse_id: arg
                .parse()
                .with_context(|| format!("invalid verse number: {arg}"))?,
        }),
        "find" | "/" => Input::Command(SessionCommand::SearchSetQuery {
            query: arg.to_string(),
        }),
        "find-next" => Input::Command(SessionCommand::SearchNext),
        "find-prev" => Input::Command(SessionCommand::SearchPrev),
        "clear" => Input::Command(SessionCommand::ClearProgress),
        "status" | "s" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => bail!("unknown command: {other} (type `help`)"),
    };
    Ok(input)
}

/// `0.25` and `25%` both mean a quarter of the part.
fn parse_fraction(arg: &str) -> Result<f64> {
    let (number, scale) = match arg.strip_suffix('%') {
        Some(percent) => (percent, 100.0),
        None => (arg, 1.0),
    };
    let value: f64 = number
        .trim()
        .parse()
        .with_context(|| format!("invalid seek position: {arg}"))?;
    let fraction = value / scale;
    if !(0.0..=1.0).contains(&fraction) {
        return Err(anyhow!("seek position must be between 0 and 1 (or 0% and 100%)"));
    }
    Ok(fraction)
}

pub fn run_playback(
    config: &AppConfig,
    chapter: Chapter,
    verses: Vec<Verse>,
    parts: Vec<AudioPart>,
    store: Arc<dyn ProgressStore>,
    start_part: Option<usize>,
) -> Result<()> {
    let player = RodioPlayer::new(config.clamped_volume())?;
    let options = SessionOptions {
        auto_advance: config.auto_advance_parts,
        save_interval: config.progress_save_interval(),
    };
    let mut session = ChapterSession::open(chapter, verses, parts, player, store, options);
    if let Some(index) = start_part {
        session.apply_command(SessionCommand::SelectPart { index });
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(err) = ctrlc::set_handler(move || {
            info!("Received Ctrl+C; saving progress before exit");
            interrupted.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install Ctrl+C signal handler: {err}");
        }
    }

    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });

    print_header(&session.snapshot());
    println!("{INTERACTIVE_HELP}");
    let poll_interval = config.poll_interval();
    let mut last_verse = None;
    let mut stdin_open = true;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        match rx.try_recv() {
            Ok(line) => match parse_input(&line) {
                Ok(Input::Quit) => break,
                Ok(Input::Help) => println!("{INTERACTIVE_HELP}"),
                Ok(Input::Status) => print_status(&session.snapshot()),
                Ok(Input::Command(command)) => {
                    let is_search = matches!(
                        command,
                        SessionCommand::SearchSetQuery { .. }
                            | SessionCommand::SearchNext
                            | SessionCommand::SearchPrev
                    );
                    let is_clear = command == SessionCommand::ClearProgress;
                    let event = session.apply_command(command);
                    if is_search {
                        print_search(&event.snapshot);
                    } else if is_clear {
                        println!("Saved position cleared.");
                    } else if event.snapshot.audio_status == AudioStatus::NoAudio {
                        println!("This chapter has no audio; text only.");
                    }
                }
                Err(err) => println!("{err}"),
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                if stdin_open {
                    stdin_open = false;
                    if !session.has_audio() {
                        break;
                    }
                    session.apply_command(SessionCommand::Play);
                }
            }
        }

        let mut finished = false;
        for notice in session.pump(Instant::now()) {
            finished |= notice == SessionNotice::ChapterFinished;
            print_notice(&session, &notice, &mut last_verse);
        }
        if finished && !stdin_open {
            break;
        }
        thread::sleep(poll_interval);
    }

    session.close();
    Ok(())
}

fn print_header(snapshot: &ChapterSnapshot) {
    let chapter = &snapshot.chapter;
    println!(
        "{}. {} ({}) - {} verses, {} audio part(s)",
        chapter.id,
        chapter.name_simple,
        chapter.translated_name,
        snapshot.verses.len(),
        snapshot.parts.len()
    );
}

fn print_status(snapshot: &ChapterSnapshot) {
    let playback = &snapshot.playback;
    let part = playback
        .current_part_index
        .and_then(|idx| snapshot.parts.get(idx))
        .map(|part| format!("part {}/{} \"{}\"", part.index + 1, snapshot.parts.len(), part.title))
        .unwrap_or_else(|| "no part".to_string());
    let status = match &snapshot.audio_status {
        AudioStatus::NoAudio => "no audio".to_string(),
        AudioStatus::Loading => "loading".to_string(),
        AudioStatus::Ready if playback.is_playing => "playing".to_string(),
        AudioStatus::Ready => "paused".to_string(),
        AudioStatus::Failed { message } => format!("failed: {message}"),
    };
    let duration = snapshot
        .duration
        .map(format_clock)
        .unwrap_or_else(|| "--:--".to_string());
    let verse = playback
        .current_verse_id
        .map(|id| format!("verse {id}"))
        .unwrap_or_else(|| "between verses".to_string());
    println!(
        "{part} | {status} | {}/{duration} ({:.0}%) | {verse}",
        format_clock(playback.current_time),
        snapshot.progress_pct
    );
}

fn print_search(snapshot: &ChapterSnapshot) {
    if snapshot.search_query.trim().is_empty() {
        println!("Search cleared.");
        return;
    }
    if snapshot.search_matches.is_empty() {
        println!("No verses match \"{}\".", snapshot.search_query);
        return;
    }
    let position = snapshot.selected_search_match.unwrap_or(0) + 1;
    println!(
        "Match {position}/{} for \"{}\"",
        snapshot.search_matches.len(),
        snapshot.search_query
    );
    if let Some(verse) = snapshot
        .selected_verse_match()
        .and_then(|id| snapshot.verses.iter().find(|verse| verse.id == id))
    {
        print_verse(snapshot.chapter.id, verse);
    }
}

fn print_notice<P: AudioPlayer>(
    session: &ChapterSession<P>,
    notice: &SessionNotice,
    last_verse: &mut Option<u32>,
) {
    match notice {
        SessionNotice::AudioReady { part_index, duration } => {
            let title = session
                .parts()
                .get(*part_index)
                .map(|part| part.title.as_str())
                .unwrap_or("");
            let duration = duration.map(format_clock).unwrap_or_else(|| "--:--".to_string());
            println!("Ready: {title} [{duration}]");
        }
        SessionNotice::AudioFailed { message, .. } => {
            println!("Audio unavailable ({message}); the text is still here. `play` retries.");
        }
        SessionNotice::VerseChanged { change } => {
            let Some(verse_id) = change.current else {
                return;
            };
            if *last_verse == Some(verse_id) {
                return;
            }
            *last_verse = Some(verse_id);
            if let Some(verse) = session.verses().iter().find(|verse| verse.id == verse_id) {
                print_verse(session.chapter().id, verse);
            }
        }
        SessionNotice::PartChanged { part_index } => {
            if let Some(part) = session.parts().get(*part_index) {
                println!(
                    "Part {}/{}: {}",
                    part_index + 1,
                    session.parts().len(),
                    part.title
                );
            }
        }
        SessionNotice::ChapterFinished => println!("End of chapter audio."),
    }
}

pub fn print_verse(chapter_id: u32, verse: &Verse) {
    println!("[{chapter_id}:{}] {}", verse.id, verse.text);
    if !verse.transliteration.is_empty() {
        println!("    {}", verse.transliteration);
    }
    if !verse.translation.is_empty() {
        println!("    {}", verse.translation);
    }
}

fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playback_commands() {
        assert_eq!(
            parse_input("play").expect("parse"),
            Input::Command(SessionCommand::Play)
        );
        assert_eq!(
            parse_input("").expect("parse"),
            Input::Command(SessionCommand::TogglePlayPause)
        );
        assert_eq!(
            parse_input("part 3").expect("parse"),
            Input::Command(SessionCommand::SelectPart { index: 2 })
        );
        assert_eq!(
            parse_input("verse 12").expect("parse"),
            Input::Command(SessionCommand::SeekToVerse { verse_id: 12 })
        );
        assert_eq!(parse_input("QUIT").expect("parse"), Input::Quit);
    }

    #[test]
    fn seek_accepts_fraction_or_percent() {
        assert_eq!(
            parse_input("seek 0.25").expect("parse"),
            Input::Command(SessionCommand::Seek { fraction: 0.25 })
        );
        assert_eq!(
            parse_input("seek 50%").expect("parse"),
            Input::Command(SessionCommand::Seek { fraction: 0.5 })
        );
        assert!(parse_input("seek 2").is_err());
        assert!(parse_input("seek soon").is_err());
    }

    #[test]
    fn find_keeps_the_whole_query() {
        assert_eq!(
            parse_input("find  most merciful ").expect("parse"),
            Input::Command(SessionCommand::SearchSetQuery {
                query: "most merciful".to_string()
            })
        );
    }

    #[test]
    fn unknown_input_is_an_error() {
        assert!(parse_input("rewind").is_err());
        assert!(parse_input("part 0").is_err());
    }

    #[test]
    fn clock_formatting() {
        assert_eq!(format_clock(0.0), "00:00");
        assert_eq!(format_clock(125.4), "02:05");
        assert_eq!(format_clock(-3.0), "00:00");
    }
}
