//! Entry point for the tafsir player CLI.
//!
//! Parses arguments, loads `conf/config.toml` (or `--config`), sets up
//! logging and dispatches to the chosen subcommand.

mod cli;
mod runtime;

use crate::cli::{CliArgs, Command, USAGE, parse_args};
use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tafsir_core::catalog::AudioCatalog;
use tafsir_core::config::{AppConfig, load_config, serialize_config};
use tafsir_core::content::{ContentConfig, ContentSource, QuranApiClient, validate_chapter_id};
use tafsir_core::notifications::{
    AdminNotifier, HttpPushMessenger, NotificationPayload, TokenStore,
};
use tafsir_core::progress::{FileProgressStore, MemoryProgressStore, ProgressStore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

const ADMIN_KEY_ENV: &str = "TAFSIR_ADMIN_KEY";

fn main() {
    let reload_handle = init_tracing();
    if let Err(err) = run(&reload_handle) {
        error!("{err:?}");
        std::process::exit(1);
    }
}

fn run(reload_handle: &ReloadHandle) -> Result<()> {
    let CliArgs {
        config_path,
        command,
    } = parse_args(env::args().skip(1))?;
    let config = load_config(&config_path);
    set_log_level(reload_handle, config.log_level.as_filter_str());
    info!(
        config = %config_path.display(),
        level = %config.log_level,
        cache = %config.cache_dir,
        "Starting tafsir player"
    );

    match command {
        Command::Help => println!("{USAGE}"),
        Command::Chapters { audio_only } => list_chapters(&config, audio_only)?,
        Command::Config => print!("{}", serialize_config(&config)?),
        Command::Read { chapter_id } => read_chapter(&config, chapter_id)?,
        Command::Play { chapter_id, part } => play_chapter(&config, chapter_id, part)?,
        Command::Progress { chapter_id } => show_progress(&config, chapter_id)?,
        Command::Forget { chapter_id } => {
            validate_chapter_id(chapter_id)?;
            progress_store(&config).clear(chapter_id)?;
            println!("Forgot saved position for chapter {chapter_id}.");
        }
        Command::TokensRegister { token } => {
            let mut store = token_store(&config)?;
            if store.register(&token)? {
                println!("Registered token ({} total).", store.len());
            } else {
                println!("Token already registered; refreshed.");
            }
        }
        Command::TokensRemove { token } => {
            let mut store = token_store(&config)?;
            if store.unregister(&token)? {
                println!("Removed token ({} left).", store.len());
            } else {
                println!("Token was not registered.");
            }
        }
        Command::TokensList => {
            let store = token_store(&config)?;
            for entry in store.entries() {
                println!("{}  last seen {}", entry.token, entry.last_seen);
            }
            println!("{} token(s)", store.len());
        }
        Command::TokensPruneStale { days } => {
            let days = days.unwrap_or(config.stale_token_days);
            let mut store = token_store(&config)?;
            let pruned = store.prune_stale(Duration::from_secs(u64::from(days) * 86_400))?;
            println!("Pruned {pruned} token(s) not seen for {days} day(s).");
        }
        Command::Notify { title, body, data } => {
            publish(&config, NotificationPayload { title, body, data })?
        }
    }
    Ok(())
}

fn content_client(config: &AppConfig) -> Result<QuranApiClient> {
    QuranApiClient::new(ContentConfig::from(config), &config.cache_layout())
}

fn load_catalog(config: &AppConfig) -> AudioCatalog {
    match AudioCatalog::load(Path::new(&config.catalog_path)) {
        Ok(catalog) => catalog,
        Err(err) => {
            warn!("Ignoring unreadable audio catalog: {err:#}");
            AudioCatalog::default()
        }
    }
}

fn progress_store(config: &AppConfig) -> Arc<dyn ProgressStore> {
    if config.progress_enabled {
        Arc::new(FileProgressStore::new(config.cache_layout()))
    } else {
        info!("Progress persistence disabled; positions last for this run only");
        Arc::new(MemoryProgressStore::new())
    }
}

fn token_store(config: &AppConfig) -> Result<TokenStore> {
    TokenStore::open(&config.cache_layout().tokens_path())
}

fn list_chapters(config: &AppConfig, audio_only: bool) -> Result<()> {
    let catalog = load_catalog(config);
    if audio_only && catalog.chapter_ids().next().is_none() {
        println!("No chapters have audio in {}.", config.catalog_path);
        return Ok(());
    }
    let chapters = content_client(config)?
        .chapters()
        .context("Loading chapter list")?;
    for chapter in chapters {
        if audio_only && !catalog.has_audio(chapter.id) {
            continue;
        }
        let audio = if catalog.has_audio(chapter.id) {
            "  [audio]"
        } else {
            ""
        };
        println!(
            "{:>3}. {} ({}) - {} verses, {}{audio}",
            chapter.id,
            chapter.name_simple,
            chapter.translated_name,
            chapter.verses_count,
            chapter.revelation_place
        );
    }
    Ok(())
}

fn read_chapter(config: &AppConfig, chapter_id: u32) -> Result<()> {
    validate_chapter_id(chapter_id)?;
    let client = content_client(config)?;
    let chapter = client.chapter(chapter_id)?;
    let verses = client
        .verses(chapter_id)
        .with_context(|| format!("Loading verses for chapter {chapter_id}"))?;
    println!(
        "{}. {} / {} ({})\n",
        chapter.id, chapter.name_simple, chapter.name_arabic, chapter.translated_name
    );
    for verse in &verses {
        runtime::print_verse(chapter.id, verse);
    }
    Ok(())
}

fn play_chapter(config: &AppConfig, chapter_id: u32, part: Option<usize>) -> Result<()> {
    validate_chapter_id(chapter_id)?;
    let client = content_client(config)?;
    let chapter = client.chapter(chapter_id)?;
    let verses = client
        .verses(chapter_id)
        .with_context(|| format!("Loading verses for chapter {chapter_id}"))?;
    let parts = load_catalog(config).parts_for(chapter_id);
    if parts.is_empty() {
        println!("No audio for chapter {chapter_id}; showing text only.");
        for verse in &verses {
            runtime::print_verse(chapter.id, verse);
        }
    }
    runtime::run_playback(
        config,
        chapter,
        verses,
        parts,
        progress_store(config),
        part,
    )
}

fn show_progress(config: &AppConfig, chapter_id: u32) -> Result<()> {
    validate_chapter_id(chapter_id)?;
    match progress_store(config).load(chapter_id)? {
        Some(record) => println!(
            "Chapter {}: part {} at {:.1}s (saved at {} ms since epoch)",
            record.chapter_id,
            record.current_part_index + 1,
            record.current_time,
            record.timestamp
        ),
        None => println!("No saved position for chapter {chapter_id}."),
    }
    Ok(())
}

fn publish(config: &AppConfig, payload: NotificationPayload) -> Result<()> {
    let endpoint = config
        .notifications_endpoint
        .clone()
        .ok_or_else(|| anyhow!("notifications.endpoint is not configured"))?;
    let admin_key =
        env::var(ADMIN_KEY_ENV).with_context(|| format!("{ADMIN_KEY_ENV} is not set"))?;
    let messenger = HttpPushMessenger::new(endpoint, config.notifications_server_key.clone())?;
    let mut notifier = AdminNotifier::new(
        token_store(config)?,
        Box::new(messenger),
        config.admin_key_sha256.clone(),
    );
    let report = notifier.publish(&admin_key, &payload)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Serializing publish report")?
    );
    Ok(())
}

fn init_tracing() -> ReloadHandle {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let (filter_layer, handle) = reload::Layer::new(env_filter);
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(filter_layer),
        )
        .init();
    handle
}

fn set_log_level(handle: &ReloadHandle, level: &str) {
    if env::var_os("RUST_LOG").is_some() {
        return;
    }
    let parsed = EnvFilter::builder()
        .parse(level)
        .unwrap_or_else(|_| EnvFilter::new("debug"));
    if let Err(err) = handle.modify(|filter| *filter = parsed) {
        warn!(%level, "Failed to update log level from config: {err}");
    }
}
