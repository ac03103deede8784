//! Chapter and verse content from the Quran.com v4 REST API.
//!
//! Responses are kept as JSON snapshots under the cache root. A snapshot is
//! reused while it is younger than the configured TTL and was produced with
//! the same request parameters; when the network is unreachable an expired
//! snapshot is still better than nothing.

use crate::cache::{CacheLayout, signature, write_atomic};
use crate::config::AppConfig;
use crate::model::{Chapter, Verse};
use crate::text_utils::strip_markup;
use anyhow::{Context, Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const CONTENT_CACHE_REV: &str = "content-cache-v1";
const VERSES_PER_PAGE: u32 = 50;
const MAX_VERSE_PAGES: u32 = 20;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
pub const CHAPTER_COUNT: u32 = 114;

/// Read-only source of chapter and verse records.
pub trait ContentSource {
    fn chapters(&self) -> Result<Vec<Chapter>>;
    fn verses(&self, chapter_id: u32) -> Result<Vec<Verse>>;

    fn chapter(&self, chapter_id: u32) -> Result<Chapter> {
        self.chapters()?
            .into_iter()
            .find(|chapter| chapter.id == chapter_id)
            .ok_or_else(|| anyhow!("chapter {chapter_id} not found"))
    }
}

#[derive(Debug, Clone)]
pub struct ContentConfig {
    pub base_url: String,
    pub language: String,
    pub translation_id: u32,
    pub transliteration_id: u32,
    pub cache_ttl: Duration,
}

impl From<&AppConfig> for ContentConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.content_base_url.trim_end_matches('/').to_string(),
            language: config.content_language.clone(),
            translation_id: config.translation_id,
            transliteration_id: config.transliteration_id,
            cache_ttl: Duration::from_secs(config.content_cache_ttl_secs),
        }
    }
}

impl ContentConfig {
    fn signature(&self, scope: &str) -> String {
        let translation = self.translation_id.to_string();
        let transliteration = self.transliteration_id.to_string();
        signature([
            scope,
            self.base_url.as_str(),
            self.language.as_str(),
            translation.as_str(),
            transliteration.as_str(),
        ])
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CachedSnapshot<T> {
    rev: String,
    generated_unix_secs: u64,
    signature: String,
    payload: T,
}

pub struct QuranApiClient {
    config: ContentConfig,
    http: reqwest::blocking::Client,
    cache_dir: PathBuf,
}

impl QuranApiClient {
    pub fn new(config: ContentConfig, layout: &CacheLayout) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tafsir-player/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Building content HTTP client")?;
        Ok(Self {
            config,
            http,
            cache_dir: layout.content_dir(),
        })
    }

    fn cached_or_fetch<T, F>(&self, file_name: &str, scope: &str, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        let path = self.cache_dir.join(file_name);
        let signature = self.config.signature(scope);
        match read_snapshot::<T>(&path) {
            Some(snapshot)
                if snapshot.rev == CONTENT_CACHE_REV
                    && snapshot.signature == signature
                    && snapshot_age(snapshot.generated_unix_secs) <= self.config.cache_ttl =>
            {
                debug!(path = %path.display(), "Using cached content snapshot");
                Ok(snapshot.payload)
            }
            stale => match fetch() {
                Ok(payload) => {
                    let snapshot = CachedSnapshot {
                        rev: CONTENT_CACHE_REV.to_string(),
                        generated_unix_secs: unix_secs(),
                        signature,
                        payload,
                    };
                    if let Err(err) = write_snapshot(&path, &snapshot) {
                        warn!(path = %path.display(), "Failed to cache content snapshot: {err:#}");
                    }
                    Ok(snapshot.payload)
                }
                Err(err) => match stale {
                    Some(snapshot) if snapshot.rev == CONTENT_CACHE_REV => {
                        warn!(
                            path = %path.display(),
                            "Content fetch failed; serving stale snapshot: {err:#}"
                        );
                        Ok(snapshot.payload)
                    }
                    _ => Err(err),
                },
            },
        }
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(%url, ?query, "Requesting content");
        self.http
            .get(url)
            .query(query)
            .send()
            .with_context(|| format!("Requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("Content API rejected {url}"))?
            .json::<T>()
            .with_context(|| format!("Decoding response from {url}"))
    }

    fn fetch_chapters(&self) -> Result<Vec<Chapter>> {
        let url = format!("{}/chapters", self.config.base_url);
        let response: ChaptersResponse =
            self.get_json(&url, &[("language", self.config.language.clone())])?;
        let chapters: Vec<Chapter> = response.chapters.into_iter().map(Chapter::from).collect();
        info!(count = chapters.len(), "Fetched chapter list");
        Ok(chapters)
    }

    fn fetch_verses(&self, chapter_id: u32) -> Result<Vec<Verse>> {
        let url = format!("{}/verses/by_chapter/{chapter_id}", self.config.base_url);
        let translations = format!(
            "{},{}",
            self.config.translation_id, self.config.transliteration_id
        );
        let mut verses = Vec::new();
        let mut page = 1u32;
        loop {
            let response: VersesResponse = self.get_json(
                &url,
                &[
                    ("language", self.config.language.clone()),
                    ("words", "false".to_string()),
                    ("translations", translations.clone()),
                    ("fields", "text_uthmani".to_string()),
                    ("per_page", VERSES_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ],
            )?;
            verses.extend(response.verses.into_iter().map(|verse| {
                verse.into_verse(self.config.translation_id, self.config.transliteration_id)
            }));
            match response.pagination.and_then(|p| p.next_page) {
                Some(next) if next > page && next <= MAX_VERSE_PAGES => page = next,
                _ => break,
            }
        }
        verses.sort_by_key(|verse| verse.id);
        info!(chapter_id, count = verses.len(), "Fetched chapter verses");
        Ok(verses)
    }
}

impl ContentSource for QuranApiClient {
    fn chapters(&self) -> Result<Vec<Chapter>> {
        self.cached_or_fetch("chapters.json", "chapters", || self.fetch_chapters())
    }

    fn verses(&self, chapter_id: u32) -> Result<Vec<Verse>> {
        validate_chapter_id(chapter_id)?;
        self.cached_or_fetch(
            &format!("chapter-{chapter_id}.json"),
            &format!("verses:{chapter_id}"),
            || self.fetch_verses(chapter_id),
        )
    }
}

pub fn validate_chapter_id(chapter_id: u32) -> Result<()> {
    if !(1..=CHAPTER_COUNT).contains(&chapter_id) {
        bail!("chapter id must be between 1 and {CHAPTER_COUNT}, got {chapter_id}");
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ChaptersResponse {
    chapters: Vec<ApiChapter>,
}

#[derive(Debug, Deserialize)]
struct ApiChapter {
    id: u32,
    #[serde(default)]
    name_simple: String,
    #[serde(default)]
    name_arabic: String,
    #[serde(default)]
    verses_count: u32,
    #[serde(default)]
    revelation_place: String,
    #[serde(default)]
    translated_name: Option<ApiTranslatedName>,
}

#[derive(Debug, Deserialize)]
struct ApiTranslatedName {
    #[serde(default)]
    name: String,
}

impl From<ApiChapter> for Chapter {
    fn from(api: ApiChapter) -> Self {
        Chapter {
            id: api.id,
            name_simple: api.name_simple,
            name_arabic: api.name_arabic,
            translated_name: api.translated_name.map(|t| t.name).unwrap_or_default(),
            verses_count: api.verses_count,
            revelation_place: api.revelation_place,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VersesResponse {
    verses: Vec<ApiVerse>,
    #[serde(default)]
    pagination: Option<ApiPagination>,
}

#[derive(Debug, Deserialize)]
struct ApiPagination {
    #[serde(default)]
    next_page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiVerse {
    verse_number: u32,
    #[serde(default)]
    text_uthmani: String,
    #[serde(default)]
    translations: Vec<ApiTranslation>,
}

#[derive(Debug, Deserialize)]
struct ApiTranslation {
    resource_id: u32,
    #[serde(default)]
    text: String,
}

impl ApiVerse {
    fn into_verse(self, translation_id: u32, transliteration_id: u32) -> Verse {
        let pick = |resource_id: u32| {
            self.translations
                .iter()
                .find(|t| t.resource_id == resource_id)
                .map(|t| strip_markup(&t.text))
                .unwrap_or_default()
        };
        let translation = pick(translation_id);
        let transliteration = pick(transliteration_id);
        Verse {
            id: self.verse_number,
            text: self.text_uthmani,
            transliteration,
            translation,
        }
    }
}

fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Option<CachedSnapshot<T>> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(path = %path.display(), "Ignoring unreadable content snapshot: {err}");
            None
        }
    }
}

fn write_snapshot<T: Serialize>(path: &Path, snapshot: &CachedSnapshot<T>) -> Result<()> {
    let data = serde_json::to_vec(snapshot).context("Serializing content snapshot")?;
    write_atomic(path, &data).with_context(|| format!("Writing {}", path.display()))
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn snapshot_age(generated_unix_secs: u64) -> Duration {
    Duration::from_secs(unix_secs().saturating_sub(generated_unix_secs))
}
