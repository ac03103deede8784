//! Static description of which audio parts exist for each chapter.
//!
//! The catalog is a TOML file:
//!
//! ```toml
//! [[chapters]]
//! chapter_id = 1
//!
//! [[chapters.parts]]
//! id = "1-a"
//! title = "Al-Fatiha, part 1"
//! url = "https://cdn.example/tafsir/001-a.mp3"
//! timings = [{ verse_id = 1, start = 0.0, end = 41.5 }]
//! ```
//!
//! Chapters that are not listed simply have no audio.

use crate::model::AudioPart;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
struct CatalogFile {
    chapters: Vec<CatalogChapter>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct CatalogChapter {
    chapter_id: u32,
    #[serde(default)]
    parts: Vec<AudioPart>,
}

#[derive(Debug, Clone, Default)]
pub struct AudioCatalog {
    chapters: BTreeMap<u32, Vec<AudioPart>>,
}

impl AudioCatalog {
    /// Load the catalog, treating a missing file as "no audio anywhere".
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "No audio catalog found; chapters are text-only");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("Reading {}", path.display()));
            }
        };
        let mut catalog =
            Self::parse(&contents).with_context(|| format!("Parsing {}", path.display()))?;
        if let Some(base) = path.parent() {
            catalog.resolve_local_urls(base);
        }
        Ok(catalog)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(contents)?;
        let mut chapters: BTreeMap<u32, Vec<AudioPart>> = BTreeMap::new();
        for chapter in file.chapters {
            let entry = chapters.entry(chapter.chapter_id).or_default();
            let mut seen: HashSet<String> = entry.iter().map(|p| p.id.clone()).collect();
            for part in chapter.parts {
                if !seen.insert(part.id.clone()) {
                    warn!(
                        chapter_id = chapter.chapter_id,
                        part_id = %part.id,
                        "Dropping duplicate audio part id"
                    );
                    continue;
                }
                entry.push(part);
            }
        }
        debug!(chapters = chapters.len(), "Parsed audio catalog");
        Ok(Self { chapters })
    }

    /// Relative local paths are taken relative to the catalog file.
    fn resolve_local_urls(&mut self, base: &Path) {
        for part in self.chapters.values_mut().flatten() {
            if part.url.contains("://") || Path::new(&part.url).is_absolute() {
                continue;
            }
            part.url = base.join(&part.url).to_string_lossy().into_owned();
        }
    }

    /// Ordered parts for a chapter; empty when the chapter has no audio.
    pub fn parts_for(&self, chapter_id: u32) -> Vec<AudioPart> {
        self.chapters.get(&chapter_id).cloned().unwrap_or_default()
    }

    pub fn has_audio(&self, chapter_id: u32) -> bool {
        self.chapters
            .get(&chapter_id)
            .map(|parts| !parts.is_empty())
            .unwrap_or(false)
    }

    pub fn chapter_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.chapters
            .iter()
            .filter(|(_, parts)| !parts.is_empty())
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[chapters]]
chapter_id = 1

[[chapters.parts]]
id = "1-a"
title = "Opening, part 1"
url = "audio/001-a.mp3"
timings = [
  { verse_id = 1, start = 0.0, end = 12.0 },
  { verse_id = 2, start = 12.0, end = 30.5 },
]

[[chapters.parts]]
id = "1-b"
title = "Opening, part 2"
url = "audio/001-b.mp3"

[[chapters.parts]]
id = "1-a"
title = "Duplicate"
url = "audio/dup.mp3"

[[chapters]]
chapter_id = 114
parts = []
"#;

    #[test]
    fn parses_parts_in_order_and_drops_duplicates() {
        let catalog = AudioCatalog::parse(SAMPLE).expect("catalog parses");
        let parts = catalog.parts_for(1);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].id, "1-a");
        assert_eq!(parts[0].timings.len(), 2);
        assert_eq!(parts[0].timings[1].start_time, 12.0);
        assert_eq!(parts[1].id, "1-b");
        assert!(parts[1].timings.is_empty());
    }

    #[test]
    fn unlisted_or_empty_chapters_have_no_audio() {
        let catalog = AudioCatalog::parse(SAMPLE).expect("catalog parses");
        assert!(catalog.has_audio(1));
        assert!(!catalog.has_audio(114));
        assert!(catalog.parts_for(2).is_empty());
        assert_eq!(catalog.chapter_ids().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn local_urls_resolve_against_catalog_dir() {
        let mut catalog = AudioCatalog::parse(SAMPLE).expect("catalog parses");
        catalog.resolve_local_urls(Path::new("/srv/tafsir"));
        assert_eq!(catalog.parts_for(1)[0].url, "/srv/tafsir/audio/001-a.mp3");

        let mut remote = AudioCatalog::parse(
            "[[chapters]]\nchapter_id = 2\n[[chapters.parts]]\nid = \"r\"\ntitle = \"r\"\nurl = \"https://cdn.example/r.mp3\"\n",
        )
        .expect("catalog parses");
        remote.resolve_local_urls(Path::new("/srv/tafsir"));
        assert_eq!(remote.parts_for(2)[0].url, "https://cdn.example/r.mp3");
    }

    #[test]
    fn missing_file_is_an_empty_catalog() {
        let catalog =
            AudioCatalog::load(Path::new("/nonexistent/tafsir/audio.toml")).expect("empty catalog");
        assert!(!catalog.has_audio(1));
    }
}
