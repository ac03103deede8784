use serde::Deserialize;
use std::time::Duration;

/// High-level app configuration; deserializable from TOML.
#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct AppConfig {
    #[serde(default = "crate::config::defaults::default_cache_dir")]
    pub cache_dir: String,
    #[serde(default = "crate::config::defaults::default_catalog_path")]
    pub catalog_path: String,
    #[serde(default = "crate::config::defaults::default_content_base_url")]
    pub content_base_url: String,
    #[serde(default = "crate::config::defaults::default_content_language")]
    pub content_language: String,
    #[serde(default = "crate::config::defaults::default_translation_id")]
    pub translation_id: u32,
    #[serde(default = "crate::config::defaults::default_transliteration_id")]
    pub transliteration_id: u32,
    #[serde(default = "crate::config::defaults::default_content_cache_ttl_secs")]
    pub content_cache_ttl_secs: u64,
    #[serde(default = "crate::config::defaults::default_audio_volume")]
    pub audio_volume: f32,
    #[serde(default = "crate::config::defaults::default_auto_advance_parts")]
    pub auto_advance_parts: bool,
    #[serde(default = "crate::config::defaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "crate::config::defaults::default_progress_enabled")]
    pub progress_enabled: bool,
    #[serde(default = "crate::config::defaults::default_progress_save_interval_secs")]
    pub progress_save_interval_secs: f32,
    #[serde(default)]
    pub notifications_endpoint: Option<String>,
    #[serde(default)]
    pub notifications_server_key: Option<String>,
    /// Hex SHA-256 of the operator key allowed to publish notifications.
    #[serde(default)]
    pub admin_key_sha256: Option<String>,
    #[serde(default = "crate::config::defaults::default_stale_token_days")]
    pub stale_token_days: u32,
    #[serde(default = "crate::config::defaults::default_log_level")]
    pub log_level: LogLevel,
}

impl Default for AppConfig {
    fn default() -> Self {
        use crate::config::defaults::*;
        AppConfig {
            cache_dir: default_cache_dir(),
            catalog_path: default_catalog_path(),
            content_base_url: default_content_base_url(),
            content_language: default_content_language(),
            translation_id: default_translation_id(),
            transliteration_id: default_transliteration_id(),
            content_cache_ttl_secs: default_content_cache_ttl_secs(),
            audio_volume: default_audio_volume(),
            auto_advance_parts: default_auto_advance_parts(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_enabled: default_progress_enabled(),
            progress_save_interval_secs: default_progress_save_interval_secs(),
            notifications_endpoint: None,
            notifications_server_key: None,
            admin_key_sha256: None,
            stale_token_days: default_stale_token_days(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn cache_layout(&self) -> crate::cache::CacheLayout {
        crate::cache::CacheLayout::new(&self.cache_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(10, 1_000))
    }

    pub fn progress_save_interval(&self) -> Duration {
        let secs = if self.progress_save_interval_secs.is_finite() {
            self.progress_save_interval_secs.clamp(0.0, 600.0)
        } else {
            crate::config::defaults::default_progress_save_interval_secs()
        };
        Duration::from_secs_f32(secs)
    }

    pub fn clamped_volume(&self) -> f32 {
        if self.audio_volume.is_finite() {
            self.audio_volume.clamp(0.0, 2.0)
        } else {
            1.0
        }
    }
}

/// Supported logging verbosity levels.
#[derive(Debug, Clone, Copy, Default, Deserialize, serde::Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
