use super::defaults;
use super::models::{AppConfig, LogLevel};
use serde::Deserialize;

/// On-disk shape of `config.toml`: one table per concern.
#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub(super) struct ConfigTables {
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    content: ContentConfig,
    #[serde(default)]
    audio: AudioConfig,
    #[serde(default)]
    progress: ProgressConfig,
    #[serde(default)]
    notifications: NotificationsConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

impl From<ConfigTables> for AppConfig {
    fn from(tables: ConfigTables) -> Self {
        AppConfig {
            cache_dir: tables.storage.cache_dir,
            catalog_path: tables.audio.catalog_path,
            content_base_url: tables.content.base_url,
            content_language: tables.content.language,
            translation_id: tables.content.translation_id,
            transliteration_id: tables.content.transliteration_id,
            content_cache_ttl_secs: tables.content.cache_ttl_secs,
            audio_volume: tables.audio.volume,
            auto_advance_parts: tables.audio.auto_advance_parts,
            poll_interval_ms: tables.audio.poll_interval_ms,
            progress_enabled: tables.progress.enabled,
            progress_save_interval_secs: tables.progress.save_interval_secs,
            notifications_endpoint: tables.notifications.endpoint,
            notifications_server_key: tables.notifications.server_key,
            admin_key_sha256: tables.notifications.admin_key_sha256,
            stale_token_days: tables.notifications.stale_token_days,
            log_level: tables.logging.log_level,
        }
    }
}

impl From<&AppConfig> for ConfigTables {
    fn from(config: &AppConfig) -> Self {
        ConfigTables {
            storage: StorageConfig {
                cache_dir: config.cache_dir.clone(),
            },
            content: ContentConfig {
                base_url: config.content_base_url.clone(),
                language: config.content_language.clone(),
                translation_id: config.translation_id,
                transliteration_id: config.transliteration_id,
                cache_ttl_secs: config.content_cache_ttl_secs,
            },
            audio: AudioConfig {
                catalog_path: config.catalog_path.clone(),
                volume: config.audio_volume,
                auto_advance_parts: config.auto_advance_parts,
                poll_interval_ms: config.poll_interval_ms,
            },
            progress: ProgressConfig {
                enabled: config.progress_enabled,
                save_interval_secs: config.progress_save_interval_secs,
            },
            notifications: NotificationsConfig {
                endpoint: config.notifications_endpoint.clone(),
                server_key: config.notifications_server_key.clone(),
                admin_key_sha256: config.admin_key_sha256.clone(),
                stale_token_days: config.stale_token_days,
            },
            logging: LoggingConfig {
                log_level: config.log_level,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct StorageConfig {
    #[serde(default = "defaults::default_cache_dir")]
    cache_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cache_dir: defaults::default_cache_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ContentConfig {
    #[serde(default = "defaults::default_content_base_url")]
    base_url: String,
    #[serde(default = "defaults::default_content_language")]
    language: String,
    #[serde(default = "defaults::default_translation_id")]
    translation_id: u32,
    #[serde(default = "defaults::default_transliteration_id")]
    transliteration_id: u32,
    #[serde(default = "defaults::default_content_cache_ttl_secs")]
    cache_ttl_secs: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        ContentConfig {
            base_url: defaults::default_content_base_url(),
            language: defaults::default_content_language(),
            translation_id: defaults::default_translation_id(),
            transliteration_id: defaults::default_transliteration_id(),
            cache_ttl_secs: defaults::default_content_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct AudioConfig {
    #[serde(default = "defaults::default_catalog_path")]
    catalog_path: String,
    #[serde(default = "defaults::default_audio_volume")]
    volume: f32,
    #[serde(default = "defaults::default_auto_advance_parts")]
    auto_advance_parts: bool,
    #[serde(default = "defaults::default_poll_interval_ms")]
    poll_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            catalog_path: defaults::default_catalog_path(),
            volume: defaults::default_audio_volume(),
            auto_advance_parts: defaults::default_auto_advance_parts(),
            poll_interval_ms: defaults::default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct ProgressConfig {
    #[serde(default = "defaults::default_progress_enabled")]
    enabled: bool,
    #[serde(default = "defaults::default_progress_save_interval_secs")]
    save_interval_secs: f32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        ProgressConfig {
            enabled: defaults::default_progress_enabled(),
            save_interval_secs: defaults::default_progress_save_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct NotificationsConfig {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    server_key: Option<String>,
    #[serde(default)]
    admin_key_sha256: Option<String>,
    #[serde(default = "defaults::default_stale_token_days")]
    stale_token_days: u32,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        NotificationsConfig {
            endpoint: None,
            server_key: None,
            admin_key_sha256: None,
            stale_token_days: defaults::default_stale_token_days(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    log_level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: defaults::default_log_level(),
        }
    }
}
