pub(crate) fn default_cache_dir() -> String {
    crate::cache::DEFAULT_CACHE_DIR.to_string()
}

pub(crate) fn default_catalog_path() -> String {
    "conf/audio.toml".to_string()
}

pub(crate) fn default_content_base_url() -> String {
    "https://api.quran.com/api/v4".to_string()
}

pub(crate) fn default_content_language() -> String {
    "en".to_string()
}

pub(crate) fn default_translation_id() -> u32 {
    131
}

pub(crate) fn default_transliteration_id() -> u32 {
    57
}

pub(crate) fn default_content_cache_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

pub(crate) fn default_audio_volume() -> f32 {
    1.0
}

pub(crate) fn default_auto_advance_parts() -> bool {
    true
}

pub(crate) fn default_poll_interval_ms() -> u64 {
    100
}

pub(crate) fn default_progress_enabled() -> bool {
    true
}

pub(crate) fn default_progress_save_interval_secs() -> f32 {
    5.0
}

pub(crate) fn default_stale_token_days() -> u32 {
    270
}

pub(crate) fn default_log_level() -> crate::config::LogLevel {
    crate::config::LogLevel::Info
}
