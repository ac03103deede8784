use super::models::AppConfig;
use super::tables::ConfigTables;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Load configuration from the given path, falling back to defaults on error.
pub fn load_config(path: &Path) -> AppConfig {
    let contents = match fs::read_to_string(path) {
        Ok(data) => {
            info!(path = %path.display(), "Loaded base config");
            data
        }
        Err(err) => {
            warn!(
                path = %path.display(),
                "Falling back to default config: {err}"
            );
            return AppConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(cfg) => {
            debug!("Parsed configuration from disk");
            cfg
        }
        Err(err) => {
            warn!(path = %path.display(), "Invalid config TOML: {err:#}");
            AppConfig::default()
        }
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let tables: ConfigTables = toml::from_str(contents).context("Parsing config tables")?;
    Ok(AppConfig::from(tables))
}

pub fn serialize_config(config: &AppConfig) -> Result<String> {
    toml::to_string_pretty(&ConfigTables::from(config)).context("Serializing config tables")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn empty_file_yields_defaults() {
        let config = parse_config("").expect("empty config parses");
        assert_eq!(config.translation_id, 131);
        assert_eq!(config.cache_dir, ".cache");
        assert!(config.auto_advance_parts);
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn tables_map_onto_flat_config() {
        let config = parse_config(
            r#"
[storage]
cache_dir = "/var/tmp/tafsir"

[content]
language = "ur"
translation_id = 97

[audio]
auto_advance_parts = false
volume = 0.5

[progress]
save_interval_secs = 12.5

[notifications]
endpoint = "https://push.example/send"

[logging]
log_level = "warn"
"#,
        )
        .expect("config parses");
        assert_eq!(config.cache_dir, "/var/tmp/tafsir");
        assert_eq!(config.content_language, "ur");
        assert_eq!(config.translation_id, 97);
        assert_eq!(config.transliteration_id, 57);
        assert!(!config.auto_advance_parts);
        assert_eq!(config.clamped_volume(), 0.5);
        assert_eq!(config.progress_save_interval().as_secs_f32(), 12.5);
        assert_eq!(
            config.notifications_endpoint.as_deref(),
            Some("https://push.example/send")
        );
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse_config("[logging]\nlog_level = \"loud\"").is_err());
    }

    #[test]
    fn serialized_config_parses_back() {
        let mut config = AppConfig::default();
        config.poll_interval_ms = 250;
        config.admin_key_sha256 = Some("abc".to_string());
        let text = serialize_config(&config).expect("serialize");
        let parsed = parse_config(&text).expect("parse");
        assert_eq!(parsed.poll_interval_ms, 250);
        assert_eq!(parsed.admin_key_sha256.as_deref(), Some("abc"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/tafsir/config.toml"));
        assert_eq!(config.content_base_url, "https://api.quran.com/api/v4");
    }
}
