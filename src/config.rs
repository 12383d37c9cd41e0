#![forbid(unsafe_code)]

//! Runtime configuration for the videotube backend.
//!
//! Values are resolved in three layers: explicit overrides (CLI flags) win,
//! then the process environment, then an optional `.env` file.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
// The media client holds a file plus its base64 copy in memory, so keep
// this well below what a single upload may cost.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Connection settings for the external media host.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub upload_url: String,
    pub upload_preset: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub upload_temp_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub log_format: LogFormat,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_path: Option<PathBuf>,
    pub upload_temp_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub media_upload_url: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn load_config(overrides: ConfigOverrides) -> Result<AppConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<AppConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let database_path = overrides
        .database_path
        .or_else(|| lookup("DATABASE_PATH").map(PathBuf::from))
        .ok_or_else(|| anyhow!("DATABASE_PATH not set"))?;
    let upload_temp_dir = overrides
        .upload_temp_dir
        .or_else(|| lookup("UPLOAD_TEMP_DIR").map(PathBuf::from))
        .unwrap_or_else(env::temp_dir);
    let host = overrides
        .host
        .and_then(non_blank)
        .or_else(|| lookup("VIDEOTUBE_HOST"))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("VIDEOTUBE_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let max_upload_bytes = lookup("MAX_UPLOAD_BYTES")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
    let log_format = lookup("LOG_FORMAT")
        .map(|value| LogFormat::parse(&value))
        .unwrap_or_default();

    let upload_url = overrides
        .media_upload_url
        .and_then(non_blank)
        .or_else(|| lookup("MEDIA_UPLOAD_URL"))
        .ok_or_else(|| anyhow!("MEDIA_UPLOAD_URL not set"))?;
    let timeout_secs = lookup("MEDIA_UPLOAD_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS);

    Ok(AppConfig {
        database_path,
        upload_temp_dir,
        host,
        port,
        max_upload_bytes,
        log_format,
        media: MediaConfig {
            upload_url,
            upload_preset: lookup("MEDIA_UPLOAD_PRESET"),
            api_key: lookup("MEDIA_API_KEY"),
            api_secret: lookup("MEDIA_API_SECRET"),
            timeout: Duration::from_secs(timeout_secs),
        },
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Reads `KEY=value` pairs from a dotenv file. A missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let entries =
        dotenvy::from_path_iter(path).with_context(|| format!("Reading {}", path.display()))?;
    for entry in entries {
        let (key, value) = entry.with_context(|| format!("Parsing {}", path.display()))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> AppConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_config(&vars, |_| None).unwrap()
    }

    const BASE: &str = "DATABASE_PATH=\"/data/videos.db\"\nMEDIA_UPLOAD_URL=\"https://media.test/upload\"\n";

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let config = config_from(BASE);
        assert_eq!(config.database_path, PathBuf::from("/data/videos.db"));
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.upload_temp_dir, env::temp_dir());
        assert_eq!(config.media.upload_url, "https://media.test/upload");
        assert_eq!(
            config.media.timeout,
            Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS)
        );
        assert!(config.media.upload_preset.is_none());
        assert!(config.media.api_key.is_none());
    }

    #[test]
    fn default_upload_cap_is_100_mib() {
        assert_eq!(DEFAULT_MAX_UPLOAD_BYTES, 100 * 1024 * 1024);
        assert_eq!(config_from(BASE).max_upload_bytes, 100 * 1024 * 1024);
    }

    #[test]
    fn reads_optional_settings() {
        let config = config_from(&format!(
            "{BASE}VIDEOTUBE_PORT=4242\nVIDEOTUBE_HOST=0.0.0.0\nLOG_FORMAT=json\n\
             MEDIA_UPLOAD_PRESET=videos\nMEDIA_API_KEY=key\nMEDIA_API_SECRET=secret\n\
             MEDIA_UPLOAD_TIMEOUT_SECS=12\nMAX_UPLOAD_BYTES=1024\nUPLOAD_TEMP_DIR=/spool\n"
        ));
        assert_eq!(config.port, 4242);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.media.upload_preset.as_deref(), Some("videos"));
        assert_eq!(config.media.api_key.as_deref(), Some("key"));
        assert_eq!(config.media.api_secret.as_deref(), Some("secret"));
        assert_eq!(config.media.timeout, Duration::from_secs(12));
        assert_eq!(config.max_upload_bytes, 1024);
        assert_eq!(config.upload_temp_dir, PathBuf::from("/spool"));
    }

    #[test]
    fn missing_database_path_is_an_error() {
        let vars = read_env_file(make_config("MEDIA_UPLOAD_URL=\"https://m\"\n").path()).unwrap();
        let err = build_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("DATABASE_PATH"));
    }

    #[test]
    fn missing_media_url_is_an_error() {
        let vars = read_env_file(make_config("DATABASE_PATH=\"/db\"\n").path()).unwrap();
        let err = build_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("MEDIA_UPLOAD_URL"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config(BASE).path()).unwrap();
        let config = build_config(&vars, |key| {
            if key == "DATABASE_PATH" {
                Some("/env.db".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/env.db"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let vars = read_env_file(make_config(&format!("{BASE}VIDEOTUBE_PORT=7000\n")).path())
            .unwrap();
        let config = build_config_with_overrides(
            &vars,
            |key| match key {
                "VIDEOTUBE_PORT" => Some("8000".to_string()),
                "VIDEOTUBE_HOST" => Some("env-host".to_string()),
                _ => None,
            },
            ConfigOverrides {
                database_path: Some(PathBuf::from("/override.db")),
                port: Some(9000),
                media_upload_url: Some("https://override/upload".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/override.db"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "env-host");
        assert_eq!(config.media.upload_url, "https://override/upload");
    }

    #[test]
    fn blank_host_override_falls_back_to_default() {
        let vars = read_env_file(make_config(BASE).path()).unwrap();
        let config = build_config_with_overrides(
            &vars,
            |_| None,
            ConfigOverrides {
                host: Some("   ".into()),
                ..ConfigOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&format!(
            "{BASE}VIDEOTUBE_PORT=nope\nMAX_UPLOAD_BYTES=lots\nMEDIA_UPLOAD_TIMEOUT_SECS=-1\n"
        ));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(
            config.media.timeout,
            Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS)
        );
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            "export DATABASE_PATH=\"/db\"\nMEDIA_UPLOAD_URL='https://m/upload'\n# comment\n",
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("DATABASE_PATH").unwrap(), "/db");
        assert_eq!(vars.get("MEDIA_UPLOAD_URL").unwrap(), "https://m/upload");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
