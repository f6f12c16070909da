//! Configuration management for Notebridge
//!
//! Settings come from a TOML file and from environment variables, with the
//! environment taking priority. Every required key that is missing from
//! both is reported in a single error.
//!
//! ```toml
//! [misskey]
//! instance = "https://misskey.io"
//! token = "..."
//! user_id = "9abcdefghi"
//!
//! [mastodon]
//! instance = "https://mastodon.social"
//! token = "..."
//!
//! [sync]
//! fetch_limit = 20
//! crosspost_delay = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::types::NoteId;

pub const DEFAULT_FETCH_LIMIT: u32 = 20;
/// `users/notes` rejects larger limits
pub const MAX_FETCH_LIMIT: u32 = 100;
pub const DEFAULT_CROSSPOST_DELAY_SECS: u64 = 2;
pub const DEFAULT_ATTACHMENT_DELAY_SECS: u64 = 1;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MEDIA_PROCESSING_TIMEOUT_SECS: u64 = 60;

#[derive(Debug)]
pub struct Config {
    pub misskey: MisskeyConfig,
    pub mastodon: MastodonConfig,
    pub sync: SyncConfig,
}

#[derive(Debug)]
pub struct MisskeyConfig {
    pub instance: String,
    pub token: SecretString,
    pub user_id: String,
}

#[derive(Debug)]
pub struct MastodonConfig {
    pub instance: String,
    pub token: SecretString,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub fetch_limit: u32,
    /// Starting cursor; the persisted state wins when this is unset
    pub since_id: Option<NoteId>,
    pub crosspost_delay: Duration,
    pub attachment_delay: Duration,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub request_timeout: Duration,
    /// How long to wait for uploaded video and large images to finish processing
    pub media_processing_timeout: Duration,
    pub state_file: PathBuf,
}

/// On-disk layout; everything optional so the environment can fill gaps
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub misskey: MisskeySection,
    pub mastodon: MastodonSection,
    pub sync: SyncSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MisskeySection {
    pub instance: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MastodonSection {
    pub instance: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub fetch_limit: Option<u32>,
    pub since_id: Option<String>,
    pub crosspost_delay: Option<u64>,
    pub attachment_delay: Option<u64>,
    pub poll_interval: Option<u64>,
    pub error_backoff: Option<u64>,
    pub request_timeout: Option<u64>,
    pub media_processing_timeout: Option<u64>,
    pub state_file: Option<String>,
}

impl FileConfig {
    /// Read a config file. A file that does not exist yields an empty
    /// config; one that exists but cannot be read or parsed is an error.
    pub fn read(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::ReadError(e).into()),
        };
        let config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }
}

impl Config {
    /// Load from `path` (or the default location) plus the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => resolve_config_path()?,
        };
        let file = FileConfig::read(&path)?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup and validate
    pub fn from_sources<F>(file: FileConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as missing wherever they come from
        let present = |v: &String| !v.trim().is_empty();
        let pick = |var: &str, fallback: Option<String>| {
            env(var).filter(present).or(fallback.filter(present))
        };

        let misskey_instance = pick("MISSKEY_INSTANCE", file.misskey.instance);
        let misskey_token = pick("MISSKEY_TOKEN", file.misskey.token);
        let misskey_user_id = pick("MISSKEY_USER_ID", file.misskey.user_id);
        let mastodon_instance = pick("MASTODON_INSTANCE", file.mastodon.instance);
        let mastodon_token = pick("MASTODON_TOKEN", file.mastodon.token);

        let missing: Vec<String> = [
            ("misskey.instance", &misskey_instance),
            ("misskey.token", &misskey_token),
            ("misskey.user_id", &misskey_user_id),
            ("mastodon.instance", &mastodon_instance),
            ("mastodon.token", &mastodon_token),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(key, _)| key.to_string())
        .collect();

        // Each Option is Some past this point
        let (
            Some(misskey_instance),
            Some(misskey_token),
            Some(misskey_user_id),
            Some(mastodon_instance),
            Some(mastodon_token),
        ) = (
            misskey_instance,
            misskey_token,
            misskey_user_id,
            mastodon_instance,
            mastodon_token,
        )
        else {
            return Err(ConfigError::MissingFields(missing).into());
        };

        let fetch_limit = match env("FETCH_LIMIT") {
            Some(raw) => parse_number::<u32>("FETCH_LIMIT", &raw)?,
            None => file.sync.fetch_limit.unwrap_or(DEFAULT_FETCH_LIMIT),
        };
        if !(1..=MAX_FETCH_LIMIT).contains(&fetch_limit) {
            return Err(ConfigError::Invalid(format!(
                "sync.fetch_limit must be between 1 and {} (got {})",
                MAX_FETCH_LIMIT, fetch_limit
            ))
            .into());
        }

        let crosspost_delay = match env("CROSSPOST_DELAY") {
            Some(raw) => parse_number::<u64>("CROSSPOST_DELAY", &raw)?,
            None => file.sync.crosspost_delay.unwrap_or(DEFAULT_CROSSPOST_DELAY_SECS),
        };

        let request_timeout = at_least_one_second(
            "sync.request_timeout",
            file.sync.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        )?;
        let poll_interval = at_least_one_second(
            "sync.poll_interval",
            file.sync.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )?;
        let error_backoff = at_least_one_second(
            "sync.error_backoff",
            file.sync.error_backoff.unwrap_or(DEFAULT_ERROR_BACKOFF_SECS),
        )?;
        let media_processing_timeout = at_least_one_second(
            "sync.media_processing_timeout",
            file.sync
                .media_processing_timeout
                .unwrap_or(DEFAULT_MEDIA_PROCESSING_TIMEOUT_SECS),
        )?;

        let state_file = match file.sync.state_file {
            Some(path) => PathBuf::from(shellexpand::tilde(&path).to_string()),
            None => resolve_data_path()?.join("state.json"),
        };

        Ok(Self {
            misskey: MisskeyConfig {
                instance: normalize_instance_url(&misskey_instance),
                token: SecretString::from(misskey_token.trim().to_string()),
                user_id: misskey_user_id.trim().to_string(),
            },
            mastodon: MastodonConfig {
                instance: normalize_instance_url(&mastodon_instance),
                token: SecretString::from(mastodon_token.trim().to_string()),
            },
            sync: SyncConfig {
                fetch_limit,
                since_id: file
                    .sync
                    .since_id
                    .filter(|id| !id.trim().is_empty())
                    .map(NoteId::from),
                crosspost_delay: Duration::from_secs(crosspost_delay),
                attachment_delay: Duration::from_secs(
                    file.sync
                        .attachment_delay
                        .unwrap_or(DEFAULT_ATTACHMENT_DELAY_SECS),
                ),
                poll_interval,
                error_backoff,
                request_timeout,
                media_processing_timeout,
                state_file,
            },
        })
    }
}

fn at_least_one_second(key: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(ConfigError::Invalid(format!("{} must be at least 1 second", key)).into());
    }
    Ok(Duration::from_secs(secs))
}

fn parse_number<T: std::str::FromStr>(var: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        ConfigError::Invalid(format!("{} must be a non-negative integer (got '{}')", var, raw))
            .into()
    })
}

/// Prefix `https://` when no scheme is given and drop trailing slashes
pub fn normalize_instance_url(instance: &str) -> String {
    let instance = instance.trim().trim_end_matches('/');
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("NOTEBRIDGE_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::Invalid("no config directory for this user".to_string()))?;

    Ok(config_dir.join("notebridge").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::Invalid("no data directory for this user".to_string()))?;

    Ok(data_dir.join("notebridge"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::collections::HashMap;

    fn full_file() -> FileConfig {
        toml::from_str(
            r#"
[misskey]
instance = "misskey.example/"
token = "mk-token"
user_id = "9abc"

[mastodon]
instance = "https://mastodon.example"
token = "md-token"

[sync]
state_file = "/tmp/notebridge-test/state.json"
"#,
        )
        .unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_sources(full_file(), no_env).unwrap();
        assert_eq!(config.sync.fetch_limit, 20);
        assert_eq!(config.sync.crosspost_delay, Duration::from_secs(2));
        assert_eq!(config.sync.attachment_delay, Duration::from_secs(1));
        assert_eq!(config.sync.poll_interval, Duration::from_secs(5));
        assert_eq!(config.sync.error_backoff, Duration::from_secs(30));
        assert_eq!(config.sync.request_timeout, Duration::from_secs(10));
        assert_eq!(config.sync.media_processing_timeout, Duration::from_secs(60));
        assert!(config.sync.since_id.is_none());
        assert_eq!(
            config.sync.state_file,
            PathBuf::from("/tmp/notebridge-test/state.json")
        );
    }

    #[test]
    fn test_instance_urls_normalized() {
        let config = Config::from_sources(full_file(), no_env).unwrap();
        assert_eq!(config.misskey.instance, "https://misskey.example");
        assert_eq!(config.mastodon.instance, "https://mastodon.example");
    }

    #[test]
    fn test_http_scheme_preserved() {
        assert_eq!(normalize_instance_url("http://localhost:3000/"), "http://localhost:3000");
    }

    #[test]
    fn test_missing_fields_all_reported() {
        let err = Config::from_sources(FileConfig::default(), no_env).unwrap_err();
        match err {
            BridgeError::Config(ConfigError::MissingFields(fields)) => {
                assert_eq!(
                    fields,
                    vec![
                        "misskey.instance",
                        "misskey.token",
                        "misskey.user_id",
                        "mastodon.instance",
                        "mastodon.token",
                    ]
                );
            }
            other => panic!("Expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_environment_fills_and_overrides() {
        let mut file = full_file();
        file.mastodon.token = None;

        let env: HashMap<&str, &str> = [
            ("MASTODON_TOKEN", "env-token"),
            ("MISSKEY_USER_ID", "9env"),
            ("FETCH_LIMIT", "50"),
            ("CROSSPOST_DELAY", "0"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::from_sources(file, |key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.mastodon.token.expose_secret(), "env-token");
        assert_eq!(config.misskey.user_id, "9env");
        assert_eq!(config.sync.fetch_limit, 50);
        assert_eq!(config.sync.crosspost_delay, Duration::ZERO);
    }

    #[test]
    fn test_blank_file_values_reported_missing() {
        let file: FileConfig = toml::from_str(
            r#"
[misskey]
instance = ""
token = "  "
user_id = ""

[mastodon]
instance = "https://mastodon.example"
token = ""
"#,
        )
        .unwrap();

        match Config::from_sources(file, no_env).unwrap_err() {
            BridgeError::Config(ConfigError::MissingFields(fields)) => {
                assert_eq!(
                    fields,
                    vec![
                        "misskey.instance",
                        "misskey.token",
                        "misskey.user_id",
                        "mastodon.token",
                    ]
                );
            }
            other => panic!("Expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut file = full_file();
        file.sync.poll_interval = Some(0);
        let err = Config::from_sources(file, no_env).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("sync.poll_interval"));
    }

    #[test]
    fn test_zero_error_backoff_rejected() {
        let mut file = full_file();
        file.sync.error_backoff = Some(0);
        let err = Config::from_sources(file, no_env).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::Invalid(_))));
        assert!(err.to_string().contains("sync.error_backoff"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut file = full_file();
        file.sync.request_timeout = Some(0);
        assert!(Config::from_sources(file, no_env)
            .unwrap_err()
            .to_string()
            .contains("sync.request_timeout"));

        let mut file = full_file();
        file.sync.media_processing_timeout = Some(0);
        assert!(Config::from_sources(file, no_env)
            .unwrap_err()
            .to_string()
            .contains("sync.media_processing_timeout"));
    }

    #[test]
    fn test_zero_delays_allowed() {
        let mut file = full_file();
        file.sync.attachment_delay = Some(0);
        file.sync.crosspost_delay = Some(0);
        let config = Config::from_sources(file, no_env).unwrap();
        assert_eq!(config.sync.attachment_delay, Duration::ZERO);
        assert_eq!(config.sync.crosspost_delay, Duration::ZERO);
    }

    #[test]
    fn test_blank_environment_value_ignored() {
        let config = Config::from_sources(full_file(), |key| {
            (key == "MISSKEY_TOKEN").then(|| "   ".to_string())
        })
        .unwrap();
        assert_eq!(config.misskey.token.expose_secret(), "mk-token");
    }

    #[test]
    fn test_invalid_fetch_limit_rejected() {
        let err = Config::from_sources(full_file(), |key| {
            (key == "FETCH_LIMIT").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("FETCH_LIMIT"));

        let mut file = full_file();
        file.sync.fetch_limit = Some(0);
        assert!(Config::from_sources(file, no_env).is_err());

        let mut file = full_file();
        file.sync.fetch_limit = Some(101);
        assert!(Config::from_sources(file, no_env).is_err());
    }

    #[test]
    fn test_starting_cursor_from_file() {
        let mut file = full_file();
        file.sync.since_id = Some("9kq2a1b0c0".to_string());
        let config = Config::from_sources(file, no_env).unwrap();
        assert_eq!(config.sync.since_id, Some(NoteId::new("9kq2a1b0c0")));
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = FileConfig::read(&dir.path().join("absent.toml")).unwrap();
        assert!(file.misskey.instance.is_none());
    }

    #[test]
    fn test_read_invalid_toml_is_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[misskey\ninstance = ").unwrap();
        let err = FileConfig::read(&path).unwrap_err();
        assert!(matches!(err, BridgeError::Config(ConfigError::ParseError(_))));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var("NOTEBRIDGE_CONFIG", "/tmp/notebridge/custom.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("NOTEBRIDGE_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/notebridge/custom.toml"));
    }

    #[test]
    #[serial]
    fn test_load_reads_file_and_process_env() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[misskey]
instance = "https://misskey.example"
token = "mk"
user_id = "9abc"

[mastodon]
instance = "https://mastodon.example"
"#,
        )
        .unwrap();

        std::env::set_var("MASTODON_TOKEN", "from-env");
        let result = Config::load(Some(&path));
        std::env::remove_var("MASTODON_TOKEN");

        let config = result.unwrap();
        assert_eq!(config.mastodon.token.expose_secret(), "from-env");
    }
}
