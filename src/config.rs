use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::media::DEFAULT_MAX_WIDTH;
use crate::reddit::DEFAULT_BASE_URL;
use crate::storage::DEFAULT_OUTPUT_DIR;

const DEFAULT_ENV_PREFIX: &str = "REDDIT_IMAGE_FEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_subreddit")]
    pub subreddit: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            base_url: default_base_url(),
            subreddit: default_subreddit(),
            limit: default_limit(),
            timeout: default_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("reddit-image-feed/{}", crate::VERSION)
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_subreddit() -> String {
    "archlinux".into()
}

fn default_limit() -> usize {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_width: default_max_width(),
            workers: default_workers(),
            timeout: default_timeout(),
        }
    }
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_workers() -> usize {
    4
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub download: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            download: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        // an explicit path must exist
        let from_file = read_config_file(path)?;
        cfg = merge_config(cfg, from_file);
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.reddit.user_agent.is_empty() {
        base.reddit.user_agent = other.reddit.user_agent;
    }
    if !other.reddit.base_url.is_empty() {
        base.reddit.base_url = other.reddit.base_url;
    }
    if !other.reddit.subreddit.is_empty() {
        base.reddit.subreddit = other.reddit.subreddit;
    }
    if other.reddit.limit != 0 {
        base.reddit.limit = other.reddit.limit;
    }
    base.reddit.timeout = other.reddit.timeout;

    if other.media.max_width != 0 {
        base.media.max_width = other.media.max_width;
    }
    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    base.media.timeout = other.media.timeout;

    if !other.storage.output_dir.as_os_str().is_empty() {
        base.storage.output_dir = other.storage.output_dir;
    }
    base.storage.download = other.storage.download;

    base
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.base_url" => cfg.reddit.base_url = value,
        "reddit.subreddit" => cfg.reddit.subreddit = value,
        "reddit.limit" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.reddit.limit = parsed;
            }
        }
        "reddit.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.timeout = duration;
            }
        }
        "media.max_width" => {
            if let Ok(parsed) = value.parse::<u32>() {
                cfg.media.max_width = parsed;
            }
        }
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.media.timeout = duration;
            }
        }
        "storage.output_dir" => cfg.storage.output_dir = PathBuf::from(value),
        "storage.download" => {
            cfg.storage.download = matches!(value.as_str(), "1" | "true" | "TRUE" | "True");
        }
        _ => {}
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reddit-image-feed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_cli_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.reddit.subreddit, "archlinux");
        assert_eq!(cfg.reddit.limit, 25);
        assert_eq!(cfg.media.max_width, 400);
        assert_eq!(cfg.storage.output_dir, PathBuf::from("imgDls"));
        assert!(!cfg.storage.download);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "reddit:\n  subreddit: unixporn\n  timeout: 10s\nmedia:\n  workers: 2\n  timeout: 5s\nstorage:\n  download: true\n",
        )
        .unwrap();

        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("RIF_TEST_FILE".into()),
        })
        .unwrap();

        assert_eq!(cfg.reddit.subreddit, "unixporn");
        assert_eq!(cfg.reddit.limit, 25);
        assert_eq!(cfg.media.workers, 2);
        assert_eq!(cfg.media.timeout, Duration::from_secs(5));
        assert_eq!(cfg.reddit.timeout, Duration::from_secs(10));
        assert!(cfg.storage.download);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let result = load(LoadOptions {
            config_file: Some(dir.path().join("absent.yaml")),
            env_prefix: Some("RIF_TEST_MISSING".into()),
        });
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "media:\n  max_width: 320\n").unwrap();
        env::set_var("RIF_TEST_ENV_MEDIA__MAX_WIDTH", "640");
        env::set_var("RIF_TEST_ENV_MEDIA__TIMEOUT", "2m");
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("RIF_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.media.max_width, 640);
        assert_eq!(cfg.media.timeout, Duration::from_secs(120));
        assert_eq!(cfg.reddit.timeout, Duration::from_secs(30));
        env::remove_var("RIF_TEST_ENV_MEDIA__MAX_WIDTH");
        env::remove_var("RIF_TEST_ENV_MEDIA__TIMEOUT");
    }
}
