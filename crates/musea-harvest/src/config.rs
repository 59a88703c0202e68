//! Harvest configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `MUSEA_*` environment variables, then [`HarvestConfig::validate`].
//!
//! ```toml
//! data_dir = "/srv/musea"
//! max_workers = 2
//!
//! [sources.met]
//! max_downloads = 500
//! requests_per_second = 5.0
//!
//! [sources.met.query]
//! q = "sunflowers"
//! hasImages = "true"
//!
//! [sources.cma-dump]
//! enabled = true
//! dump_dir = "/srv/dumps/cma"
//! ```
//!
//! Environment variables:
//! - `MUSEA_DATA_DIR`, `MUSEA_DATABASE_URL`, `MUSEA_MAX_WORKERS`
//! - per source, with `<CODE>` one of `AIC`, `MET`, `CMA`, `CMA_DUMP`:
//!   `MUSEA_<CODE>_ENABLED`, `MUSEA_<CODE>_BASE_URL`, `MUSEA_<CODE>_RATE_LIMIT`,
//!   `MUSEA_<CODE>_MAX_RETRIES`, `MUSEA_<CODE>_MAX_DOWNLOADS`,
//!   `MUSEA_<CODE>_MAX_STORAGE_BYTES`, `MUSEA_<CODE>_DUMP_DIR`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HarvestError, Result};
use crate::http::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use crate::model::SourceCode;
use crate::naming::DEFAULT_MAX_FILENAME_BYTES;
use crate::orchestrator::{RunPolicy, DEFAULT_CONSECUTIVE_ERROR_THRESHOLD, DEFAULT_ERROR_RETRY_DELAY_SECS};
use crate::sources::id_list::DEFAULT_CANDIDATE_TTL_HOURS;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MAX_WORKERS: usize = 3;
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 1.0;
pub const DEFAULT_DATABASE_FILE: &str = "musea.db";

pub const DEFAULT_AIC_BASE_URL: &str = "https://api.artic.edu/api/v1";
pub const DEFAULT_AIC_IMAGE_BASE_URL: &str = "https://www.artic.edu/iiif/2";
pub const DEFAULT_MET_BASE_URL: &str = "https://collectionapi.metmuseum.org/public/collection/v1";
pub const DEFAULT_CMA_BASE_URL: &str = "https://openaccess-api.clevelandart.org/api";

const PROGRESS_FILE: &str = "progress.json";
const CANDIDATES_FILE: &str = "candidates.json";
const IMAGES_DIR: &str = "images";

/// Settings for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub enabled: bool,
    pub base_url: String,
    /// IIIF image server (page sources only)
    pub image_base_url: Option<String>,
    pub user_agent: String,
    pub requests_per_second: f64,
    pub max_retries: u32,
    pub error_retry_delay_secs: u64,
    pub timeout_secs: u64,
    pub max_downloads: Option<u64>,
    pub max_storage_bytes: Option<u64>,
    pub consecutive_error_threshold: u32,
    pub candidate_cache_ttl_hours: u64,
    /// Local dump directory (`cma-dump` only)
    pub dump_dir: Option<PathBuf>,
    /// Listing query parameters
    pub query: BTreeMap<String, String>,
}

impl SourceConfig {
    /// Built-in defaults for a source
    pub fn defaults(code: SourceCode) -> Self {
        let base = Self {
            enabled: true,
            base_url: String::new(),
            image_base_url: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_retries: DEFAULT_MAX_RETRIES,
            error_retry_delay_secs: DEFAULT_ERROR_RETRY_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_downloads: None,
            max_storage_bytes: None,
            consecutive_error_threshold: DEFAULT_CONSECUTIVE_ERROR_THRESHOLD,
            candidate_cache_ttl_hours: DEFAULT_CANDIDATE_TTL_HOURS,
            dump_dir: None,
            query: BTreeMap::new(),
        };

        match code {
            SourceCode::Aic => Self {
                base_url: DEFAULT_AIC_BASE_URL.to_string(),
                image_base_url: Some(DEFAULT_AIC_IMAGE_BASE_URL.to_string()),
                ..base
            },
            SourceCode::Met => Self {
                base_url: DEFAULT_MET_BASE_URL.to_string(),
                query: BTreeMap::from([
                    ("q".to_string(), "*".to_string()),
                    ("hasImages".to_string(), "true".to_string()),
                ]),
                ..base
            },
            SourceCode::Cma => Self {
                base_url: DEFAULT_CMA_BASE_URL.to_string(),
                query: BTreeMap::from([
                    ("cc0".to_string(), "1".to_string()),
                    ("has_image".to_string(), "1".to_string()),
                ]),
                ..base
            },
            SourceCode::CmaDump => Self {
                enabled: false,
                ..base
            },
        }
    }

    /// Pause between requests derived from the rate limit
    pub fn request_delay(&self) -> Duration {
        if self.requests_per_second <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn candidate_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.candidate_cache_ttl_hours * 3600)
    }

    fn validate(&self, code: SourceCode) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if code == SourceCode::CmaDump {
            if self.dump_dir.is_none() {
                return Err(HarvestError::config(format!(
                    "{}: dump_dir is required when the source is enabled",
                    code
                )));
            }
        } else if self.base_url.trim().is_empty() {
            return Err(HarvestError::config(format!("{}: base_url must not be empty", code)));
        }
        if !self.requests_per_second.is_finite() || self.requests_per_second <= 0.0 {
            return Err(HarvestError::config(format!(
                "{}: requests_per_second must be greater than 0",
                code
            )));
        }
        if self.consecutive_error_threshold == 0 {
            return Err(HarvestError::config(format!(
                "{}: consecutive_error_threshold must be greater than 0",
                code
            )));
        }
        if self.timeout_secs == 0 {
            return Err(HarvestError::config(format!("{}: timeout_secs must be greater than 0", code)));
        }
        Ok(())
    }
}

/// Partial per-source settings read from a config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceOverrides {
    pub enabled: Option<bool>,
    pub base_url: Option<String>,
    pub image_base_url: Option<String>,
    pub user_agent: Option<String>,
    pub requests_per_second: Option<f64>,
    pub max_retries: Option<u32>,
    pub error_retry_delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub max_downloads: Option<u64>,
    pub max_storage_bytes: Option<u64>,
    pub consecutive_error_threshold: Option<u32>,
    pub candidate_cache_ttl_hours: Option<u64>,
    pub dump_dir: Option<PathBuf>,
    /// Replaces the default query when present
    pub query: Option<BTreeMap<String, String>>,
}

impl SourceOverrides {
    fn apply(self, config: &mut SourceConfig) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field {
                    config.$field = value;
                })*
            };
        }
        set!(
            enabled,
            base_url,
            user_agent,
            requests_per_second,
            max_retries,
            error_retry_delay_secs,
            timeout_secs,
            consecutive_error_threshold,
            candidate_cache_ttl_hours,
            query
        );
        if self.image_base_url.is_some() {
            config.image_base_url = self.image_base_url;
        }
        if self.max_downloads.is_some() {
            config.max_downloads = self.max_downloads;
        }
        if self.max_storage_bytes.is_some() {
            config.max_storage_bytes = self.max_storage_bytes;
        }
        if self.dump_dir.is_some() {
            config.dump_dir = self.dump_dir;
        }
    }
}

/// Shape of the TOML config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub max_workers: Option<usize>,
    pub filename_max_len: Option<usize>,
    /// Keyed by source code (`aic`, `met`, `cma`, `cma-dump`)
    pub sources: BTreeMap<String, SourceOverrides>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarvestConfig {
    pub data_dir: PathBuf,
    /// `sqlite:` URL; defaults to `data_dir/musea.db`
    pub database_url: Option<String>,
    /// Sources harvested concurrently
    pub max_workers: usize,
    pub filename_max_len: usize,
    pub sources: BTreeMap<SourceCode, SourceConfig>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_url: None,
            max_workers: DEFAULT_MAX_WORKERS,
            filename_max_len: DEFAULT_MAX_FILENAME_BYTES,
            sources: SourceCode::ALL
                .iter()
                .map(|&code| (code, SourceConfig::defaults(code)))
                .collect(),
        }
    }
}

impl HarvestConfig {
    /// Defaults, then `path` (if given), then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = path {
            config.merge_file(path)?;
        }
        config.merge_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        self.merge_toml(&text)
            .map_err(|e| HarvestError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn merge_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| HarvestError::config(format!("invalid config: {}", e)))?;

        if let Some(dir) = file.data_dir {
            self.data_dir = dir;
        }
        if file.database_url.is_some() {
            self.database_url = file.database_url;
        }
        if let Some(workers) = file.max_workers {
            self.max_workers = workers;
        }
        if let Some(len) = file.filename_max_len {
            self.filename_max_len = len;
        }
        for (key, overrides) in file.sources {
            let code: SourceCode = key
                .parse()
                .map_err(|_| HarvestError::config(format!("unknown source {:?}", key)))?;
            overrides.apply(self.sources.entry(code).or_insert_with(|| SourceConfig::defaults(code)));
        }
        Ok(())
    }

    /// Apply `MUSEA_*` overrides read through `lookup`
    pub fn merge_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("MUSEA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("MUSEA_DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(workers) = lookup("MUSEA_MAX_WORKERS") {
            self.max_workers = parse_env("MUSEA_MAX_WORKERS", &workers)?;
        }

        for code in SourceCode::ALL {
            let prefix = code.env_prefix();
            let var = |name: &str| {
                let key = format!("{}{}", prefix, name);
                lookup(&key).map(|value| (key, value))
            };
            let source = self.sources.entry(code).or_insert_with(|| SourceConfig::defaults(code));

            if let Some((key, value)) = var("ENABLED") {
                source.enabled = parse_env(&key, &value)?;
            }
            if let Some((_, value)) = var("BASE_URL") {
                source.base_url = value;
            }
            if let Some((key, value)) = var("RATE_LIMIT") {
                source.requests_per_second = parse_env(&key, &value)?;
            }
            if let Some((key, value)) = var("MAX_RETRIES") {
                source.max_retries = parse_env(&key, &value)?;
            }
            if let Some((key, value)) = var("MAX_DOWNLOADS") {
                source.max_downloads = Some(parse_env(&key, &value)?);
            }
            if let Some((key, value)) = var("MAX_STORAGE_BYTES") {
                source.max_storage_bytes = Some(parse_env(&key, &value)?);
            }
            if let Some((_, value)) = var("DUMP_DIR") {
                source.dump_dir = Some(PathBuf::from(value));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(HarvestError::config("max_workers must be greater than 0"));
        }
        if self.filename_max_len < 32 {
            return Err(HarvestError::config("filename_max_len must be at least 32"));
        }
        for (code, source) in &self.sources {
            source.validate(*code)?;
        }
        Ok(())
    }

    pub fn source(&self, code: SourceCode) -> Result<&SourceConfig> {
        self.sources
            .get(&code)
            .ok_or_else(|| HarvestError::config(format!("no configuration for source {}", code)))
    }

    pub fn source_mut(&mut self, code: SourceCode) -> &mut SourceConfig {
        self.sources.entry(code).or_insert_with(|| SourceConfig::defaults(code))
    }

    /// Enabled sources in code order
    pub fn enabled_sources(&self) -> Vec<SourceCode> {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(code, _)| *code)
            .collect()
    }

    pub fn source_dir(&self, code: SourceCode) -> PathBuf {
        self.data_dir.join(code.as_str())
    }

    pub fn progress_path(&self, code: SourceCode) -> PathBuf {
        self.source_dir(code).join(PROGRESS_FILE)
    }

    pub fn candidates_path(&self, code: SourceCode) -> PathBuf {
        self.source_dir(code).join(CANDIDATES_FILE)
    }

    pub fn images_dir(&self, code: SourceCode) -> PathBuf {
        self.source_dir(code).join(IMAGES_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_DATABASE_FILE)
    }

    pub fn run_policy(&self, code: SourceCode) -> Result<RunPolicy> {
        let source = self.source(code)?;
        Ok(RunPolicy {
            request_delay: source.request_delay(),
            error_retry_delay: Duration::from_secs(source.error_retry_delay_secs),
            consecutive_error_threshold: source.consecutive_error_threshold,
            max_downloads: source.max_downloads,
            max_storage_bytes: source.max_storage_bytes,
            max_filename_bytes: self.filename_max_len,
        })
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| HarvestError::config(format!("{}: invalid value {:?}: {}", key, value, e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = HarvestConfig::default();
        config.validate().unwrap();

        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.enabled_sources(), vec![SourceCode::Aic, SourceCode::Met, SourceCode::Cma]);
        assert_eq!(config.progress_path(SourceCode::Met), PathBuf::from("./data/met/progress.json"));
        assert_eq!(config.images_dir(SourceCode::CmaDump), PathBuf::from("./data/cma-dump/images"));
        assert_eq!(
            config.source(SourceCode::Aic).unwrap().request_delay(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_toml_overrides() {
        let mut config = HarvestConfig::default();
        config
            .merge_toml(
                r#"
                data_dir = "/srv/musea"
                max_workers = 2

                [sources.met]
                max_downloads = 50
                requests_per_second = 4.0

                [sources.met.query]
                q = "sunflowers"

                [sources.cma-dump]
                enabled = true
                dump_dir = "/srv/dumps"
                "#,
            )
            .unwrap();
        config.validate().unwrap();

        let met = config.source(SourceCode::Met).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/musea"));
        assert_eq!(config.max_workers, 2);
        assert_eq!(met.max_downloads, Some(50));
        assert_eq!(met.request_delay(), Duration::from_millis(250));
        assert_eq!(met.query, BTreeMap::from([("q".to_string(), "sunflowers".to_string())]));
        assert!(config.enabled_sources().contains(&SourceCode::CmaDump));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut config = HarvestConfig::default();
        assert!(config.merge_toml("[sources.aic]\nrate = 3").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = HarvestConfig::default();
        config
            .merge_env_with(env(&[
                ("MUSEA_DATA_DIR", "/tmp/harvest"),
                ("MUSEA_AIC_ENABLED", "false"),
                ("MUSEA_CMA_RATE_LIMIT", "2"),
                ("MUSEA_CMA_DUMP_DUMP_DIR", "/dumps"),
                ("MUSEA_MET_MAX_STORAGE_BYTES", "1048576"),
            ]))
            .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/harvest"));
        assert!(!config.source(SourceCode::Aic).unwrap().enabled);
        assert_eq!(config.source(SourceCode::Cma).unwrap().requests_per_second, 2.0);
        assert_eq!(
            config.source(SourceCode::CmaDump).unwrap().dump_dir,
            Some(PathBuf::from("/dumps"))
        );
        assert_eq!(config.source(SourceCode::Met).unwrap().max_storage_bytes, Some(1_048_576));
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let mut config = HarvestConfig::default();
        let err = config
            .merge_env_with(env(&[("MUSEA_MET_MAX_DOWNLOADS", "lots")]))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("MUSEA_MET_MAX_DOWNLOADS"));
    }

    #[test]
    fn test_validation() {
        let mut config = HarvestConfig::default();
        config.source_mut(SourceCode::CmaDump).enabled = true;
        assert!(config.validate().is_err());

        let mut config = HarvestConfig::default();
        config.source_mut(SourceCode::Met).consecutive_error_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = HarvestConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_policy() {
        let mut config = HarvestConfig::default();
        config.source_mut(SourceCode::Cma).max_downloads = Some(10);

        let policy = config.run_policy(SourceCode::Cma).unwrap();
        assert_eq!(policy.max_downloads, Some(10));
        assert_eq!(policy.error_retry_delay, Duration::from_secs(DEFAULT_ERROR_RETRY_DELAY_SECS));
        assert_eq!(policy.max_filename_bytes, DEFAULT_MAX_FILENAME_BYTES);
    }
}
