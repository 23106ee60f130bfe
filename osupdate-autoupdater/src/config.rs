//! Autoupdate policy configuration.
//!
//! The policy lives in a YAML file with a single `Automatic Updates` group:
//!
//! ```yaml
//! Automatic Updates:
//!   LastAutomaticStep: 3      # 0 none, 1 poll, 2 fetch, 3 apply
//!   IntervalDays: 7
//!   RandomizedDelayDays: 2
//!   UpdateOnMobile: false
//! ```
//!
//! Every key is required. The first existing file on the search path wins.

use std::path::{Path, PathBuf};

use osupdate_ipc::UpdateStep;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::schedule::SECS_PER_DAY;

/// Administrator configuration.
pub const CONFIG_FILE_PATH: &str = "/etc/osupdate/autoupdater.conf";

/// Site-local defaults.
pub const LOCAL_CONFIG_FILE_PATH: &str = "/usr/local/share/osupdate/autoupdater.conf";

/// Distribution defaults.
pub const STATIC_CONFIG_FILE_PATH: &str = "/usr/share/osupdate/autoupdater.conf";

/// Largest randomized delay, so the delay in seconds fits an `i32`.
pub const MAX_RANDOMIZED_DELAY_DAYS: i64 = i32::MAX as i64 / SECS_PER_DAY as i64 - 1;

/// Largest interval, so a stamp plus the interval stays a valid time.
pub const MAX_INTERVAL_DAYS: u64 = i32::MAX as u64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (searched {})", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("Unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing group 'Automatic Updates' in configuration")]
    MissingGroup,

    #[error("Unable to read key '{0}' in configuration")]
    MissingKey(&'static str),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Validated autoupdate policy. Immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoupdateConfig {
    /// Last step the autoupdater may take without a user
    pub last_automatic_step: UpdateStep,
    /// Minimum days between runs
    pub interval_days: u64,
    /// Upper bound of the random delay added when stamping
    pub randomized_delay_days: u32,
    /// Whether to update over metered connections
    pub update_on_mobile: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(rename = "Automatic Updates")]
    automatic_updates: Option<RawAutomaticUpdates>,
}

/// Signed and optional so missing and negative values are reported rather
/// than rejected by the deserializer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAutomaticUpdates {
    last_automatic_step: Option<i64>,
    interval_days: Option<i64>,
    randomized_delay_days: Option<i64>,
    update_on_mobile: Option<bool>,
}

impl AutoupdateConfig {
    /// Load the first existing file from `paths`.
    pub fn load_first(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        let path = paths
            .iter()
            .find(|p| p.exists())
            .ok_or_else(|| ConfigError::NotFound {
                searched: paths.to_vec(),
            })?;

        info!(path = %path.display(), "Loading autoupdater configuration");
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let raw: RawConfig = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::from_raw(raw)?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let group = raw.automatic_updates.ok_or(ConfigError::MissingGroup)?;

        let last_step = group
            .last_automatic_step
            .ok_or(ConfigError::MissingKey("LastAutomaticStep"))?;
        let last_automatic_step =
            UpdateStep::from_rank(last_step).ok_or_else(|| ConfigError::InvalidValue {
                field: "LastAutomaticStep",
                message: format!(
                    "{last_step} is not a valid step ({}-{})",
                    UpdateStep::FIRST.rank(),
                    UpdateStep::LAST.rank()
                ),
            })?;

        let interval_days = group
            .interval_days
            .ok_or(ConfigError::MissingKey("IntervalDays"))?;
        let interval_days = u64::try_from(interval_days)
            .ok()
            .filter(|days| *days <= MAX_INTERVAL_DAYS)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "IntervalDays",
                message: format!("{interval_days} is less than zero or greater than {MAX_INTERVAL_DAYS}"),
            })?;

        let delay = group
            .randomized_delay_days
            .ok_or(ConfigError::MissingKey("RandomizedDelayDays"))?;
        if !(0..=MAX_RANDOMIZED_DELAY_DAYS).contains(&delay) {
            return Err(ConfigError::InvalidValue {
                field: "RandomizedDelayDays",
                message: format!("{delay} is less than zero or greater than {MAX_RANDOMIZED_DELAY_DAYS}"),
            });
        }

        let update_on_mobile = group
            .update_on_mobile
            .ok_or(ConfigError::MissingKey("UpdateOnMobile"))?;

        Ok(Self {
            last_automatic_step,
            interval_days,
            randomized_delay_days: delay as u32,
            update_on_mobile,
        })
    }
}

/// Files to try, in order. An explicit path is tried first.
pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::with_capacity(4);
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    paths.extend(
        [CONFIG_FILE_PATH, LOCAL_CONFIG_FILE_PATH, STATIC_CONFIG_FILE_PATH]
            .into_iter()
            .map(PathBuf::from),
    );
    paths
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn yaml(step: &str, interval: &str, delay: &str, mobile: &str) -> String {
        format!(
            "Automatic Updates:\n  LastAutomaticStep: {step}\n  IntervalDays: {interval}\n  \
             RandomizedDelayDays: {delay}\n  UpdateOnMobile: {mobile}\n"
        )
    }

    #[test]
    fn test_valid_config() {
        let config = AutoupdateConfig::from_yaml(&yaml("2", "7", "3", "true")).unwrap();
        assert_eq!(config.last_automatic_step, UpdateStep::Fetch);
        assert_eq!(config.interval_days, 7);
        assert_eq!(config.randomized_delay_days, 3);
        assert!(config.update_on_mobile);
    }

    #[test]
    fn test_step_out_of_range() {
        for step in ["-1", "4"] {
            let err = AutoupdateConfig::from_yaml(&yaml(step, "7", "0", "false")).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    field: "LastAutomaticStep",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_negative_interval() {
        let err = AutoupdateConfig::from_yaml(&yaml("3", "-1", "0", "false")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "IntervalDays",
                ..
            }
        ));
    }

    #[test]
    fn test_interval_bounds() {
        let max = MAX_INTERVAL_DAYS.to_string();
        let config = AutoupdateConfig::from_yaml(&yaml("3", &max, "0", "false")).unwrap();
        assert_eq!(config.interval_days, MAX_INTERVAL_DAYS);

        let over = (MAX_INTERVAL_DAYS + 1).to_string();
        for interval in [over.as_str(), "9000000000000000000"] {
            let err = AutoupdateConfig::from_yaml(&yaml("3", interval, "0", "false")).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    field: "IntervalDays",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_randomized_delay_bounds() {
        let max = MAX_RANDOMIZED_DELAY_DAYS.to_string();
        let config = AutoupdateConfig::from_yaml(&yaml("3", "7", &max, "false")).unwrap();
        assert_eq!(config.randomized_delay_days as i64, MAX_RANDOMIZED_DELAY_DAYS);

        let over = (MAX_RANDOMIZED_DELAY_DAYS + 1).to_string();
        for delay in [over.as_str(), "-1"] {
            let err = AutoupdateConfig::from_yaml(&yaml("3", "7", delay, "false")).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue {
                    field: "RandomizedDelayDays",
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_missing_key_and_group() {
        let err = AutoupdateConfig::from_yaml(
            "Automatic Updates:\n  LastAutomaticStep: 1\n  IntervalDays: 1\n  RandomizedDelayDays: 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("UpdateOnMobile")));

        let err = AutoupdateConfig::from_yaml("Other: {}\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingGroup));
    }

    #[test]
    fn test_first_existing_file_wins() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.conf");
        let mut file = NamedTempFile::new_in(dir.path()).unwrap();
        write!(file, "{}", yaml("1", "0", "0", "false")).unwrap();

        let config =
            AutoupdateConfig::load_first(&[missing.clone(), file.path().to_path_buf()]).unwrap();
        assert_eq!(config.last_automatic_step, UpdateStep::Poll);

        let err = AutoupdateConfig::load_first(&[missing]).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_search_paths() {
        let paths = search_paths(Some(Path::new("/tmp/test.conf")));
        assert_eq!(paths[0], PathBuf::from("/tmp/test.conf"));
        assert_eq!(paths[1], PathBuf::from(CONFIG_FILE_PATH));
        assert_eq!(search_paths(None).len(), 3);
    }
}
