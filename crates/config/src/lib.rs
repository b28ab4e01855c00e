//! Configuration for strata.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. `config.{toml,yaml,json}` in the platform config directory
//! 3. An explicit file passed on the command line
//! 4. `STRATA_` environment variables, `__` separating sections from keys
//!    (`STRATA_STORAGE__TMP_EXPIRY_HOURS=48`)

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "STRATA_";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "zanbaldwin", "strata")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Physical base directory; every user's tree lives in `<base>/<user id>`.
    pub base_directory: PathBuf,
    /// Name of each user's temp area at the root of their tree.
    pub tmp_folder_name: String,
    /// Entries in a temp area older than this are deleted by maintenance.
    pub tmp_expiry_hours: u64,
}
impl Default for StorageConfig {
    fn default() -> Self {
        let base_directory = match project_dirs() {
            Some(dirs) => dirs.data_dir().join("files"),
            None => PathBuf::from("data/files"),
        };
        Self {
            base_directory,
            tmp_folder_name: ".tmp".to_string(),
            tmp_expiry_hours: 24,
        }
    }
}
/// A century; anything longer is a typo rather than a retention policy.
const MAX_TMP_EXPIRY_HOURS: u64 = 100 * 365 * 24;

impl StorageConfig {
    pub fn tmp_expiry(&self) -> Duration {
        Duration::from_secs(self.tmp_expiry_hours.saturating_mul(60 * 60))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = match project_dirs() {
            Some(dirs) => dirs.data_dir().join("strata.sqlite"),
            None => PathBuf::from("data/strata.sqlite"),
        };
        Self { path }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Reconcile every user's tree before serving.
    pub on_startup: bool,
    /// Seconds between full rescans; zero disables them.
    pub interval_secs: u64,
}
impl Default for ScanConfig {
    fn default() -> Self {
        Self { on_startup: true, interval_secs: 0 }
    }
}
impl ScanConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between temp-area expiry runs; zero disables them.
    pub interval_secs: u64,
}
impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}
impl MaintenanceConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub scan: ScanConfig,
    pub maintenance: MaintenanceConfig,
    pub log: LogConfig,
}

impl Config {
    /// Every configuration source merged in order, without extracting.
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(dirs) = project_dirs() {
            let dir = dirs.config_dir();
            figment = figment
                .merge(Toml::file(dir.join("config.toml")))
                .merge(Yaml::file(dir.join("config.yaml")))
                .merge(Json::file(dir.join("config.json")));
        }
        if let Some(path) = explicit {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
                Some("json") => figment.merge(Json::file_exact(path)),
                _ => figment.merge(Toml::file_exact(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load, validate and normalize the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(&Self::figment(explicit))
    }

    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        config.storage.base_directory =
            std::path::absolute(&config.storage.base_directory).or_raise(|| ErrorKind::Load)?;
        config.database.path = std::path::absolute(&config.database.path).or_raise(|| ErrorKind::Load)?;
        tracing::debug!(
            base = %config.storage.base_directory.display(),
            database = %config.database.path.display(),
            "Loaded configuration"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let tmp = &self.storage.tmp_folder_name;
        if tmp.is_empty() || tmp == "." || tmp.contains(['/', '\\']) {
            exn::bail!(ErrorKind::Invalid(format!("`{tmp}` is not a single folder name")));
        }
        strata_storage::path::check(tmp).or_raise(|| ErrorKind::Invalid(format!("`{tmp}` is not a valid folder name")))?;
        if self.storage.tmp_expiry_hours == 0 {
            exn::bail!(ErrorKind::Invalid("temp expiry must be at least one hour".to_string()));
        }
        if self.storage.tmp_expiry_hours > MAX_TMP_EXPIRY_HOURS {
            exn::bail!(ErrorKind::Invalid(format!("temp expiry is capped at {MAX_TMP_EXPIRY_HOURS} hours")));
        }
        if self.storage.base_directory.as_os_str().is_empty() {
            exn::bail!(ErrorKind::Invalid("storage base directory is empty".to_string()));
        }
        Ok(())
    }
}
