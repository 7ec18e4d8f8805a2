//! Updater configuration loading from an optional TOML file and environment variables.
//!
//! Values are layered: built-in defaults, then the TOML file named by
//! `NETSECURE_CONFIG` (if set), then `NETSECURE_*` environment variables.
//! Invalid environment values fall back to the layer below without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `NETSECURE_CONFIG` | unset | Path to a TOML config file |
//! | `NETSECURE_MODEL_PATH` | `models/wifi_model.pkl` | Active model artifact |
//! | `NETSECURE_BACKUP_DIR` | `models/backups` | Backup directory |
//! | `NETSECURE_METRICS_PATH` | `models/update_metrics.json` | Metrics history file |
//! | `NETSECURE_STAGING_DIR` | `models/staging` | Candidate staging directory |
//! | `NETSECURE_INCOMING_DIR` | `models/incoming` | Drop directory for the `directory` source |
//! | `NETSECURE_SOURCE` | `synthetic` | Candidate source (`synthetic` or `directory`) |
//! | `NETSECURE_SYNTHETIC_BYTES` | 4096 | Payload size of synthetic candidates |
//! | `NETSECURE_UPDATE_INTERVAL` | 3600 | Poll interval (secs) |
//! | `NETSECURE_ERROR_BACKOFF` | 300 | Sleep after a failed cycle (secs) |
//! | `NETSECURE_MAX_BACKUPS` | 5 | Backups retained after cleanup |
//! | `NETSECURE_MIN_ARTIFACT_SIZE` | 1024 | Smallest accepted candidate (bytes) |
//! | `NETSECURE_EXPECTED_SHA256` | unset | Required candidate digest |
//! | `NETSECURE_HEALTH_INTERVAL` | 300 | Facade health-check interval (secs) |
//! | `NETSECURE_STOP_TIMEOUT` | 10 | Poll loop join timeout (secs) |
//! | `NETSECURE_FORCE_SKIPS_IDENTICAL` | true | Forced updates skip identical content |
//! | `NETSECURE_BACKUP_FAILURE_POLICY` | `abort` | `abort` or `proceed` |
//! | `NETSECURE_AUTO_UPDATE` | true | Start with automatic updates enabled |
//! | `NETSECURE_SOCKET_PATH` | `/tmp/netsecure-updater.sock` | Control socket |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::updater::{BackupFailurePolicy, OrchestratorConfig, PollSchedule};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/netsecure-updater.sock";

/// Where update candidates come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Synthetic,
    Directory,
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "synthetic" => Ok(Self::Synthetic),
            "directory" | "dir" => Ok(Self::Directory),
            other => Err(format!("unknown source kind: {}", other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete updater configuration.
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub model_path: PathBuf,
    pub backup_dir: PathBuf,
    pub metrics_path: PathBuf,
    pub staging_dir: PathBuf,
    pub incoming_dir: PathBuf,
    pub source: SourceKind,
    pub synthetic_payload_bytes: usize,
    pub update_interval: Duration,
    pub error_backoff: Duration,
    pub max_backups: usize,
    pub min_artifact_size: u64,
    pub expected_sha256: Option<String>,
    pub health_check_interval: Duration,
    pub stop_timeout: Duration,
    pub force_skips_identical: bool,
    pub backup_failure_policy: BackupFailurePolicy,
    pub auto_update: bool,
    pub socket_path: PathBuf,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/wifi_model.pkl"),
            backup_dir: PathBuf::from("models/backups"),
            metrics_path: PathBuf::from("models/update_metrics.json"),
            staging_dir: PathBuf::from("models/staging"),
            incoming_dir: PathBuf::from("models/incoming"),
            source: SourceKind::Synthetic,
            synthetic_payload_bytes: 4096,
            update_interval: Duration::from_secs(3600),
            error_backoff: Duration::from_secs(300),
            max_backups: 5,
            min_artifact_size: 1024,
            expected_sha256: None,
            health_check_interval: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(10),
            force_skips_identical: true,
            backup_failure_policy: BackupFailurePolicy::Abort,
            auto_update: true,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

/// TOML file layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model_path: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub metrics_path: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub incoming_dir: Option<PathBuf>,
    pub source: Option<SourceKind>,
    pub synthetic_payload_bytes: Option<usize>,
    pub update_interval_secs: Option<u64>,
    pub error_backoff_secs: Option<u64>,
    pub max_backups: Option<usize>,
    pub min_artifact_size: Option<u64>,
    pub expected_sha256: Option<String>,
    pub health_check_interval_secs: Option<u64>,
    pub stop_timeout_secs: Option<u64>,
    pub force_skips_identical: Option<bool>,
    pub backup_failure_policy: Option<BackupFailurePolicy>,
    pub auto_update: Option<bool>,
    pub socket_path: Option<PathBuf>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub model_path: String,
    pub backup_dir: String,
    pub metrics_path: String,
    pub staging_dir: String,
    pub incoming_dir: String,
    pub source: SourceKind,
    pub synthetic_payload_bytes: usize,
    pub update_interval_secs: u64,
    pub error_backoff_secs: u64,
    pub max_backups: usize,
    pub min_artifact_size: u64,
    pub expected_sha256: Option<String>,
    pub health_check_interval_secs: u64,
    pub stop_timeout_secs: u64,
    pub force_skips_identical: bool,
    pub backup_failure_policy: BackupFailurePolicy,
    pub auto_update: bool,
    pub socket_path: String,
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse an env var with `FromStr`, returning `current` on missing or invalid.
fn parse_env<T: FromStr>(key: &str, current: T) -> T {
    match env_value(key) {
        Some(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(key, value = %val, "ignoring invalid environment value");
                current
            }
        },
        None => current,
    }
}

/// Parse a boolean env var. Accepts true/false, 1/0, yes/no, on/off.
fn parse_bool(key: &str, current: bool) -> bool {
    match env_value(key).map(|v| v.to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        Some(v) => {
            warn!(key, value = %v, "ignoring invalid boolean value");
            current
        }
        None => current,
    }
}

fn parse_secs(key: &str, current: Duration) -> Duration {
    Duration::from_secs(parse_env(key, current.as_secs()))
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

fn parse_path(key: &str, current: PathBuf) -> PathBuf {
    env_value(key).map(PathBuf::from).unwrap_or(current)
}

/// Load configuration from `NETSECURE_CONFIG` (if set) and the environment.
///
/// Only an unreadable or malformed config file is an error. Call
/// [`UpdaterConfig::validate`] before starting the service.
pub fn load() -> Result<UpdaterConfig, ConfigError> {
    let file = match env_value("NETSECURE_CONFIG") {
        Some(path) => Some(FileConfig::from_path(Path::new(&path))?),
        None => None,
    };
    Ok(load_with(file))
}

/// Layer an already-parsed file and the environment over the defaults.
pub fn load_with(file: Option<FileConfig>) -> UpdaterConfig {
    let mut cfg = UpdaterConfig::default();
    if let Some(file) = file {
        cfg.apply_file(file);
    }
    cfg.apply_env();
    cfg.apply_floors();
    cfg
}

impl UpdaterConfig {
    fn apply_file(&mut self, file: FileConfig) {
        set(&mut self.model_path, file.model_path);
        set(&mut self.backup_dir, file.backup_dir);
        set(&mut self.metrics_path, file.metrics_path);
        set(&mut self.staging_dir, file.staging_dir);
        set(&mut self.incoming_dir, file.incoming_dir);
        set(&mut self.source, file.source);
        set(&mut self.synthetic_payload_bytes, file.synthetic_payload_bytes);
        set(&mut self.max_backups, file.max_backups);
        set(&mut self.min_artifact_size, file.min_artifact_size);
        set(&mut self.force_skips_identical, file.force_skips_identical);
        set(&mut self.backup_failure_policy, file.backup_failure_policy);
        set(&mut self.auto_update, file.auto_update);
        set(&mut self.socket_path, file.socket_path);
        if file.expected_sha256.is_some() {
            self.expected_sha256 = file.expected_sha256;
        }
        if let Some(s) = file.update_interval_secs {
            self.update_interval = Duration::from_secs(s);
        }
        if let Some(s) = file.error_backoff_secs {
            self.error_backoff = Duration::from_secs(s);
        }
        if let Some(s) = file.health_check_interval_secs {
            self.health_check_interval = Duration::from_secs(s);
        }
        if let Some(s) = file.stop_timeout_secs {
            self.stop_timeout = Duration::from_secs(s);
        }
    }

    fn apply_env(&mut self) {
        self.model_path = parse_path("NETSECURE_MODEL_PATH", std::mem::take(&mut self.model_path));
        self.backup_dir = parse_path("NETSECURE_BACKUP_DIR", std::mem::take(&mut self.backup_dir));
        self.metrics_path = parse_path("NETSECURE_METRICS_PATH", std::mem::take(&mut self.metrics_path));
        self.staging_dir = parse_path("NETSECURE_STAGING_DIR", std::mem::take(&mut self.staging_dir));
        self.incoming_dir = parse_path("NETSECURE_INCOMING_DIR", std::mem::take(&mut self.incoming_dir));
        self.socket_path = parse_path("NETSECURE_SOCKET_PATH", std::mem::take(&mut self.socket_path));
        self.source = parse_env("NETSECURE_SOURCE", self.source);
        self.synthetic_payload_bytes = parse_env("NETSECURE_SYNTHETIC_BYTES", self.synthetic_payload_bytes);
        self.update_interval = parse_secs("NETSECURE_UPDATE_INTERVAL", self.update_interval);
        self.error_backoff = parse_secs("NETSECURE_ERROR_BACKOFF", self.error_backoff);
        self.max_backups = parse_env("NETSECURE_MAX_BACKUPS", self.max_backups);
        self.min_artifact_size = parse_env("NETSECURE_MIN_ARTIFACT_SIZE", self.min_artifact_size);
        self.health_check_interval = parse_secs("NETSECURE_HEALTH_INTERVAL", self.health_check_interval);
        self.stop_timeout = parse_secs("NETSECURE_STOP_TIMEOUT", self.stop_timeout);
        self.force_skips_identical = parse_bool("NETSECURE_FORCE_SKIPS_IDENTICAL", self.force_skips_identical);
        self.backup_failure_policy = parse_env("NETSECURE_BACKUP_FAILURE_POLICY", self.backup_failure_policy);
        self.auto_update = parse_bool("NETSECURE_AUTO_UPDATE", self.auto_update);
        if let Some(digest) = env_value("NETSECURE_EXPECTED_SHA256") {
            self.expected_sha256 = Some(digest);
        }
    }

    fn apply_floors(&mut self) {
        let one_sec = Duration::from_secs(1);
        self.update_interval = self.update_interval.max(one_sec);
        self.error_backoff = self.error_backoff.max(one_sec);
        self.health_check_interval = self.health_check_interval.max(one_sec);
        self.stop_timeout = self.stop_timeout.max(one_sec);
        self.max_backups = self.max_backups.max(1);
        self.min_artifact_size = self.min_artifact_size.max(1);
        self.synthetic_payload_bytes = self.synthetic_payload_bytes.max(1);
    }

    /// Reject combinations that would make every cycle fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model_path.file_name().is_none() {
            return Err(ConfigError::Invalid(format!(
                "model path {} has no file name",
                self.model_path.display()
            )));
        }
        if self.backup_dir == self.model_path {
            return Err(ConfigError::Invalid("backup dir must differ from model path".into()));
        }
        if let Some(digest) = &self.expected_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Invalid(format!(
                    "expected sha256 must be 64 hex characters, got {:?}",
                    digest
                )));
            }
        }
        if self.source == SourceKind::Synthetic
            && (self.synthetic_payload_bytes as u64) < self.min_artifact_size
        {
            return Err(ConfigError::Invalid(format!(
                "synthetic payload ({} bytes) is below min artifact size ({} bytes)",
                self.synthetic_payload_bytes, self.min_artifact_size
            )));
        }
        Ok(())
    }

    /// File the `directory` source watches: the incoming dir plus the model's file name.
    pub fn incoming_file(&self) -> PathBuf {
        let name = self
            .model_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "model.bin".into());
        self.incoming_dir.join(name)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut cfg = OrchestratorConfig::new(&self.model_path, &self.staging_dir);
        cfg.max_backups = self.max_backups;
        cfg.force_skips_identical = self.force_skips_identical;
        cfg.backup_failure_policy = self.backup_failure_policy;
        cfg
    }

    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            interval: self.update_interval,
            error_backoff: self.error_backoff,
            stop_timeout: self.stop_timeout,
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            model_path: self.model_path.display().to_string(),
            backup_dir: self.backup_dir.display().to_string(),
            metrics_path: self.metrics_path.display().to_string(),
            staging_dir: self.staging_dir.display().to_string(),
            incoming_dir: self.incoming_dir.display().to_string(),
            source: self.source,
            synthetic_payload_bytes: self.synthetic_payload_bytes,
            update_interval_secs: self.update_interval.as_secs(),
            error_backoff_secs: self.error_backoff.as_secs(),
            max_backups: self.max_backups,
            min_artifact_size: self.min_artifact_size,
            expected_sha256: self.expected_sha256.clone(),
            health_check_interval_secs: self.health_check_interval.as_secs(),
            stop_timeout_secs: self.stop_timeout.as_secs(),
            force_skips_identical: self.force_skips_identical,
            backup_failure_policy: self.backup_failure_policy,
            auto_update: self.auto_update,
            socket_path: self.socket_path.display().to_string(),
        }
    }
}

/// Serializes env-mutating unit tests across modules.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
