pub mod error;

pub use error::*;

use bastionflow_cloud::WaitConfig;
use bastionflow_cloud::workflow::{ComputeProfile, DatabaseProfile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "BASTIONFLOW_CONFIG_PATH";

const CANDIDATES: &[&str] = &["bastionflow.local.yaml", "bastionflow.yaml"];
const PROJECT_DIR: &str = ".bastionflow";
const GLOBAL_DIR: &str = "bastionflow";
const SETTINGS_FILE: &str = "bastionflow.yaml";

/// Contents of `bastionflow.yaml`
///
/// Every field is optional. Command line flags and environment variables
/// take precedence over anything set here.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub region: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub key_dir: Option<PathBuf>,
    pub compute: ComputeSettings,
    pub database: DatabaseSettings,
    pub waiter: WaiterSettings,
    pub database_waiter: WaiterSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComputeSettings {
    pub ami_id: Option<String>,
    pub instance_type: Option<String>,
}

impl ComputeSettings {
    pub fn apply(&self, mut profile: ComputeProfile) -> ComputeProfile {
        if let Some(ami_id) = &self.ami_id {
            profile.ami_id = ami_id.clone();
        }
        if let Some(instance_type) = &self.instance_type {
            profile.instance_type = instance_type.clone();
        }
        profile
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseSettings {
    pub instance_class: Option<String>,
    pub engine: Option<String>,
    pub allocated_storage: Option<i32>,
    pub storage_type: Option<String>,
    pub port: Option<u16>,
}

impl DatabaseSettings {
    pub fn apply(&self, mut profile: DatabaseProfile) -> DatabaseProfile {
        if let Some(instance_class) = &self.instance_class {
            profile.instance_class = instance_class.clone();
        }
        if let Some(engine) = &self.engine {
            profile.engine = engine.clone();
        }
        if let Some(allocated_storage) = self.allocated_storage {
            profile.allocated_storage = allocated_storage;
        }
        if let Some(storage_type) = &self.storage_type {
            profile.storage_type = storage_type.clone();
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        profile
    }
}

/// Fixed-interval polling override
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaiterSettings {
    pub max_attempts: Option<u32>,
    pub poll_interval_secs: Option<u64>,
}

impl WaiterSettings {
    pub fn apply(&self, base: WaitConfig) -> WaitConfig {
        match (self.max_attempts, self.poll_interval_secs) {
            (None, None) => base,
            (attempts, interval) => WaitConfig::fixed(
                attempts.unwrap_or(base.max_attempts),
                interval.map(Duration::from_secs).unwrap_or(base.initial_delay),
            ),
        }
    }
}

impl Settings {
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self> {
        let mut settings: Settings =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        settings.state_dir = settings.state_dir.map(expand_home);
        settings.key_dir = settings.key_dir.map(expand_home);
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        for (section, waiter) in [
            ("waiter", &self.waiter),
            ("database_waiter", &self.database_waiter),
        ] {
            if waiter.max_attempts == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "{}.max_attempts must be at least 1",
                    section
                )));
            }
        }
        if let Some(storage) = self.database.allocated_storage
            && storage <= 0
        {
            return Err(ConfigError::Invalid(
                "database.allocated_storage must be positive".to_string(),
            ));
        }
        if self.region.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid("region must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Replace a leading `~` with the home directory
fn expand_home(path: PathBuf) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path,
    }
}

/// Locate the settings file
///
/// Search order:
/// 1. `BASTIONFLOW_CONFIG_PATH` (must exist when set)
/// 2. current directory: bastionflow.local.yaml, bastionflow.yaml
/// 3. `./.bastionflow/`, same order
/// 4. `~/.config/bastionflow/bastionflow.yaml`
///
/// Returns `None` when no file exists anywhere.
pub fn find_settings_file() -> Result<Option<PathBuf>> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(ConfigError::SettingsFileNotFound(path));
    }

    let current_dir = std::env::current_dir()?;
    for dir in [current_dir.clone(), current_dir.join(PROJECT_DIR)] {
        if let Some(path) = CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
        {
            return Ok(Some(path));
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join(GLOBAL_DIR).join(SETTINGS_FILE);
        if global.is_file() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    Settings::from_yaml(&content, path)
}

/// Load the discovered settings file, or defaults when there is none
pub fn load_settings() -> Result<Settings> {
    match find_settings_file()? {
        Some(path) => {
            tracing::debug!("Loading settings from {}", path.display());
            load_settings_from(&path)
        }
        None => {
            tracing::debug!("No settings file found, using defaults");
            Ok(Settings::default())
        }
    }
}
