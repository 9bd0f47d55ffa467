//! taskfleet settings
//!
//! One YAML file shared by the CLI and the API daemon. Every field is
//! optional; a missing file means defaults throughout.
//!
//! ```yaml
//! listen: 0.0.0.0:13000
//! provider: aws
//! region: eu-west
//! timeouts:
//!   create: 1800
//! tags:
//!   team: research
//! ```

pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskfleet_cloud::{Cloud, Provider, Region, Timeouts};

/// Variable naming the settings file directly
pub const CONFIG_VARIABLE: &str = "TASKFLEET_CONFIG";

const LOCAL_FILE: &str = "taskfleet.yaml";
const GLOBAL_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the API daemon binds to
    pub listen: String,
    /// Provider used when the command line names none
    pub provider: Option<Provider>,
    pub region: Region,
    pub timeouts: TimeoutSettings,
    /// Tags added to every resource of every task
    pub tags: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:13000".to_string(),
            provider: None,
            region: Region::default(),
            timeouts: TimeoutSettings::default(),
            tags: BTreeMap::new(),
        }
    }
}

/// Operation deadlines in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub create: u64,
    pub read: u64,
    pub update: u64,
    pub delete: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            create: 900,
            read: 180,
            update: 180,
            delete: 900,
        }
    }
}

impl From<TimeoutSettings> for Timeouts {
    fn from(settings: TimeoutSettings) -> Self {
        Self {
            create: Duration::from_secs(settings.create),
            read: Duration::from_secs(settings.read),
            update: Duration::from_secs(settings.update),
            delete: Duration::from_secs(settings.delete),
        }
    }
}

impl Settings {
    /// Parse a settings file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Discovered settings, or defaults when no file exists
    pub fn load() -> Result<Self> {
        match find_config_file()? {
            Some(path) => {
                tracing::debug!("Loading settings from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Cloud for `provider` carrying the configured region, deadlines and tags
    pub fn cloud(&self, provider: Provider) -> Cloud {
        let mut cloud = Cloud::new(provider)
            .with_region(self.region.clone())
            .with_timeouts(self.timeouts.into());
        cloud.tags = self.tags.clone();
        cloud
    }
}

/// taskfleet's directory under the user configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("taskfleet"))
}

/// Locate the settings file
///
/// Search order:
/// 1. `TASKFLEET_CONFIG` (a named file that does not exist is an error)
/// 2. `./taskfleet.yaml`
/// 3. `<config dir>/taskfleet/config.yaml`
pub fn find_config_file() -> Result<Option<PathBuf>> {
    if let Some(path) = std::env::var_os(CONFIG_VARIABLE).filter(|path| !path.is_empty()) {
        let path = PathBuf::from(path);
        if !path.is_file() {
            return Err(ConfigError::Read {
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                path,
            });
        }
        return Ok(Some(path));
    }

    let local = std::env::current_dir()?.join(LOCAL_FILE);
    if local.is_file() {
        return Ok(Some(local));
    }

    if let Ok(dir) = get_config_dir() {
        let global = dir.join(GLOBAL_FILE);
        if global.is_file() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn in_dir<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = f();
        std::env::set_current_dir(original).unwrap();
        result
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.listen, "127.0.0.1:13000");
        assert_eq!(settings.region.as_str(), "us-west");
        assert_eq!(Timeouts::from(settings.timeouts), Timeouts::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(
            &path,
            "provider: gcp\ntimeouts:\n  create: 60\ntags:\n  team: research\n",
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();

        assert_eq!(settings.provider, Some(Provider::Gcp));
        assert_eq!(settings.timeouts.create, 60);
        assert_eq!(settings.timeouts.delete, 900);
        assert_eq!(settings.listen, "127.0.0.1:13000");

        let cloud = settings.cloud(Provider::Gcp);
        assert_eq!(cloud.timeouts.create, Duration::from_secs(60));
        assert_eq!(cloud.tags.get("team").map(String::as_str), Some("research"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "\n").unwrap();

        assert_eq!(Settings::from_file(&path).unwrap(), Settings::default());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        fs::write(&path, "timeouts: [1, 2").unwrap();

        assert!(matches!(
            Settings::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    #[serial]
    fn test_variable_takes_priority() {
        let dir = tempfile::tempdir().unwrap();
        let named = dir.path().join("named.yaml");
        fs::write(&named, "listen: 0.0.0.0:8080\n").unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "listen: 127.0.0.1:1\n").unwrap();

        let settings = temp_env::with_var(CONFIG_VARIABLE, Some(&named), || {
            in_dir(dir.path(), Settings::load)
        })
        .unwrap();

        assert_eq!(settings.listen, "0.0.0.0:8080");
    }

    #[test]
    #[serial]
    fn test_variable_naming_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = temp_env::with_var(
            CONFIG_VARIABLE,
            Some(dir.path().join("missing.yaml")),
            find_config_file,
        );

        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    #[serial]
    fn test_local_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCAL_FILE), "region: eu-north\n").unwrap();

        let settings = temp_env::with_var_unset(CONFIG_VARIABLE, || {
            in_dir(dir.path(), Settings::load)
        })
        .unwrap();

        assert_eq!(settings.region.as_str(), "eu-north");
    }

    #[test]
    #[serial]
    #[cfg(target_os = "linux")]
    fn test_global_file() {
        let home = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();

        let found = temp_env::with_vars(
            [
                (CONFIG_VARIABLE, None),
                ("XDG_CONFIG_HOME", Some(home.path().as_os_str())),
            ],
            || {
                let global = get_config_dir().unwrap().join(GLOBAL_FILE);
                fs::create_dir_all(global.parent().unwrap()).unwrap();
                fs::write(&global, "listen: 10.0.0.1:13000\n").unwrap();
                in_dir(work.path(), find_config_file)
            },
        )
        .unwrap();

        assert!(found.unwrap().ends_with("taskfleet/config.yaml"));
    }
}
