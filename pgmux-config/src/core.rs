use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::error::Error;
use super::general::General;
use super::networking::Tcp;
use super::upstream::Upstream;
use super::users::Users;

#[derive(Debug, Clone)]
pub struct ConfigAndUsers {
    /// pgmux.toml
    pub config: Config,
    /// users.toml
    pub users: Users,
    /// Path to pgmux.toml.
    pub config_path: PathBuf,
    /// Path to users.toml.
    pub users_path: PathBuf,
}

impl ConfigAndUsers {
    /// Load configuration from disk or use defaults.
    pub fn load(config_path: &Path, users_path: &Path) -> Result<Self, Error> {
        let config: Config = if let Ok(config) = read_to_string(config_path) {
            let config = match toml::from_str(&config) {
                Ok(config) => config,
                Err(err) => return Err(Error::config(&config, err)),
            };
            info!("loaded \"{}\"", config_path.display());
            config
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                config_path.display()
            );
            Config::default()
        };

        config.general.check()?;

        if config.general.multi_tenant {
            info!("multi-tenant pooling enabled");
        }

        let users: Users = if let Ok(users) = read_to_string(users_path) {
            let users: Users = match toml::from_str(&users) {
                Ok(users) => users,
                Err(err) => return Err(Error::config(&users, err)),
            };
            users.check();
            info!("loaded \"{}\"", users_path.display());
            users
        } else {
            warn!(
                "\"{}\" doesn't exist, loading defaults instead",
                users_path.display()
            );
            Users::default()
        };

        Ok(ConfigAndUsers {
            config,
            users,
            config_path: config_path.to_owned(),
            users_path: users_path.to_owned(),
        })
    }

    /// Load both files, failing if either one is missing.
    pub fn check(config_path: &Path, users_path: &Path) -> Result<Self, Error> {
        let source = read_to_string(config_path)?;
        let config: Config = toml::from_str(&source).map_err(|err| Error::config(&source, err))?;
        config.general.check()?;

        let source = read_to_string(users_path)?;
        let users: Users = toml::from_str(&source).map_err(|err| Error::config(&source, err))?;

        Ok(ConfigAndUsers {
            config,
            users,
            config_path: config_path.to_owned(),
            users_path: users_path.to_owned(),
        })
    }
}

impl Default for ConfigAndUsers {
    fn default() -> Self {
        Self {
            config: Config::default(),
            users: Users::default(),
            config_path: PathBuf::from("pgmux.toml"),
            users_path: PathBuf::from("users.toml"),
        }
    }
}

/// Configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// General configuration.
    #[serde(default)]
    pub general: General,

    /// TCP settings.
    #[serde(default)]
    pub tcp: Tcp,

    /// Server backends connect to.
    #[serde(default)]
    pub upstream: Upstream,
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::LogFormat;

    #[test]
    fn test_load_config() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(
            config,
            r#"
[general]
port = 6544
session_pool_size = 3
multi_tenant = true
log_format = "json"
idle_backend_timeout = 30000

[tcp]
keepalive = false
retries = 3

[upstream]
host = "10.0.0.1"
port = 5433
"#
        )
        .unwrap();

        let mut users = NamedTempFile::new().unwrap();
        writeln!(
            users,
            r#"
[[users]]
name = "svc"
database = "app"
password = "secret"
"#
        )
        .unwrap();

        let loaded = ConfigAndUsers::load(config.path(), users.path()).unwrap();
        let general = &loaded.config.general;
        assert_eq!(general.port, 6544);
        assert_eq!(general.session_pool_size, 3);
        assert!(general.multi_tenant);
        assert_eq!(general.log_format, LogFormat::Json);
        assert_eq!(
            general.idle_backend_timeout_duration().unwrap().as_millis(),
            30_000
        );
        assert!(!loaded.config.tcp.keepalive());
        assert_eq!(loaded.config.tcp.retries(), Some(3));
        assert_eq!(loaded.config.upstream.host, "10.0.0.1");
        assert_eq!(loaded.config.upstream.port, 5433);
        assert_eq!(loaded.users.find("app", "svc").unwrap().password(), "secret");
    }

    #[test]
    fn test_missing_files_load_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ConfigAndUsers::load(
            &dir.path().join("pgmux.toml"),
            &dir.path().join("users.toml"),
        )
        .unwrap();
        assert_eq!(loaded.config.general.session_pool_size, 10);
        assert!(loaded.users.users.is_empty());
    }

    #[test]
    fn test_unknown_field_reports_line() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "[general]\nport = 6432\nbogus = 1").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let err = ConfigAndUsers::load(config.path(), &dir.path().join("users.toml"))
            .unwrap_err();
        match err {
            Error::Parse { line, .. } => assert!(line > 0),
            err => panic!("unexpected error: {}", err),
        }
    }

    #[test]
    fn test_invalid_setting() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "[general]\nsession_pool_size = 0").unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConfigAndUsers::load(config.path(), &dir.path().join("users.toml")),
            Err(Error::Invalid { .. })
        ));
    }

    #[test]
    fn test_check_requires_files() {
        let mut config = NamedTempFile::new().unwrap();
        writeln!(config, "[general]\nport = 6432").unwrap();

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ConfigAndUsers::check(config.path(), &dir.path().join("users.toml")),
            Err(Error::Io(_))
        ));

        let users = NamedTempFile::new().unwrap();
        let checked = ConfigAndUsers::check(config.path(), users.path()).unwrap();
        assert_eq!(checked.config.general.port, 6432);
    }
}
