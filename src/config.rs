//! Layered run-time configuration.
//!
//! Values are merged in increasing priority: built-in defaults, the TOML file,
//! `DEPLOY_SYNC_*` environment variables, then command-line flags.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigWriteError;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "deploy-sync.toml";

pub const ENV_PREFIX: &str = "DEPLOY_SYNC_";

/// Build outputs of a standalone Next.js server bundle.
pub const DEFAULT_ITEMS: [&str; 5] = [".next", "public", "server.js", "package.json", "node_modules"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_root: Option<PathBuf>,
    pub items: Vec<String>,
    /// Upper bound on enumeration threads; the pool never exceeds the item count.
    pub scan_workers_max: usize,
    pub copy_workers_min: usize,
    pub copy_workers_max: usize,
    /// Log a progress line every N completed files.
    pub progress_every: u64,
    /// fsync every destination file after writing.
    pub sync_files: bool,
    /// Re-read and hash destination files after the copy stage.
    pub verify: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_root: default_source_root(),
            destination_root: None,
            items: DEFAULT_ITEMS.iter().map(|s| s.to_string()).collect(),
            scan_workers_max: 4,
            copy_workers_min: 4,
            copy_workers_max: 16,
            progress_every: 100,
            sync_files: false,
            verify: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Load configuration, with `overrides` (usually parsed CLI args) taking
    /// precedence over everything else.
    pub fn new<T: Serialize>(
        config_file: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, figment::Error> {
        Self::figment(config_file, overrides).extract()
    }

    pub fn figment<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Figment {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(args) = overrides {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment
    }

    /// Write the default configuration to `path` as TOML. An existing file is
    /// left alone unless `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigWriteError> {
        let content = toml::to_string_pretty(&AppConfig::default())?;

        let mut options = OpenOptions::new();
        options.write(true);
        if force {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let io_err = |source: io::Error| ConfigWriteError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = options.open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ConfigWriteError::AlreadyExists(path.to_path_buf())
            } else {
                io_err(e)
            }
        })?;
        file.write_all(content.as_bytes()).map_err(io_err)?;

        Ok(())
    }
}

/// Parent of the directory holding the running executable, so a binary
/// installed under `<project>/bin/` syncs `<project>`.
fn default_source_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent()?.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        destination_root: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verify: Option<bool>,
    }

    #[test]
    fn defaults_carry_the_standard_bundle() {
        let config = AppConfig::default();
        assert_eq!(config.items, DEFAULT_ITEMS);
        assert_eq!(config.copy_workers_min, 4);
        assert_eq!(config.copy_workers_max, 16);
        assert_eq!(config.progress_every, 100);
        assert!(config.destination_root.is_none());
    }

    #[test]
    fn file_env_and_overrides_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                    source_root = "/srv/app"
                    destination_root = "/srv/from-file"
                    items = ["public", "server.js"]
                    progress_every = 10
                "#,
            )?;
            jail.set_env("DEPLOY_SYNC_PROGRESS_EVERY", "25");
            jail.set_env("DEPLOY_SYNC_SYNC_FILES", "true");

            let overrides = Overrides {
                destination_root: Some(PathBuf::from("/srv/from-cli")),
                verify: None,
            };
            let config = AppConfig::new(None, Some(&overrides))?;

            assert_eq!(config.source_root, PathBuf::from("/srv/app"));
            assert_eq!(config.destination_root, Some(PathBuf::from("/srv/from-cli")));
            assert_eq!(config.items, vec!["public", "server.js"]);
            assert_eq!(config.progress_every, 25);
            assert!(config.sync_files);
            assert!(!config.verify);
            Ok(())
        });
    }

    #[test]
    fn written_default_refuses_overwrite_and_parses_back() {
        Jail::expect_with(|jail| {
            jail.create_file("deploy.toml", "verify = true")?;
            let path = Path::new("deploy.toml");

            let err = AppConfig::write_default(path, false).unwrap_err();
            assert!(matches!(err, ConfigWriteError::AlreadyExists(_)));
            assert_eq!(std::fs::read_to_string(path).unwrap(), "verify = true");

            AppConfig::write_default(path, true).unwrap();
            let config = AppConfig::new(Some(path), None::<&Overrides>)?;
            assert_eq!(config, AppConfig::default());
            Ok(())
        });
    }

    #[test]
    fn written_default_creates_new_file() {
        Jail::expect_with(|_jail| {
            let path = Path::new("fresh.toml");

            AppConfig::write_default(path, false).unwrap();
            let written = std::fs::read_to_string(path).unwrap();
            assert!(written.contains("progress_every = 100"));
            assert!(!written.contains("destination_root"));
            Ok(())
        });
    }

    #[test]
    fn explicit_config_file_is_used() {
        Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "verify = true\nitems = [\"dist\"]")?;

            let config = AppConfig::new(Some(Path::new("custom.toml")), None::<&Overrides>)?;
            assert!(config.verify);
            assert_eq!(config.items, vec!["dist"]);
            Ok(())
        });
    }
}
