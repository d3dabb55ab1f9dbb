use std::{path::{Path, PathBuf}, time::Duration};

use config::{Config, Environment, File, FileFormat};
use ron::{Options, extensions::Extensions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_VERSION: f32 = 0.1;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("loading config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("parsing config: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("wrong config version, got {got} but expected {CONFIG_VERSION}")]
    Version { got: f32 },
    #[error("`{field}` {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Deploy time settings, read once at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub version: f32,
    /// Node directories `host<N>` are created below this
    pub storage_root: PathBuf,
    /// Number of boot cycles kept on disk
    pub max_boot_cycle_num: u16,
    pub max_post_codes_per_cycle: usize,
    pub flush_interval_ms: u64,
    /// Emit a log record for every code received
    pub bios_post_code_log: bool,
    pub action_rules: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            storage_root: PathBuf::from("/var/lib/phosphor-post-code-manager"),
            max_boot_cycle_num: 100,
            max_post_codes_per_cycle: 1024,
            flush_interval_ms: 1000,
            bios_post_code_log: false,
            action_rules: None,
        }
    }
}

impl ManagerConfig {
    /// Reads `file_path` if it exists, then applies `POST_CODE__*` environment overrides
    pub fn from_file(file_path: &Path) -> Result<Self, ConfigError> {
        let cfg: Self = Config::builder()
            .add_source(File::from(file_path).format(FileFormat::Ron).required(false))
            .add_source(
                Environment::with_prefix("POST_CODE")
                    .prefix_separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.validate()
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let options = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .with_default_extension(Extensions::UNWRAP_NEWTYPES)
            .with_default_extension(Extensions::UNWRAP_VARIANT_NEWTYPES);
        let cfg: Self = options.from_str(s)?;
        cfg.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Version { got: self.version });
        }
        if self.max_boot_cycle_num == 0 {
            return Err(ConfigError::Invalid {
                field: "max_boot_cycle_num",
                reason: "must be at least 1",
            });
        }
        if self.max_post_codes_per_cycle == 0 {
            return Err(ConfigError::Invalid {
                field: "max_post_codes_per_cycle",
                reason: "must be at least 1",
            });
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "flush_interval_ms",
                reason: "must be at least 1",
            });
        }
        Ok(self)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Storage directory of host `node`
    pub fn node_dir(&self, node: u16) -> PathBuf {
        self.storage_root.join(format!("host{node}"))
    }
}
