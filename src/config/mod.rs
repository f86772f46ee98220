mod file_config;

pub use file_config::{FileConfig, QueueConfig};

use crate::tasks::{QueueSettings, DEFAULT_MERGE_WEIGHT_LIMIT};
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub merge_weight_limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub queue: QueueSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified on the command line or in config file")
            })?;

        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }

        let queue_file = file.queue.unwrap_or_default();
        let merge_weight_limit = queue_file
            .merge_weight_limit
            .or(cli.merge_weight_limit)
            .unwrap_or(DEFAULT_MERGE_WEIGHT_LIMIT);
        if merge_weight_limit == 0 {
            bail!("merge_weight_limit must be greater than zero");
        }

        Ok(Self {
            db_path,
            queue: QueueSettings { merge_weight_limit },
        })
    }
}
