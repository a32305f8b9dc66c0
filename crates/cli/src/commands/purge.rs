//! `purge` command: empty the disk tier.

use std::path::PathBuf;

use pixstash_core::{AppConfig, DiskStore, Error};
use serde::Serialize;

/// Output from the purge command.
#[derive(Debug, Clone, Serialize)]
pub struct PurgeOutput {
    /// Number of entries deleted.
    pub deleted: usize,
    pub cache_dir: PathBuf,
}

pub async fn run(config: &AppConfig) -> anyhow::Result<serde_json::Value> {
    let disk = DiskStore::new(config.cache_dir.clone());
    let output = purge_impl(&disk).await?;
    Ok(serde_json::to_value(output)?)
}

pub async fn purge_impl(disk: &DiskStore) -> Result<PurgeOutput, Error> {
    let deleted = disk.purge().await?;
    Ok(PurgeOutput { deleted, cache_dir: disk.root().to_path_buf() })
}
