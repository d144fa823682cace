//! Engine configuration.

use std::path::PathBuf;

use eyre::{ensure, Result};

use crate::storage::{PAGE_HEADER_SIZE, VOLUME_SIZE};
use crate::types::TimeDuration;

pub const DEFAULT_NUM_VOLUMES: u32 = 4;
pub const DEFAULT_MAX_CACHE_SIZE: usize = 4096;
pub const DEFAULT_TTL: TimeDuration = TimeDuration::from_seconds(10);

/// Parameters of one storage instance. The on-disk footprint is
/// `num_volumes` page files named `<base_name>_<i>.volume` plus a
/// `<base_name>.manifest` document, all under `volumes_path`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub volumes_path: PathBuf,
    pub base_name: String,
    pub num_volumes: u32,
    pub volume_size: usize,
    /// Tolerated late-write window.
    pub ttl: TimeDuration,
    /// Staged offsets per volume before a forced drain.
    pub max_cache_size: usize,
}

impl StorageConfig {
    pub fn new(volumes_path: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            volumes_path: volumes_path.into(),
            base_name: base_name.into(),
            num_volumes: DEFAULT_NUM_VOLUMES,
            volume_size: VOLUME_SIZE,
            ttl: DEFAULT_TTL,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.base_name.is_empty(), "storage base name is empty");
        ensure!(self.num_volumes > 0, "storage needs at least one volume");
        ensure!(
            self.volume_size > PAGE_HEADER_SIZE,
            "volume size {} leaves no room past the page header",
            self.volume_size
        );
        ensure!(
            self.volume_size <= u32::MAX as usize,
            "volume size {} exceeds the entry offset range",
            self.volume_size
        );
        ensure!(self.ttl.value() > 0, "ttl must be positive");
        ensure!(self.max_cache_size > 0, "max cache size must be positive");
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.volumes_path
            .join(format!("{}.manifest", self.base_name))
    }

    pub fn volume_path(&self, index: u32) -> PathBuf {
        self.volumes_path
            .join(format!("{}_{}.volume", self.base_name, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = StorageConfig::new("/tmp/ts", "ts");
        config.validate().unwrap();
        assert_eq!(config.num_volumes, DEFAULT_NUM_VOLUMES);
        assert_eq!(config.volume_size, VOLUME_SIZE);
    }

    #[test]
    fn paths_follow_the_naming_scheme() {
        let config = StorageConfig::new("/data", "metrics");
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/data/metrics.manifest")
        );
        assert_eq!(
            config.volume_path(2),
            PathBuf::from("/data/metrics_2.volume")
        );
    }

    #[test]
    fn rejects_degenerate_configs() {
        let mut config = StorageConfig::new("/tmp/ts", "ts");
        config.num_volumes = 0;
        assert!(config.validate().is_err());

        let mut config = StorageConfig::new("/tmp/ts", "ts");
        config.volume_size = PAGE_HEADER_SIZE;
        assert!(config.validate().is_err());

        let mut config = StorageConfig::new("/tmp/ts", "");
        config.base_name.clear();
        assert!(config.validate().is_err());
    }
}
