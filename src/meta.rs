//! Storage manifest: the metadata document naming the volume files.
//!
//! The manifest is a JSON document created together with the volume files
//! and read back at engine start. Validation is strict: a manifest that
//! fails any rule is a fatal construction error and the engine refuses to
//! open.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{ensure, Result, WrapErr};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Creation time, seconds since the Unix epoch.
    pub creation_time: u64,
    pub num_volumes: u32,
    pub volumes: Vec<VolumeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub index: u32,
    pub path: String,
}

impl Manifest {
    pub fn new(volume_paths: &[PathBuf]) -> Self {
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self {
            creation_time,
            num_volumes: volume_paths.len() as u32,
            volumes: volume_paths
                .iter()
                .enumerate()
                .map(|(index, path)| VolumeRecord {
                    index: index as u32,
                    path: path.display().to_string(),
                })
                .collect(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read manifest '{}'", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&text)
            .wrap_err_with(|| format!("failed to parse manifest '{}'", path.display()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn store<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;
        let text = serde_json::to_string_pretty(self).wrap_err("failed to serialize manifest")?;
        fs::write(path, text)
            .wrap_err_with(|| format!("failed to write manifest '{}'", path.display()))
    }

    /// `num_volumes` positive, indices covering `[0, num_volumes)` exactly
    /// once, no empty paths.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_volumes > 0, "manifest lists no volumes");
        ensure!(
            self.volumes.len() == self.num_volumes as usize,
            "manifest lists {} volume records, expected {}",
            self.volumes.len(),
            self.num_volumes
        );

        let mut seen = vec![false; self.num_volumes as usize];
        for record in &self.volumes {
            ensure!(
                (record.index as usize) < seen.len(),
                "volume index {} out of range",
                record.index
            );
            ensure!(
                !seen[record.index as usize],
                "volume index {} listed twice",
                record.index
            );
            seen[record.index as usize] = true;
            ensure!(
                !record.path.is_empty(),
                "volume {} has an empty path",
                record.index
            );
        }
        Ok(())
    }

    /// Volume paths in ring order. Call only on a validated manifest.
    pub fn volume_paths(&self) -> Vec<PathBuf> {
        let mut records: Vec<&VolumeRecord> = self.volumes.iter().collect();
        records.sort_by_key(|record| record.index);
        records
            .into_iter()
            .map(|record| PathBuf::from(&record.path))
            .collect()
    }
}
