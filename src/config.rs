// Pipeline settings
// Resolution order: built-in defaults -> settings file -> CLI overrides.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BARO_INSTANCES, DEFAULT_BATCH_SIZE, DEFAULT_IMU_INSTANCES, DEFAULT_MAG_INSTANCES,
    DEFAULT_PROGRESS_INTERVAL, MAX_SENSOR_INSTANCE, SETTINGS_FILENAME, WORKSPACE_FOLDER,
};
use crate::error::{RovError, Result};
use crate::ingest::classifier::InstanceFilters;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub imu_instances: BTreeSet<u8>,
    pub mag_instances: BTreeSet<u8>,
    pub baro_instances: BTreeSet<u8>,
    /// Messages between progress reports during log ingestion
    pub progress_interval: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            imu_instances: DEFAULT_IMU_INSTANCES.into_iter().collect(),
            mag_instances: DEFAULT_MAG_INSTANCES.into_iter().collect(),
            baro_instances: DEFAULT_BARO_INSTANCES.into_iter().collect(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Per-invocation overrides, typically from CLI flags
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub batch_size: Option<usize>,
    pub imu_instances: Option<Vec<u8>>,
    pub mag_instances: Option<Vec<u8>>,
    pub baro_instances: Option<Vec<u8>>,
}

impl PipelineSettings {
    /// Settings file location inside a workspace
    pub fn default_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(WORKSPACE_FOLDER).join(SETTINGS_FILENAME)
    }

    /// Load from a JSON file. Keys that are absent keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RovError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let settings: PipelineSettings = serde_json::from_str(&text)
            .map_err(|e| RovError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Explicit file if given, else the workspace file if present, else defaults.
    pub fn resolve(workspace_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let path = Self::default_path(workspace_root);
        if path.exists() {
            log::debug!("Loading settings from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn with_overrides(mut self, overrides: &SettingsOverrides) -> Result<Self> {
        if let Some(n) = overrides.batch_size {
            self.batch_size = n;
        }
        if let Some(ref list) = overrides.imu_instances {
            self.imu_instances = list.iter().copied().collect();
        }
        if let Some(ref list) = overrides.mag_instances {
            self.mag_instances = list.iter().copied().collect();
        }
        if let Some(ref list) = overrides.baro_instances {
            self.baro_instances = list.iter().copied().collect();
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(RovError::InvalidConfig("batch size must be at least 1".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(RovError::InvalidConfig("progress interval must be at least 1".to_string()));
        }
        let all = self.imu_instances.iter()
            .chain(&self.mag_instances)
            .chain(&self.baro_instances);
        for &instance in all {
            if instance > MAX_SENSOR_INSTANCE {
                return Err(RovError::InvalidConfig(format!(
                    "sensor instance {} out of range (max {})",
                    instance, MAX_SENSOR_INSTANCE
                )));
            }
        }
        Ok(())
    }

    pub fn instance_filters(&self) -> InstanceFilters {
        InstanceFilters {
            imu: self.imu_instances.clone(),
            mag: self.mag_instances.clone(),
            baro: self.baro_instances.clone(),
        }
    }
}
