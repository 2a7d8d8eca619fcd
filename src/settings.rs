//! Persistent sensor-settings storage.
//!
//! The original driver keeps one named blob in NVS; here the analogue is a
//! small TOML table file mapping keys to [`SensorStatus`] records.

use crate::error::CamError;
use crate::gate::SensorGate;
use crate::sensor::{ImageSensor, SensorStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub trait SettingsStore: Send + Sync {
    fn load(&self, key: &str) -> Result<SensorStatus, CamError>;
    fn save(&self, key: &str, status: &SensorStatus) -> Result<(), CamError>;
}

/// Loads the record stored under `key` and applies it to the sensor. The
/// gate is taken for the apply span only; the store read happens outside
/// it. Callers stay lock-free.
pub async fn restore(
    store: &dyn SettingsStore,
    key: &str,
    gate: &SensorGate,
    sensor: &dyn ImageSensor,
) -> Result<(), CamError> {
    let status = store.load(key)?;
    let _permit = gate.acquire(None).await?;
    sensor.apply_status(&status)
}

/// Reads the sensor's current record under the gate and persists it under
/// `key` after the gate is released.
pub async fn persist(
    store: &dyn SettingsStore,
    key: &str,
    gate: &SensorGate,
    sensor: &dyn ImageSensor,
) -> Result<(), CamError> {
    let status = {
        let _permit = gate.acquire(None).await?;
        sensor.status()?
    };
    store.save(key, &status)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    sensors: BTreeMap<String, SensorStatus>,
}

/// File-backed store. The file is read and rewritten whole on each save;
/// the mutex keeps concurrent prompt commands from interleaving writes.
pub struct TomlSettingsStore {
    path: PathBuf,
    io: Mutex<()>,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io: Mutex::new(()),
        }
    }

    fn read_file(&self) -> Result<SettingsFile, CamError> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| CamError::PersistFailed(format!("read {:?}: {}", self.path, e)))?;
        toml::from_str(&content)
            .map_err(|e| CamError::PersistFailed(format!("parse {:?}: {}", self.path, e)))
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self, key: &str) -> Result<SensorStatus, CamError> {
        let _io = self.io.lock();
        let file = self.read_file()?;
        file.sensors
            .get(key)
            .cloned()
            .ok_or_else(|| CamError::PersistFailed(format!("no settings saved under {:?}", key)))
    }

    fn save(&self, key: &str, status: &SensorStatus) -> Result<(), CamError> {
        let _io = self.io.lock();
        let mut file = self.read_file()?;
        file.sensors.insert(key.to_string(), status.clone());
        let content = toml::to_string_pretty(&file)
            .map_err(|e| CamError::PersistFailed(e.to_string()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| CamError::PersistFailed(format!("write {:?}: {}", self.path, e)))
    }
}
