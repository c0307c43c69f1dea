use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::scanner::CaptureSettings;

const DEFAULT_DB_FILE: &str = "barcodes.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Minimum gap before the same code is accepted again.
    pub cooldown_ms: u64,
    pub capture_interval_ms: u64,
    pub capture_timeout_ms: u64,
    /// How long the persistence worker waits on an empty queue before it
    /// re-checks its stop flag.
    pub worker_poll_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub history_limit: usize,
    pub database_path: Option<PathBuf>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            cooldown_ms: 1000,
            capture_interval_ms: 30,
            capture_timeout_ms: 2000,
            worker_poll_ms: 1000,
            shutdown_timeout_ms: 3000,
            history_limit: 100,
            database_path: None,
        }
    }
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value.max(1))
}

impl ScanSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn worker_poll(&self) -> Duration {
        millis(self.worker_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        millis(self.shutdown_timeout_ms)
    }

    pub fn capture(&self) -> CaptureSettings {
        CaptureSettings {
            interval: millis(self.capture_interval_ms),
            capture_timeout: millis(self.capture_timeout_ms),
            cooldown: self.cooldown(),
        }
    }

    /// Database location: the configured path, or a file next to `base_dir`.
    pub fn resolve_database_path(&self, base_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => base_dir.join(DEFAULT_DB_FILE),
        }
    }

    /// `SCANLOG_DB` replaces the database path. Returns whether
    /// `SCANLOG_DEBUG` asks for verbose output.
    pub fn apply_env_overrides(&mut self) -> bool {
        if let Some(path) = std::env::var_os("SCANLOG_DB").filter(|value| !value.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }

        std::env::var("SCANLOG_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ScanSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring malformed settings in {}: {err}", path.display());
                ScanSettings::default()
            })
        } else {
            ScanSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> ScanSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: ScanSettings) -> Result<()> {
        let mut guard = self.write();
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        let data: ScanSettings = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed settings in {}", self.path.display()))?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &ScanSettings) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, ScanSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScanSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
