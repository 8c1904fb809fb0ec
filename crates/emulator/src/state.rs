//! Emulator State Store
//!
//! One JSON file records every emulator instance the tool knows about,
//! keyed by platform then firmware version. Separate tool invocations
//! read and replace it without any lock; the orchestrator reconciles
//! races against live OS process state instead. Writes go to a sibling
//! temp file and are renamed into place so a concurrent reader never
//! observes a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wristkit_core::Platform;

use crate::supervisor::ProcessStamp;

/// State store errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything recorded about one (platform, version) emulator instance.
///
/// A `None` process stamp means "not currently running". Unknown fields
/// in the file are ignored on read, so newer tools can extend this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Device-emulator protocol port
    pub qemu_port: u16,
    /// Serial-console port (boot markers, logs)
    pub console_port: u16,
    /// Debugger (gdb stub) port
    pub gdb_port: u16,
    /// Bridge-runtime WebSocket port
    pub runtime_port: u16,
    /// Whether the device emulator was booted with the display flag
    #[serde(default)]
    pub display: bool,
    #[serde(default)]
    pub qemu: Option<ProcessStamp>,
    #[serde(default)]
    pub runtime: Option<ProcessStamp>,
    #[serde(default)]
    pub relay: Option<ProcessStamp>,
}

/// In-memory image of the state file: platform name -> version -> record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmulatorState {
    instances: BTreeMap<String, BTreeMap<String, InstanceRecord>>,
}

impl EmulatorState {
    pub fn get(&self, platform: Platform, version: &str) -> Option<&InstanceRecord> {
        self.instances.get(platform.name())?.get(version)
    }

    pub fn insert(&mut self, platform: Platform, version: &str, record: InstanceRecord) {
        self.instances
            .entry(platform.name().to_string())
            .or_default()
            .insert(version.to_string(), record);
    }

    pub fn remove(&mut self, platform: Platform, version: &str) -> Option<InstanceRecord> {
        let versions = self.instances.get_mut(platform.name())?;
        let removed = versions.remove(version);
        if versions.is_empty() {
            self.instances.remove(platform.name());
        }
        removed
    }

    /// All records, skipping platform keys this tool does not know
    /// (written by a newer tool; left untouched on save).
    pub fn iter(&self) -> impl Iterator<Item = (Platform, &str, &InstanceRecord)> {
        self.instances.iter().flat_map(|(name, versions)| {
            let platform = match name.parse::<Platform>() {
                Ok(p) => p,
                Err(_) => {
                    warn!("Ignoring unknown platform {:?} in state file", name);
                    return Vec::new().into_iter();
                }
            };
            versions
                .iter()
                .map(|(version, record)| (platform, version.as_str(), record))
                .collect::<Vec<_>>()
                .into_iter()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.instances.values().all(|v| v.is_empty())
    }
}

/// Atomic load/replace access to the persisted state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the state file. A missing file is an empty state,
    /// not an error.
    pub fn load(&self) -> Result<EmulatorState, StateError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {:?}", self.path);
                Ok(EmulatorState::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically replace the state file: write a sibling temp file, then
    /// rename over the target.
    pub fn save(&self, state: &EmulatorState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(state)?;
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!("State saved to {:?}", self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(qemu_port: u16) -> InstanceRecord {
        InstanceRecord {
            qemu_port,
            console_port: qemu_port + 1,
            gdb_port: qemu_port + 2,
            runtime_port: qemu_port + 3,
            display: false,
            qemu: Some(ProcessStamp {
                pid: 4242,
                start_ticks: Some(100),
            }),
            runtime: None,
            relay: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("emulators.json"));
        let state = store.load().unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("emulators.json"));

        let mut state = EmulatorState::default();
        state.insert(Platform::Basalt, "4.5", record(50000));
        state.insert(Platform::Aplite, "3.14", record(51000));
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.get(Platform::Basalt, "4.5").unwrap().qemu_port, 50000);
    }

    #[test]
    fn save_of_loaded_state_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("emulators.json"));

        let mut state = EmulatorState::default();
        state.insert(Platform::Chalk, "4.1", record(52000));
        store.save(&state).unwrap();

        let first = std::fs::read_to_string(store.path()).unwrap();
        store.save(&store.load().unwrap()).unwrap();
        let second = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unknown_fields_survive_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emulators.json");
        std::fs::write(
            &path,
            r#"{"basalt": {"4.5": {
                "qemu_port": 50000, "console_port": 50001,
                "gdb_port": 50002, "runtime_port": 50003,
                "display": true, "future_field": [1, 2, 3]
            }}}"#,
        )
        .unwrap();

        let state = StateStore::new(&path).load().unwrap();
        let rec = state.get(Platform::Basalt, "4.5").unwrap();
        assert!(rec.display);
        assert!(rec.qemu.is_none());
    }

    #[test]
    fn remove_drops_empty_platform_key() {
        let mut state = EmulatorState::default();
        state.insert(Platform::Emery, "4.4", record(53000));
        assert!(state.remove(Platform::Emery, "4.4").is_some());
        assert!(state.is_empty());
        assert_eq!(state.iter().count(), 0);
    }

    #[test]
    fn iter_skips_unknown_platform_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emulators.json");
        std::fs::write(
            &path,
            r#"{"quartz": {"9.9": {
                "qemu_port": 1, "console_port": 2, "gdb_port": 3, "runtime_port": 4
            }}}"#,
        )
        .unwrap();

        let state = StateStore::new(&path).load().unwrap();
        assert_eq!(state.iter().count(), 0);
        assert!(!state.is_empty());
    }
}
