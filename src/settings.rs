//! # Settings Store
//!
//! Key-value persistence for the last-used printer. The connection facade
//! reads and writes two keys:
//!
//! - `printer.mac_address`
//! - `printer.device_name`
//!
//! [`JsonFileSettings`] keeps them in a flat JSON object on disk;
//! [`MemorySettings`] is the in-process variant.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{PrinterError, Result};
use crate::sync::lock;

pub mod keys {
    pub const PRINTER_MAC_ADDRESS: &str = "printer.mac_address";
    pub const PRINTER_DEVICE_NAME: &str = "printer.device_name";
}

/// String key-value store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.values).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.values).remove(key);
        Ok(())
    }
}

/// Settings persisted as a JSON object, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileSettings {
    /// Load `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                PrinterError::Settings(format!("Failed to parse {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(PrinterError::Settings(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        debug!(path = %path.display(), keys = values.len(), "settings loaded");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// `$XDG_CONFIG_HOME/coreprint/settings.json`, falling back to
    /// `~/.config`.
    pub fn default_path() -> Option<PathBuf> {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("coreprint").join("settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PrinterError::Settings(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| PrinterError::Settings(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| {
            PrinterError::Settings(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = lock(&self.values);
        let mut next = values.clone();
        next.insert(key.to_string(), value.to_string());
        self.save(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = lock(&self.values);
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.save(&next)?;
        *values = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_settings() {
        let settings = MemorySettings::new();
        assert_eq!(settings.get(keys::PRINTER_MAC_ADDRESS), None);

        settings.set(keys::PRINTER_MAC_ADDRESS, "66:22:B3:00:00:01").unwrap();
        assert_eq!(settings.get(keys::PRINTER_MAC_ADDRESS).as_deref(), Some("66:22:B3:00:00:01"));

        settings.remove(keys::PRINTER_MAC_ADDRESS).unwrap();
        settings.remove(keys::PRINTER_MAC_ADDRESS).unwrap();
        assert_eq!(settings.get(keys::PRINTER_MAC_ADDRESS), None);
    }

    #[test]
    fn test_json_settings_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = JsonFileSettings::open(&path).unwrap();
        settings.set(keys::PRINTER_MAC_ADDRESS, "66:22:B3:00:00:01").unwrap();
        settings.set(keys::PRINTER_DEVICE_NAME, "CorePrint 01").unwrap();

        let reloaded = JsonFileSettings::open(&path).unwrap();
        assert_eq!(reloaded.get(keys::PRINTER_DEVICE_NAME).as_deref(), Some("CorePrint 01"));

        reloaded.remove(keys::PRINTER_DEVICE_NAME).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("printer.mac_address"));
        assert!(!text.contains("printer.device_name"));
    }

    #[test]
    fn test_json_settings_failed_write_keeps_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = JsonFileSettings::open(&path).unwrap();
        settings.set(keys::PRINTER_MAC_ADDRESS, "66:22:B3:00:00:01").unwrap();

        // A directory in place of the file makes every write fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(matches!(
            settings.set(keys::PRINTER_MAC_ADDRESS, "AA:BB:CC:DD:EE:FF"),
            Err(PrinterError::Settings(_))
        ));
        assert!(settings.remove(keys::PRINTER_MAC_ADDRESS).is_err());
        assert_eq!(settings.get(keys::PRINTER_MAC_ADDRESS).as_deref(), Some("66:22:B3:00:00:01"));
    }

    #[test]
    fn test_json_settings_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = JsonFileSettings::open(file.path()).unwrap();
        assert_eq!(settings.get(keys::PRINTER_MAC_ADDRESS), None);
    }

    #[test]
    fn test_json_settings_rejects_garbage() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "[1, 2, 3]").unwrap();
        assert!(matches!(JsonFileSettings::open(file.path()), Err(PrinterError::Settings(_))));
    }
}
