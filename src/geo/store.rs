//! Backing stores for the geolocation cache.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use super::{GeoCacheEntry, GeoKey};
use crate::shared::CacheError;

/// Persistence behind [`super::GeoCache`].
///
/// `load` must never fail because of bad content: unreadable or corrupt data
/// is reported and treated as absent. `save` receives only changed entries
/// and must write each of them atomically.
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Vec<GeoCacheEntry>;
    fn save(&self, entries: &[GeoCacheEntry]) -> Result<(), CacheError>;
}

/// All entries in one pretty-printed JSON file, replaced through a temp file.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: &Path) -> Self {
        JsonFileStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStore for JsonFileStore {
    fn load(&self) -> Vec<GeoCacheEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Geo cache {:?} unreadable, starting empty: {}", self.path, e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Geo cache {:?} is corrupt, starting empty: {}", self.path, e);
                Vec::new()
            }
        }
    }

    fn save(&self, entries: &[GeoCacheEntry]) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }
        // Merge with what is on disk so concurrent writers through other
        // handles do not drop each other's entries.
        let mut all: HashMap<GeoKey, GeoCacheEntry> =
            self.load().into_iter().map(|e| (e.key, e)).collect();
        for entry in entries {
            all.insert(entry.key, entry.clone());
        }
        let mut all: Vec<GeoCacheEntry> = all.into_values().collect();
        all.sort_by_key(|e| e.key.to_string());

        let content = serde_json::to_string_pretty(&all)?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// One JSON file per key, so every entry is written independently.
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: &Path) -> Self {
        DirStore {
            dir: dir.to_path_buf(),
        }
    }

    fn entry_path(&self, key: &GeoKey) -> PathBuf {
        let name: String = key
            .to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl CacheStore for DirStore {
    fn load(&self) -> Vec<GeoCacheEntry> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Geo cache dir {:?} unreadable, starting empty: {}", self.dir, e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<GeoCacheEntry>(&c).map_err(|e| e.to_string()));
            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Ignoring corrupt geo cache entry {:?}: {}", path, e),
            }
        }
        entries
    }

    fn save(&self, entries: &[GeoCacheEntry]) -> Result<(), CacheError> {
        for entry in entries {
            let content = serde_json::to_string_pretty(entry)?;
            write_atomic(&self.entry_path(&entry.key), content.as_bytes())?;
        }
        Ok(())
    }
}

/// Keeps everything in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<GeoKey, GeoCacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_entries(entries: Vec<GeoCacheEntry>) -> Self {
        MemoryStore {
            entries: Mutex::new(entries.into_iter().map(|e| (e.key, e)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Vec<GeoCacheEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    fn save(&self, entries: &[GeoCacheEntry]) -> Result<(), CacheError> {
        let mut stored = match self.entries.lock() {
            Ok(stored) => stored,
            Err(poisoned) => poisoned.into_inner(),
        };
        for entry in entries {
            stored.insert(entry.key, entry.clone());
        }
        Ok(())
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, content).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
