use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Persistent string key-value storage, e.g. browser local storage or a
/// state directory.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub fn progress_key(document_key: &str) -> String {
    format!("progress:{document_key}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub document_key: String,
    pub page_number: usize,
}

/// Last-viewed page per document. Never fails into the caller: storage
/// errors are logged and unreadable records read as "no progress".
#[derive(Clone)]
pub struct ProgressStore {
    store: Arc<dyn KeyValueStore>,
}

impl ProgressStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn save(&self, document_key: &str, page_number: usize) {
        let key = progress_key(document_key);
        match self.store.set(&key, &page_number.to_string()) {
            Ok(()) => debug!(document = document_key, page_number, "progress saved"),
            Err(err) => warn!(document = document_key, error = %err, "failed to save progress"),
        }
    }

    pub fn save_record(&self, record: &ProgressRecord) {
        self.save(&record.document_key, record.page_number);
    }

    pub fn load(&self, document_key: &str) -> Option<usize> {
        let raw = match self.store.get(&progress_key(document_key)) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(document = document_key, error = %err, "failed to read progress");
                return None;
            }
        };
        match raw.trim().parse::<usize>() {
            Ok(0) | Err(_) => {
                warn!(document = document_key, raw = %raw, "ignoring unreadable progress record");
                None
            }
            Ok(page) => Some(page),
        }
    }

    pub fn load_record(&self, document_key: &str) -> Option<ProgressRecord> {
        self.load(document_key).map(|page_number| ProgressRecord {
            document_key: document_key.to_owned(),
            page_number,
        })
    }
}

pub struct MemoryKeyValueStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

static KEY_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f6d2a1e-8c4b-5e7f-9a0d-1b2c3d4e5f60").expect("valid namespace UUID")
});

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    value: String,
}

/// One JSON file per key, named by a UUIDv5 of the key.
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let id = Uuid::new_v5(&KEY_NAMESPACE, key.as_bytes());
        self.root.join(format!("{id}.json"))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let entry: StoredEntry = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        if entry.key != key {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&StoredEntry {
            key: key.to_owned(),
            value: value.to_owned(),
        })?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}
