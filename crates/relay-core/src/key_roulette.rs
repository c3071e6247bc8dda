//! Round-robin API key selection per provider scope.
//!
//! Each scope (a provider instance id) owns a cursor into its key list. The
//! cursor lives in a pluggable [`CursorStore`] so hosts can persist it across
//! processes. Calls for the same scope are serialized; different scopes never
//! contend.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};

/// Storage for per-scope cursors.
pub trait CursorStore: Send + Sync {
    fn get(&self, scope: &str) -> Option<usize>;
    fn put(&self, scope: &str, cursor: usize);
}

/// Process-local cursor storage.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<String, usize>>,
}

impl CursorStore for MemoryCursorStore {
    fn get(&self, scope: &str) -> Option<usize> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .copied()
    }

    fn put(&self, scope: &str, cursor: usize) {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scope.to_string(), cursor);
    }
}

/// Cursor storage backed by a JSON file.
///
/// Write failures are logged and otherwise ignored; the in-memory copy stays
/// authoritative for the running process.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    cursors: Mutex<HashMap<String, usize>>,
}

impl FileCursorStore {
    /// Opens (or lazily creates) the cursor file at `path`.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cursors = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read key cursors from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("parse key cursors from {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            cursors: Mutex::new(cursors),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes through a temp file so a crash never leaves a truncated store.
    fn persist(&self, cursors: &HashMap<String, usize>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(cursors)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json)
            .with_context(|| format!("write key cursors to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("rename {} to {}", tmp_path.display(), self.path.display())
        })?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

impl CursorStore for FileCursorStore {
    fn get(&self, scope: &str) -> Option<usize> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scope)
            .copied()
    }

    fn put(&self, scope: &str, cursor: usize) {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        cursors.insert(scope.to_string(), cursor);
        if let Err(err) = self.persist(&cursors) {
            tracing::warn!(path = %self.path.display(), "failed to persist key cursors: {err:#}");
        }
    }
}

/// Round-robin key selector shared by all adapters.
pub struct KeyRoulette {
    store: Arc<dyn CursorStore>,
    scope_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for KeyRoulette {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCursorStore::default()))
    }
}

impl std::fmt::Debug for KeyRoulette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRoulette").finish_non_exhaustive()
    }
}

impl KeyRoulette {
    pub fn new(store: Arc<dyn CursorStore>) -> Self {
        Self {
            store,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the key at the scope's cursor and advances the cursor.
    ///
    /// A stored cursor that is out of range (the key list shrank) is clamped
    /// to the last key. Returns `None` for an empty key list.
    pub fn next<'a>(&self, scope: &str, keys: &'a [String]) -> Option<&'a str> {
        if keys.is_empty() {
            return None;
        }

        let scope_lock = self.scope_lock(scope);
        let _guard = scope_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let cursor = self
            .store
            .get(scope)
            .map_or(0, |cursor| cursor.min(keys.len() - 1));
        self.store.put(scope, (cursor + 1) % keys.len());

        tracing::debug!(scope, index = cursor, total = keys.len(), "selected api key");
        Some(keys[cursor].as_str())
    }

    fn scope_lock(&self, scope: &str) -> Arc<Mutex<()>> {
        let mut locks = self.scope_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(scope.to_string()).or_default())
    }
}
