use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

pub use backfill_core::{CursorStore, CursorStoreError};

#[derive(Clone, Default)]
pub struct InMemoryCursorStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl CursorStore for InMemoryCursorStore {
    fn get(&self, room_id: &str) -> Result<Option<String>, CursorStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CursorStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(room_id).cloned())
    }

    fn set(&self, room_id: &str, cursor: &str) -> Result<(), CursorStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CursorStoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(room_id.to_owned(), cursor.to_owned());
        Ok(())
    }
}

/// Cursor map persisted as a JSON object on disk.
///
/// The whole map is loaded on open and rewritten on every `set` through a
/// sibling temp file followed by a rename, so a crash never leaves a torn file.
pub struct JsonFileCursorStore {
    path: PathBuf,
    data: RwLock<HashMap<String, String>>,
}

impl JsonFileCursorStore {
    /// Open the store at `path`, starting empty when the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CursorStoreError> {
        let path = path.into();
        let data = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                CursorStoreError::Backend(format!("corrupt cursor file {}: {err}", path.display()))
            })?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(unavailable(&path, err)),
        };
        tracing::debug!(path = %path.display(), rooms = data.len(), "opened cursor store");

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &HashMap<String, String>) -> Result<(), CursorStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|err| unavailable(parent, err))?;
        }

        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|err| CursorStoreError::Backend(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes).map_err(|err| unavailable(&tmp_path, err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| unavailable(&self.path, err))
    }
}

impl CursorStore for JsonFileCursorStore {
    fn get(&self, room_id: &str) -> Result<Option<String>, CursorStoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| CursorStoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(room_id).cloned())
    }

    fn set(&self, room_id: &str, cursor: &str) -> Result<(), CursorStoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| CursorStoreError::Backend("poisoned lock".to_owned()))?;

        // Only commit in memory once the file write went through.
        let mut next = data.clone();
        next.insert(room_id.to_owned(), cursor.to_owned());
        self.persist(&next)?;
        *data = next;
        Ok(())
    }
}

fn unavailable(path: &Path, err: io::Error) -> CursorStoreError {
    CursorStoreError::Unavailable(format!("{}: {err}", path.display()))
}

/// Prefixes every room key with a scope, e.g. one per account.
#[derive(Clone)]
pub struct ScopedCursorStore<S: CursorStore> {
    inner: S,
    scope: String,
}

impl<S: CursorStore> ScopedCursorStore<S> {
    pub fn new(inner: S, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    fn key(&self, room_id: &str) -> String {
        format!("{}:{room_id}", self.scope)
    }
}

impl<S: CursorStore> CursorStore for ScopedCursorStore<S> {
    fn get(&self, room_id: &str) -> Result<Option<String>, CursorStoreError> {
        self.inner.get(&self.key(room_id))
    }

    fn set(&self, room_id: &str, cursor: &str) -> Result<(), CursorStoreError> {
        self.inner.set(&self.key(room_id), cursor)
    }
}
