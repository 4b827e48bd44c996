use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{ControllerError, Result};

/// Named-blob persistence. Writes replace the whole blob.
pub trait BlobStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// One file per blob under a directory.
///
/// # File Format
/// `{root}/{name}` holds the raw bytes. Writes go to `{name}.tmp` first and
/// are renamed into place, so a reader never sees half a record.
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ControllerError::Storage(format!("{}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ControllerError::Storage(format!("invalid blob name {:?}", name)));
        }
        Ok(self.root.join(name))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ControllerError::Storage(format!("{}: {}", path.display(), e))),
        }
    }

    fn set(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| ControllerError::Storage(format!("{}: {}", path.display(), e)))
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| ControllerError::Storage("poisoned".to_string()))?;
        Ok(blobs.get(name).cloned())
    }

    fn set(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| ControllerError::Storage("poisoned".to_string()))?;
        blobs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}
