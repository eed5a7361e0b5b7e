use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use log::debug;
use tempfile::NamedTempFile;

use crate::errors::{TsaError, TsaErrorKind, TsaResult};

/// Value written to a store that does not exist yet.
pub const INITIAL_SERIAL: u64 = 1000;

/// Durable TSTInfo serial counter backed by a text file holding the next
/// serial as a base-10 integer followed by a newline.
///
/// Calls within one process are serialized by a mutex that covers the whole
/// read-modify-write sequence. Nothing stops two processes that point at the
/// same file from handing out the same serial.
#[derive(Debug)]
pub struct SerialAllocator {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SerialAllocator {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(self: &Self) -> &Path {
        &self.path
    }

    /// Returns the stored value and persists its successor.
    pub fn allocate(self: &Self) -> Result<u64, TsaError> {
        let _guard = self.lock.lock().map_err(|err| TsaError {
            kind: TsaErrorKind::SerialStoreError,
            message: err.to_string(),
        })?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_app_err(TsaErrorKind::IoError)?;

        if !self.path.exists() {
            debug!("seeding serial store {}", self.path.display());
            Self::store(&dir, &self.path, INITIAL_SERIAL)?;
        }

        let current = Self::load(&self.path)?;
        let next = current.checked_add(1).ok_or(TsaError {
            kind: TsaErrorKind::SerialStoreError,
            message: format!("serial {} is exhausted", current),
        })?;
        Self::store(&dir, &self.path, next)?;

        debug!("allocated serial {}", current);
        Ok(current)
    }

    fn load(path: &Path) -> Result<u64, TsaError> {
        let text = fs::read_to_string(path).map_app_err(TsaErrorKind::IoError)?;

        text.trim().parse::<u64>().map_err(|err| TsaError {
            kind: TsaErrorKind::SerialStoreError,
            message: format!("{}: {:?}: {}", path.display(), text.trim(), err),
        })
    }

    // 先写临时文件再 rename，写失败时旧值保持不变
    fn store(dir: &Path, path: &Path, value: u64) -> Result<(), TsaError> {
        let mut file = NamedTempFile::new_in(dir).map_app_err(TsaErrorKind::IoError)?;
        writeln!(file, "{}", value).map_app_err(TsaErrorKind::IoError)?;
        file.as_file()
            .sync_all()
            .map_app_err(TsaErrorKind::IoError)?;
        file.persist(path)
            .map_err(|err| err.error)
            .map_app_err(TsaErrorKind::IoError)?;

        Ok(())
    }
}
