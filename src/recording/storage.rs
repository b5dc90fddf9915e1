//! Storage inspection for the recording target volume

use crate::error::{CamError, CamResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Free-space and file-size queries against the recording volume
pub trait StorageInspector: Send + Sync {
    /// Bytes available to unprivileged writers on the volume holding `path`
    fn free_space(&self, path: &Path) -> CamResult<u64>;

    /// Current size of the file at `path`
    fn file_size(&self, path: &Path) -> CamResult<u64>;
}

/// Directory whose volume receives the recording
pub fn volume_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Real filesystem inspector
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStorageInspector;

impl FsStorageInspector {
    pub fn new() -> Self {
        Self
    }
}

impl StorageInspector for FsStorageInspector {
    fn free_space(&self, path: &Path) -> CamResult<u64> {
        if !path.exists() {
            return Err(CamError::StorageNotFound(path.to_path_buf()));
        }
        statvfs_available(path)
    }

    fn file_size(&self, path: &Path) -> CamResult<u64> {
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CamError::StorageNotFound(path.to_path_buf()))
            }
            Err(e) => Err(CamError::FileRead(format!("{}: {}", path.display(), e))),
        }
    }
}

#[cfg(unix)]
fn statvfs_available(path: &Path) -> CamResult<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| CamError::FileRead(format!("invalid path: {}", path.display())))?;

    // SAFETY: c_path is a valid NUL-terminated string and stat is written by
    // statvfs before it is read.
    unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(CamError::FileRead(format!(
                "statvfs failed for {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

#[cfg(not(unix))]
fn statvfs_available(path: &Path) -> CamResult<u64> {
    Err(CamError::FileRead(format!(
        "free space query not supported for {}",
        path.display()
    )))
}

/// In-memory inspector with settable free space, for tests and simulators
#[derive(Debug, Default)]
pub struct FixedStorage {
    free: AtomicU64,
    sizes: Mutex<HashMap<PathBuf, u64>>,
    queries: AtomicUsize,
}

impl FixedStorage {
    pub fn new(free_bytes: u64) -> Self {
        Self {
            free: AtomicU64::new(free_bytes),
            sizes: Mutex::new(HashMap::new()),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set_free_space(&self, free_bytes: u64) {
        self.free.store(free_bytes, Ordering::SeqCst);
    }

    pub fn set_file_size(&self, path: impl Into<PathBuf>, size: u64) {
        if let Ok(mut sizes) = self.sizes.lock() {
            sizes.insert(path.into(), size);
        }
    }

    /// Number of free-space queries served
    pub fn free_space_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl StorageInspector for FixedStorage {
    fn free_space(&self, _path: &Path) -> CamResult<u64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.free.load(Ordering::SeqCst))
    }

    fn file_size(&self, path: &Path) -> CamResult<u64> {
        self.sizes
            .lock()?
            .get(path)
            .copied()
            .ok_or_else(|| CamError::StorageNotFound(path.to_path_buf()))
    }
}
