//! Cross-process file lock guarding the device manifest and catalog clone
//! (§5, §6). Acquired once in `Manager::new` to serialize initial manifest
//! migration, and re-acquired around the critical (manifest read-modify-write)
//! sections of mutating `Manager` calls.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs4::fs_std::FileExt;

use crate::error::{Result, SpmError};

pub struct ProcessLock {
    file: File,
}

impl ProcessLock {
    /// Open (creating if absent) and exclusively lock `path`. Blocks until
    /// held. Permissions `0o777` on unix so any user on the device can take
    /// the lock, matching a shared-device skill manager (§5).
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(SpmError::Io)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(SpmError::Io)?;
        set_world_writable(path);
        file.lock_exclusive()
            .map_err(|e| SpmError::Other(format!("failed to acquire lock {}: {e}", path.display())))?;
        Ok(ProcessLock { file })
    }
}

#[cfg(unix)]
fn set_world_writable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o777));
}

#[cfg(not(unix))]
fn set_world_writable(_path: &Path) {}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
