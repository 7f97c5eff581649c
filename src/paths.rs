use std::path::PathBuf;

/// Base directory for persisted state (device manifest, lockfile). Honors
/// `SPM_STATE_DIR` for tests the way the teacher's `cache_root` honors
/// `SK_CACHE_DIR`.
pub fn state_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("SPM_STATE_DIR") {
        return PathBuf::from(override_dir);
    }
    if let Some(pd) = directories::ProjectDirs::from("", "", "sk") {
        pd.data_dir().to_path_buf()
    } else {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        home.join(".local/share/sk")
    }
}

pub fn manifest_path() -> PathBuf {
    state_dir().join("skills.json")
}

pub fn default_skills_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("SPM_SKILLS_DIR") {
        return PathBuf::from(override_dir);
    }
    state_dir().join(crate::config::DEFAULT_SKILLS_SUBDIR)
}

/// Fixed cross-process lock file path (§5, §6), permissions `0o777` on unix.
pub fn lock_file_path() -> PathBuf {
    std::env::temp_dir().join("sk-manager.lock")
}
