//! Per-skill install / update / remove (§4.D).
//!
//! The descriptor never holds a back-pointer to the `Manager`; recursive
//! skill-dependency installs go through an injected `SkillInstaller` trait
//! (§9 Design Notes "Cyclic references").

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

use tracing::{info, warn};

use crate::config::{Config, ENTRY_POINT_FILE};
use crate::descriptor::SkillDescriptor;
use crate::error::{Result, SpmError};

/// Injected collaborator so `SkillEntry::install`'s recursive
/// `skill_requirements.txt` installs don't need a hard pointer back to the
/// `Manager`.
pub trait SkillInstaller {
    fn install_by_name(&self, name: &str) -> Result<()>;
}

/// Serializes all language-package installer invocations process-wide (§5).
static PIP_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn pip_lock() -> &'static Mutex<()> {
    PIP_LOCK.get_or_init(|| Mutex::new(()))
}

fn dependent_skills(path: &Path) -> Vec<String> {
    let reqs = path.join("skill_requirements.txt");
    let Ok(text) = fs::read_to_string(reqs) else {
        return Vec::new();
    };
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn run_skill_requirements(path: &Path, installer: &dyn SkillInstaller) -> Result<()> {
    for dep in dependent_skills(path) {
        info!("installing skill dependency: {dep}");
        match installer.install_by_name(&dep) {
            Ok(()) => {}
            Err(e) if e.is_already_installed() => {}
            Err(e) => return Err(SpmError::SkillRequirements(e.to_string())),
        }
    }
    Ok(())
}

fn run_requirements_sh(path: &Path) -> Result<bool> {
    let script = path.join("requirements.sh");
    if !script.exists() {
        return Ok(false);
    }
    let status = Command::new("bash")
        .arg(&script)
        .current_dir(path)
        .status()
        .map_err(|e| SpmError::Other(format!("failed to spawn bash for requirements.sh: {e}")))?;
    if !status.success() {
        let code = status.code().unwrap_or(-1);
        warn!("requirements.sh failed with error code: {code}");
        return Err(SpmError::SystemRequirements(code));
    }
    info!("successfully ran requirements.sh");
    Ok(true)
}

fn run_pip(path: &Path, constraints: Option<&Path>) -> Result<bool> {
    let requirements = path.join("requirements.txt");
    if !requirements.exists() {
        return Ok(false);
    }
    let _guard = pip_lock().lock().unwrap_or_else(|e| e.into_inner());

    let can_pip = which::which("python3")
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .map(is_writable)
        .unwrap_or(false);

    let run = |with_sudo: bool| -> std::io::Result<std::process::Output> {
        let mut args: Vec<String> = Vec::new();
        if with_sudo {
            args.push("sudo".to_string());
            args.push("-n".to_string());
        }
        args.push("python3".to_string());
        args.push("-m".to_string());
        args.push("pip".to_string());
        args.push("install".to_string());
        args.push("-r".to_string());
        args.push(requirements.to_string_lossy().to_string());
        if let Some(c) = constraints {
            args.push("-c".to_string());
            args.push(c.to_string_lossy().to_string());
        }
        Command::new(&args[0]).args(&args[1..]).output()
    };

    info!("installing requirements.txt");
    let out = run(!can_pip).map_err(|e| SpmError::Other(format!("failed to spawn pip: {e}")))?;
    if !out.status.success() {
        let code = out.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&out.stderr).to_string();
        let stdout = String::from_utf8_lossy(&out.stdout).to_string();
        if code == 1 && stderr.contains("sudo:") && !can_pip {
            return Err(SpmError::PipRequirements {
                code: 2,
                stdout: String::new(),
                stderr: "Permission denied while installing pip dependencies. Please run in virtualenv or use sudo".to_string(),
            });
        }
        return Err(SpmError::PipRequirements { code, stdout, stderr });
    }
    Ok(true)
}

#[cfg(unix)]
fn is_writable(dir: std::path::PathBuf) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(&dir)
        .map(|m| m.permissions().mode() & 0o200 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_writable(dir: std::path::PathBuf) -> bool {
    fs::metadata(&dir).map(|m| !m.permissions().readonly()).unwrap_or(false)
}

fn run_post_move_requirements(path: &Path, cfg: &Config) -> Result<()> {
    run_requirements_sh(path)?;
    run_pip(path, cfg.pip_constraints.as_deref())?;
    Ok(())
}

/// Install a not-yet-local skill (§4.D `install`).
pub fn install(
    descriptor: &mut SkillDescriptor,
    cfg: &Config,
    installer: &dyn SkillInstaller,
) -> Result<()> {
    if descriptor.is_local {
        return Err(SpmError::AlreadyInstalled(descriptor.name.clone()));
    }

    // Step 1: skill dependencies. Mirrors the upstream ordering exactly
    // (checked against the not-yet-existing local_path, so this is only
    // ever non-empty for a skill being reinstalled over a leftover dir).
    run_skill_requirements(&descriptor.local_path, installer)?;

    // Step 2: clone to scratch, pin.
    let scratch_parent = tempfile::tempdir().map_err(SpmError::Io)?;
    let scratch = scratch_parent.path().join("skill");
    crate::git::clone(&descriptor.url, &scratch)
        .map_err(|e| SpmError::Clone(e.to_string()))?;
    let rev = if descriptor.pinned_commit.is_empty() {
        "HEAD"
    } else {
        descriptor.pinned_commit.as_str()
    };
    crate::git::reset_hard(&scratch, rev).map_err(|e| SpmError::Clone(e.to_string()))?;

    // Step 3: inhibit auto-load during the move.
    let entry_in_scratch = scratch.join(ENTRY_POINT_FILE);
    let hidden_in_scratch = scratch.join("__init__");
    let had_entry_point = entry_in_scratch.is_file();
    if had_entry_point {
        fs::rename(&entry_in_scratch, &hidden_in_scratch).map_err(SpmError::Io)?;
    }

    // Step 4: move scratch -> final path.
    if let Some(parent) = descriptor.local_path.parent() {
        fs::create_dir_all(parent).map_err(SpmError::Io)?;
    }
    fs::rename(&scratch, &descriptor.local_path).map_err(SpmError::Io)?;
    descriptor.is_local = true;

    // Steps 5-6: system then language requirements, always restoring the
    // entry point afterward even on failure.
    let result = run_post_move_requirements(&descriptor.local_path, cfg);
    restore_entry_point(&descriptor.local_path, had_entry_point);
    result?;

    info!("successfully installed {}", descriptor.name);
    Ok(())
}

/// Update an already-local skill (§4.D `update`). Returns whether anything
/// changed.
pub fn update(descriptor: &mut SkillDescriptor, cfg: &Config) -> Result<bool> {
    if !descriptor.is_local {
        return Err(SpmError::NotInstalled(descriptor.name.clone()));
    }
    let path = descriptor.local_path.clone();

    let sha_before = crate::git::rev_parse(&path, "HEAD").map_err(|e| SpmError::Git(e.to_string()))?;

    let dirty = crate::git::dirty_status(&path).map_err(|e| SpmError::Git(e.to_string()))?;
    if !dirty.is_empty() {
        return Err(SpmError::SkillModified(dirty));
    }

    crate::git::fetch(&path).map_err(|e| SpmError::Git(e.to_string()))?;

    let current_branch = crate::git::rev_parse_abbrev_ref(&path, "HEAD")
        .map_err(|e| SpmError::Git(e.to_string()))?;
    if !descriptor.pinned_commit.is_empty() && cfg.switchable_branches.contains(&current_branch) {
        if let Some(branch) = crate::git::first_branch_containing(&path, &descriptor.pinned_commit)
            .map_err(|e| SpmError::Git(e.to_string()))?
        {
            crate::git::checkout(&path, &branch).map_err(|e| SpmError::Git(e.to_string()))?;
        }
    }

    let merge_target = if descriptor.pinned_commit.is_empty() {
        "origin/HEAD"
    } else {
        descriptor.pinned_commit.as_str()
    };
    crate::git::merge_ff_only(&path, merge_target).map_err(|e| SpmError::Git(e.to_string()))?;

    let sha_after = crate::git::rev_parse(&path, "HEAD").map_err(|e| SpmError::Git(e.to_string()))?;

    if sha_before != sha_after {
        run_post_move_requirements(&path, cfg)?;
        touch_entry_point(&path)?;
        info!("updated {}", descriptor.name);
        Ok(true)
    } else {
        info!("nothing new for {}", descriptor.name);
        Ok(false)
    }
}

fn restore_entry_point(path: &Path, had_entry_point: bool) {
    if !had_entry_point {
        return;
    }
    let hidden = path.join("__init__");
    let entry = path.join(ENTRY_POINT_FILE);
    if hidden.is_file() {
        let _ = fs::rename(hidden, entry);
    }
}

fn touch_entry_point(path: &Path) -> Result<()> {
    let entry = path.join(ENTRY_POINT_FILE);
    if !entry.is_file() {
        return Ok(());
    }
    let file = fs::OpenOptions::new()
        .write(true)
        .open(&entry)
        .map_err(SpmError::Io)?;
    file.set_modified(SystemTime::now()).map_err(SpmError::Io)?;
    Ok(())
}

/// Remove a local skill (§4.D `remove`).
pub fn remove(descriptor: &mut SkillDescriptor) -> Result<()> {
    if !descriptor.is_local {
        return Err(SpmError::AlreadyRemoved(descriptor.name.clone()));
    }
    fs::remove_dir_all(&descriptor.local_path)
        .map_err(|e| SpmError::Remove(e.to_string()))?;
    info!("successfully removed {}", descriptor.name);
    descriptor.is_local = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command as Cmd;

    struct NoopInstaller;
    impl SkillInstaller for NoopInstaller {
        fn install_by_name(&self, _name: &str) -> Result<()> {
            Ok(())
        }
    }

    fn init_bare_source(dir: &Path) -> PathBuf {
        let src = dir.join("source");
        fs::create_dir_all(&src).unwrap();
        Cmd::new("git").args(["init", "-q"]).current_dir(&src).status().unwrap();
        Cmd::new("git").args(["config", "user.email", "t@example.com"]).current_dir(&src).status().unwrap();
        Cmd::new("git").args(["config", "user.name", "T"]).current_dir(&src).status().unwrap();
        fs::write(src.join(ENTRY_POINT_FILE), "# skill entry\n").unwrap();
        Cmd::new("git").args(["add", "-A"]).current_dir(&src).status().unwrap();
        Cmd::new("git").args(["commit", "-q", "-m", "init"]).current_dir(&src).status().unwrap();
        src
    }

    #[test]
    fn install_moves_repo_and_preserves_entry_point() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new(
            "demo",
            &dest,
            &format!("file://{}", src.display()),
            "",
        );
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();
        assert!(d.is_local);
        assert!(dest.join(ENTRY_POINT_FILE).is_file());
    }

    #[test]
    fn install_twice_raises_already_installed() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();
        let err = install(&mut d, &cfg, &NoopInstaller).unwrap_err();
        assert!(err.is_already_installed());
    }

    #[test]
    fn remove_twice_raises_already_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();
        remove(&mut d).unwrap();
        assert!(!dest.exists());
        let err = remove(&mut d).unwrap_err();
        assert!(err.is_already_removed());
    }

    #[test]
    fn update_on_unchanged_repo_returns_false() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();
        let changed = update(&mut d, &cfg).unwrap();
        assert!(!changed);
    }

    #[test]
    fn update_with_local_edits_raises_skill_modified() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();
        fs::write(dest.join(ENTRY_POINT_FILE), "# modified\n").unwrap();
        let err = update(&mut d, &cfg).unwrap_err();
        assert!(matches!(err, SpmError::SkillModified(_)));
    }

    #[test]
    fn update_pulls_new_commits() {
        let tmp = tempfile::tempdir().unwrap();
        let src = init_bare_source(tmp.path());
        let dest = tmp.path().join("skills").join("demo.author");
        let mut d = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
        let cfg = Config::default();
        install(&mut d, &cfg, &NoopInstaller).unwrap();

        fs::write(src.join("NEWS.txt"), "more\n").unwrap();
        Cmd::new("git").args(["add", "-A"]).current_dir(&src).status().unwrap();
        Cmd::new("git").args(["commit", "-q", "-m", "news"]).current_dir(&src).status().unwrap();

        let changed = update(&mut d, &cfg).unwrap();
        assert!(changed);
        assert!(dest.join("NEWS.txt").exists());
    }
}
