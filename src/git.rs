//! Thin wrappers around the `git` CLI (shelled out, matching the teacher's
//! `Command::new("git")` style rather than a git library) used by both the
//! catalog (`catalog.rs`) and the per-skill lifecycle (`lifecycle.rs`).

use std::path::Path;
use std::process::Command;

use crate::error::{SpmError, Result};

fn git(dir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.arg("-C").arg(dir);
    cmd
}

fn run(mut cmd: Command) -> Result<String> {
    let out = cmd
        .output()
        .map_err(|e| SpmError::Git(format!("failed to spawn git: {e}")))?;
    if !out.status.success() {
        return Err(SpmError::Git(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

pub fn clone(url: &str, dest: &Path) -> Result<()> {
    let out = Command::new("git")
        .args(["clone", "--", url])
        .arg(dest)
        .output()
        .map_err(|e| SpmError::Git(format!("failed to spawn git clone: {e}")))?;
    if !out.status.success() {
        return Err(SpmError::Git(String::from_utf8_lossy(&out.stderr).trim().to_string()));
    }
    Ok(())
}

pub fn set_remote_url(dir: &Path, url: &str) -> Result<()> {
    run(git(dir).args(["config", "remote.origin.url", url])).map(|_| ())
}

pub fn fetch(dir: &Path) -> Result<()> {
    run(git(dir).arg("fetch")).map(|_| ())
}

pub fn reset_hard(dir: &Path, rev: &str) -> Result<()> {
    run(git(dir).args(["reset", "--hard", rev])).map(|_| ())
}

pub fn checkout(dir: &Path, branch: &str) -> Result<()> {
    run(git(dir).args(["checkout", branch])).map(|_| ())
}

/// `git checkout -b <branch> <start_point>`, for the first checkout of a
/// catalog branch that has no local ref yet.
pub fn checkout_new_tracking(dir: &Path, branch: &str, start_point: &str) -> Result<()> {
    run(git(dir).args(["checkout", "-b", branch, start_point])).map(|_| ())
}

pub fn merge_ff_only(dir: &Path, rev: &str) -> Result<()> {
    run(git(dir).args(["merge", "--ff-only", rev])).map(|_| ())
}

pub fn rev_parse(dir: &Path, rev: &str) -> Result<String> {
    run(git(dir).args(["rev-parse", rev]))
}

pub fn rev_parse_abbrev_ref(dir: &Path, rev: &str) -> Result<String> {
    run(git(dir).args(["rev-parse", "--abbrev-ref", rev]))
}

/// Uncommitted, tracked changes (ignores untracked files, matching
/// `git status --porcelain --untracked-files=no`, §4.D step 2).
pub fn dirty_status(dir: &Path) -> Result<String> {
    run(git(dir).args(["status", "--porcelain", "--untracked-files=no"]))
}

/// Branches (local preferred, else `remotes/<remote>/...`) containing `sha`.
/// Returns the raw multi-line `git branch --contains --all` output.
pub fn branches_containing(dir: &Path, sha: &str) -> Result<String> {
    run(git(dir).args(["branch", "--contains", sha, "--all"]))
}

pub fn remote_names(dir: &Path) -> Result<Vec<String>> {
    let out = run(git(dir).arg("remote"))?;
    Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
}

/// `git ls-tree <rev>`, one line per entry: `<mode> <type> <sha>\t<path>`.
pub fn ls_tree(dir: &Path, rev: &str) -> Result<String> {
    run(git(dir).args(["ls-tree", rev]))
}

/// Parse `SkillEntry::_find_sha_branch`'s `git branch --contains --all`
/// output: take the first line, strip leading `* `/whitespace, drop any
/// `remotes/<remote>/` prefix (§4.D step 4).
pub fn first_branch_containing(dir: &Path, sha: &str) -> Result<Option<String>> {
    let raw = branches_containing(dir, sha)?;
    let Some(first) = raw.lines().next() else {
        return Ok(None);
    };
    let mut name = first.trim_start_matches('*').trim().replace("remotes/", "");
    if name.is_empty() {
        return Ok(None);
    }
    for remote in remote_names(dir)? {
        let prefix = format!("{remote}/");
        if let Some(stripped) = name.strip_prefix(prefix.as_str()) {
            name = stripped.to_string();
        }
    }
    if name.is_empty() {
        Ok(None)
    } else {
        Ok(Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-q"]).current_dir(dir).status().unwrap();
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .status()
            .unwrap();
        Command::new("git")
            .args(["config", "user.name", "Test"])
            .current_dir(dir)
            .status()
            .unwrap();
    }

    fn commit_all(dir: &Path, msg: &str) {
        Command::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
        Command::new("git").args(["commit", "-q", "-m", msg]).current_dir(dir).status().unwrap();
    }

    #[test]
    fn dirty_status_ignores_untracked() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        commit_all(tmp.path(), "init");
        assert_eq!(dirty_status(tmp.path()).unwrap(), "");

        fs::write(tmp.path().join("untracked.txt"), "x").unwrap();
        assert_eq!(dirty_status(tmp.path()).unwrap(), "");

        fs::write(tmp.path().join("a.txt"), "changed").unwrap();
        assert!(!dirty_status(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn rev_parse_resolves_head() {
        let tmp = TempDir::new().unwrap();
        init_repo(tmp.path());
        fs::write(tmp.path().join("a.txt"), "hi").unwrap();
        commit_all(tmp.path(), "init");
        let sha = rev_parse(tmp.path(), "HEAD").unwrap();
        assert_eq!(sha.len(), 40);
    }
}
