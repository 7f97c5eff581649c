#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command as AssertCommand;
use tempfile::TempDir;

pub fn git(args: &[&str], cwd: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed in {}", args, cwd.display());
}

fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(&["init", "-q", "-b", "main"], dir);
    git(&["config", "user.email", "t@example.com"], dir);
    git(&["config", "user.name", "T"], dir);
    git(&["config", "commit.gpgsign", "false"], dir);
}

fn rev_parse_head(dir: &Path) -> String {
    let out = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git rev-parse failed in {}", dir.display());
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

/// A description of one skill backing a `CatalogFixture`: its catalog/
/// submodule name, and which `DEFAULT-SKILLS[.tag]` files should list it.
pub struct SkillSeed {
    pub name: &'static str,
    pub default: bool,
    pub picroft_default: bool,
}

pub fn skill(name: &'static str) -> SkillSeed {
    SkillSeed { name, default: false, picroft_default: false }
}

impl SkillSeed {
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn as_picroft_default(mut self) -> Self {
        self.picroft_default = true;
        self
    }
}

/// A catalog repository plus its backing per-skill repositories, laid out
/// the way a real submodule-based skill catalog looks: one `.gitmodules`
/// record and one commit-pinned gitlink per skill, plus `DEFAULT-SKILLS[.tag]`
/// files. The gitlinks are registered directly via `update-index
/// --cacheinfo` rather than `git submodule add` — the core only ever reads
/// `.gitmodules` text and `ls-tree` pins (§4.B), never checks out submodule
/// working trees, so no actual submodule clone is needed to exercise it.
pub struct CatalogFixture {
    pub root: TempDir,
    pub catalog_path: PathBuf,
    pub state_dir: PathBuf,
    pub skills_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl CatalogFixture {
    pub fn build(skills: Vec<SkillSeed>) -> Self {
        let root = TempDir::new().unwrap();
        let remotes_dir = root.path().join("remotes");

        let mut gitmodules = String::new();
        let mut default_names = Vec::new();
        let mut picroft_names = Vec::new();
        let mut pins: Vec<(String, String)> = Vec::new();

        for seed in &skills {
            let skill_dir = remotes_dir.join(seed.name);
            init_repo(&skill_dir);
            fs::write(skill_dir.join("__init__.py"), "# skill entry\n").unwrap();
            git(&["add", "-A"], &skill_dir);
            git(&["commit", "-q", "-m", "init"], &skill_dir);
            let sha = rev_parse_head(&skill_dir);

            gitmodules.push_str(&format!(
                "[submodule \"{}\"]\n\tpath = {}\n\turl = {}\n",
                seed.name,
                seed.name,
                skill_dir.display()
            ));
            pins.push((seed.name.to_string(), sha));
            if seed.default {
                default_names.push(seed.name.to_string());
            }
            if seed.picroft_default {
                picroft_names.push(seed.name.to_string());
            }
        }

        let catalog_path = root.path().join("catalog");
        init_repo(&catalog_path);
        fs::write(catalog_path.join(".gitmodules"), &gitmodules).unwrap();
        fs::write(catalog_path.join("DEFAULT-SKILLS"), format!("{}\n", default_names.join("\n"))).unwrap();
        fs::write(
            catalog_path.join("DEFAULT-SKILLS.picroft"),
            format!("{}\n", picroft_names.join("\n")),
        )
        .unwrap();
        for (name, sha) in &pins {
            git(
                &["update-index", "--add", "--cacheinfo", &format!("160000,{sha},{name}")],
                &catalog_path,
            );
        }
        git(&["add", ".gitmodules", "DEFAULT-SKILLS", "DEFAULT-SKILLS.picroft"], &catalog_path);
        git(&["commit", "-q", "-m", "catalog"], &catalog_path);

        let state_dir = root.path().join("state");
        let skills_dir = root.path().join("skills");
        let config_dir = root.path().join("config");
        fs::create_dir_all(&skills_dir).unwrap();

        CatalogFixture {
            root,
            catalog_path,
            state_dir,
            skills_dir,
            config_dir,
        }
    }

    /// A `sk` invocation pre-wired with isolated state/skills/config dirs and
    /// this fixture's catalog as `--repo-url`/`--repo-branch main`.
    pub fn sk(&self) -> AssertCommand {
        let mut cmd = cargo_bin_cmd!("sk");
        cmd.env("SPM_STATE_DIR", &self.state_dir)
            .env("SPM_SKILLS_DIR", &self.skills_dir)
            .env("SPM_CONFIG_DIR", &self.config_dir)
            .args(["--repo-url", self.catalog_path.to_str().unwrap(), "--repo-branch", "main"]);
        cmd
    }

    pub fn installed_dir(&self, name: &str) -> PathBuf {
        self.skills_dir.join(format!("{name}.remotes"))
    }
}
