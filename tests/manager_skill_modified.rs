#[path = "support/mod.rs"]
mod support;

use std::fs;
use std::path::Path;

use spm::config::Config;
use spm::lifecycle::{self, SkillInstaller};
use spm::{Manager, SkillDescriptor, SpmError};

use support::{git, CatalogFixture};

struct NoopInstaller;

impl SkillInstaller for NoopInstaller {
    fn install_by_name(&self, _name: &str) -> spm::Result<()> {
        Ok(())
    }
}

fn init_source_repo(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    git(&["init", "-q", "-b", "main"], dir);
    git(&["config", "user.email", "t@example.com"], dir);
    git(&["config", "user.name", "T"], dir);
    fs::write(dir.join("__init__.py"), "# skill entry\n").unwrap();
    git(&["add", "-A"], dir);
    git(&["commit", "-q", "-m", "init"], dir);
}

/// Exercises `Manager::update` directly (rather than through `sk update`,
/// which only reports an aggregate count across every local skill) to check
/// the single-skill `SkillModified` path and its manifest side effect (§4.D
/// `update` step 2, §4.F `update`).
#[test]
fn update_with_local_edits_reports_skill_modified_and_marks_the_manifest() {
    let fx = CatalogFixture::build(vec![]);
    let src = fx.root.path().join("source");
    init_source_repo(&src);

    let dest = fx.skills_dir.join("demo.source");
    let mut descriptor = SkillDescriptor::new("demo", &dest, &format!("file://{}", src.display()), "");
    lifecycle::install(&mut descriptor, &Config::default(), &NoopInstaller).unwrap();
    assert!(dest.join("__init__.py").is_file());

    let mut cfg = Config::default();
    cfg.skills_dir = fx.skills_dir.clone();
    cfg.repo_url = fx.catalog_path.to_string_lossy().to_string();
    cfg.repo_branch = "main".to_string();
    cfg.repo_cache = fx.root.path().join("repo-cache");

    let manager = Manager::new(cfg, fx.state_dir.join("skills.json"), fx.state_dir.join("lock")).unwrap();

    let unchanged = manager.update("demo", None).unwrap();
    assert!(!unchanged, "fresh clone should report nothing to update");

    fs::write(dest.join("__init__.py"), "# locally edited\n").unwrap();
    let err = manager.update("demo", None).unwrap_err();
    assert!(matches!(err, SpmError::SkillModified(_)), "{err:?}");

    // The skill stays on disk and locally-installed; only its manifest
    // status reflects the failure (§4.D "on any failure ... leave partial
    // state in place").
    assert!(dest.join("__init__.py").is_file());
    let locals = manager.local_skills().unwrap();
    assert!(locals.iter().any(|d| d.name == "demo" && d.is_local));
}
