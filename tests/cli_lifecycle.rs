#[path = "support/mod.rs"]
mod support;

use support::{skill, CatalogFixture};

#[test]
fn list_shows_every_catalog_entry_before_any_install() {
    let fx = CatalogFixture::build(vec![
        skill("skill-a"),
        skill("skill-b").as_default(),
        skill("skill-cd"),
        skill("skill-ce"),
    ]);

    let out = fx.sk().args(["list"]).output().unwrap();
    assert!(out.status.success(), "{out:?}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["skill-a", "skill-b", "skill-cd", "skill-ce"] {
        assert!(stdout.contains(name), "missing {name} in:\n{stdout}");
    }

    for name in ["skill-a", "skill-b", "skill-cd", "skill-ce"] {
        assert!(!fx.installed_dir(name).exists());
    }
}

#[test]
fn install_then_remove_then_remove_again_is_idempotent() {
    let fx = CatalogFixture::build(vec![skill("skill-a"), skill("skill-b")]);

    let install = fx.sk().args(["install", "skill-a"]).output().unwrap();
    assert!(install.status.success(), "{install:?}");
    assert!(fx.installed_dir("skill-a").join("__init__.py").is_file());

    let remove = fx.sk().args(["remove", "skill-a"]).output().unwrap();
    assert!(remove.status.success(), "{remove:?}");
    assert!(!fx.installed_dir("skill-a").exists());

    let remove_again = fx.sk().args(["remove", "skill-a"]).output().unwrap();
    assert!(
        !remove_again.status.success(),
        "second remove unexpectedly succeeded: {remove_again:?}"
    );
    let stderr = String::from_utf8_lossy(&remove_again.stderr);
    assert!(stderr.contains("already removed"), "stderr: {stderr}");
}

#[test]
fn installing_twice_raises_already_installed() {
    let fx = CatalogFixture::build(vec![skill("skill-a")]);

    let first = fx.sk().args(["install", "skill-a"]).output().unwrap();
    assert!(first.status.success(), "{first:?}");

    let second = fx.sk().args(["install", "skill-a"]).output().unwrap();
    assert!(!second.status.success());
    let stderr = String::from_utf8_lossy(&second.stderr);
    assert!(stderr.contains("already installed"), "stderr: {stderr}");
}

#[test]
fn default_command_installs_the_platform_group_and_updates_locals() {
    let fx = CatalogFixture::build(vec![
        skill("skill-a"),
        skill("skill-b").as_default(),
        skill("skill-cd").as_picroft_default(),
    ]);

    let out = fx.sk().args(["--platform", "picroft", "default"]).output().unwrap();
    assert!(out.status.success(), "{out:?}");
    assert!(fx.installed_dir("skill-cd").join("__init__.py").is_file());
    assert!(!fx.installed_dir("skill-b").exists(), "wrong platform group installed");
    assert!(!fx.installed_dir("skill-a").exists());
}

#[test]
fn update_with_no_local_skills_is_a_no_op() {
    let fx = CatalogFixture::build(vec![skill("skill-a")]);
    let out = fx.sk().args(["update"]).output().unwrap();
    // No local skills ever changed, so the CLI reports "no change" (§6 exit codes).
    assert_eq!(out.status.code(), Some(1), "{out:?}");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("updated 0/0"), "stdout: {stdout}");
}
