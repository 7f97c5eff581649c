//! Orchestrates batch operations, caches, the cross-process lock, and
//! manifest write-back (§4.F). The Manager is the only thing outside
//! `lifecycle.rs` that touches the device manifest.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, warn};

use crate::catalog::Catalog;
use crate::config::{Config, ENTRY_POINT_FILE};
use crate::descriptor::SkillDescriptor;
use crate::error::Result;
use crate::lifecycle::{self, SkillInstaller};
use crate::manifest::{
    self, DeviceManifest, Installation, Origin, SkillManifestEntry, Status,
};
use crate::process_lock::ProcessLock;
use crate::resolver;
use crate::worker_pool;

thread_local! {
    /// Re-entrant write-back guard (§4.F, §9). Recursive skill-dependency
    /// installs run `Manager::install` again on the same thread; only the
    /// outermost call in the chain performs the manifest write.
    static SAVE_DEPTH: RefCell<u32> = const { RefCell::new(0) };
}

struct Cached<T> {
    value: T,
    at: Instant,
}

pub struct Manager {
    cfg: Config,
    catalog: Catalog,
    manifest_path: PathBuf,
    lock_path: PathBuf,
    manifest: Mutex<DeviceManifest>,
    last_hash: Mutex<String>,
    all_skills: Mutex<Option<Cached<Vec<SkillDescriptor>>>>,
}

/// RAII handle for the write-back guard: on drop, if this was the outermost
/// mutating call on this thread, flushes the manifest to disk (§4.F).
struct MutationGuard<'a> {
    manager: &'a Manager,
    is_outermost: bool,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        let now_empty = SAVE_DEPTH.with(|d| {
            let mut d = d.borrow_mut();
            *d = d.saturating_sub(1);
            *d == 0
        });
        if self.is_outermost && now_empty {
            self.manager.flush_manifest();
        }
    }
}

impl Manager {
    /// Construct a `Manager`, loading and migrating the device manifest and
    /// acquiring the cross-process lock for the duration of that migration
    /// (§4.F, §5).
    pub fn new(cfg: Config, manifest_path: PathBuf, lock_path: PathBuf) -> Result<Self> {
        let catalog = Catalog::new(cfg.repo_cache.clone(), cfg.repo_url.clone(), cfg.repo_branch.clone());

        let (manifest, hash) = {
            let _lock = ProcessLock::acquire(&lock_path)?;
            let loaded = manifest::load(&manifest_path);
            let mut migrated = manifest::migrate(loaded);
            let hash = manifest::hash(&migrated);
            if migrated.upgraded {
                manifest::write(&manifest_path, &migrated)?;
                // Migration's forced write is done; leaving this set would
                // force every later flush for the life of the process (§3
                // invariant 3).
                migrated.upgraded = false;
            }
            (migrated, hash)
        };

        Ok(Manager {
            cfg,
            catalog,
            manifest_path,
            lock_path,
            manifest: Mutex::new(manifest),
            last_hash: Mutex::new(hash),
            all_skills: Mutex::new(None),
        })
    }

    fn begin_mutation(&self) -> MutationGuard<'_> {
        let is_outermost = SAVE_DEPTH.with(|d| {
            let mut d = d.borrow_mut();
            let outer = *d == 0;
            *d += 1;
            outer
        });
        MutationGuard {
            manager: self,
            is_outermost,
        }
    }

    fn with_manifest<R>(&self, f: impl FnOnce(&mut DeviceManifest) -> R) -> R {
        let mut guard = self.manifest.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Write the manifest to disk under the cross-process lock, but only if
    /// its hash changed since the last write (§3 invariant 3, §4.A).
    fn flush_manifest(&self) {
        let snapshot = self.manifest.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let forced = snapshot.upgraded;
        let new_hash = manifest::hash(&snapshot);
        let mut last_hash = self.last_hash.lock().unwrap_or_else(|e| e.into_inner());
        if !forced && *last_hash == new_hash {
            return;
        }
        match ProcessLock::acquire(&self.lock_path) {
            Ok(_lock) => match manifest::write(&self.manifest_path, &snapshot) {
                Ok(()) => *last_hash = new_hash,
                Err(e) => error!("failed to write device manifest: {e}"),
            },
            Err(e) => error!("failed to acquire manifest lock for write-back: {e}"),
        }
    }

    fn invalidate_caches(&self) {
        *self.all_skills.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Catalog update, remote/local attach, and manifest curation (§4.F
    /// `list`, §4.H). Cached for `cache_ttl_secs`.
    pub fn list(&self) -> Result<Vec<SkillDescriptor>> {
        {
            let cache = self.all_skills.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref() {
                if cached.at.elapsed() < Duration::from_secs(self.cfg.cache_ttl_secs) {
                    return Ok(cached.value.clone());
                }
            }
        }

        if let Err(e) = self.catalog.update() {
            if self.catalog.path.exists() {
                warn!("catalog update failed, using existing clone: {e}");
            } else {
                return Err(e);
            }
        }

        let entries = self.catalog.skill_data().unwrap_or_else(|e| {
            warn!("failed to parse catalog skill data: {e}");
            Vec::new()
        });
        let remotes: Vec<SkillDescriptor> = entries
            .iter()
            .map(|entry| {
                let path = SkillDescriptor::create_path(&self.cfg.skills_dir, &entry.url, &entry.name);
                let pin = if self.cfg.versioned {
                    entry.commit_sha.as_str()
                } else {
                    ""
                };
                SkillDescriptor::new(&entry.name, &path, &entry.url, pin)
            })
            .collect();

        let scanned = scan_local_skills(&self.cfg.skills_dir);

        let mut matched_ids = std::collections::HashSet::new();
        let mut merged: Vec<SkillDescriptor> = scanned
            .into_iter()
            .map(|mut local| {
                if let Some(remote) = remotes.iter().find(|r| r.id == local.id) {
                    local.attach(remote);
                    matched_ids.insert(remote.id.clone());
                }
                local
            })
            .collect();
        for remote in &remotes {
            if !matched_ids.contains(&remote.id) {
                merged.push(remote.clone());
            }
        }

        let default_names = self.default_skill_names_for_platform().unwrap_or_default();
        self.with_manifest(|m| curate(m, &merged, &default_names));

        *self.all_skills.lock().unwrap_or_else(|e| e.into_inner()) = Some(Cached {
            value: merged.clone(),
            at: Instant::now(),
        });
        Ok(merged)
    }

    pub fn local_skills(&self) -> Result<Vec<SkillDescriptor>> {
        Ok(self.list()?.into_iter().filter(|d| d.is_local).collect())
    }

    pub fn skills_dir(&self) -> &Path {
        &self.cfg.skills_dir
    }

    fn default_skill_names_for_platform(&self) -> Result<Vec<String>> {
        let groups = self.catalog.default_skill_groups()?;
        let group = groups
            .iter()
            .find(|g| g.platform_tag == self.cfg.platform)
            .or_else(|| groups.iter().find(|g| g.platform_tag == "default"));
        Ok(group.map(|g| g.skill_names.clone()).unwrap_or_default())
    }

    /// The platform's default skill set, falling back to the `default`
    /// group if the platform tag is unknown (§4.F).
    pub fn default_skills_for_platform(&self) -> Result<Vec<SkillDescriptor>> {
        let all = self.list()?;
        let names = self.default_skill_names_for_platform()?;
        Ok(all.into_iter().filter(|d| names.contains(&d.name)).collect())
    }

    fn effective_config(&self, constraints: Option<&Path>) -> Config {
        let mut cfg = self.cfg.clone();
        if let Some(c) = constraints {
            cfg.pip_constraints = Some(c.to_path_buf());
        }
        cfg
    }

    /// Resolve `param` and install it (§4.F `install`).
    pub fn install(
        &self,
        param: &str,
        author: Option<&str>,
        constraints: Option<&Path>,
        origin: Origin,
    ) -> Result<SkillDescriptor> {
        let _guard = self.begin_mutation();
        let candidates = self.list()?;
        let mut descriptor = resolver::find(param, author, &candidates, &self.cfg.skills_dir)?;
        let cfg = self.effective_config(constraints);

        let mut entry = SkillManifestEntry::new(&descriptor.name, origin, descriptor.is_beta(), &descriptor.id);
        let result = lifecycle::install(&mut descriptor, &cfg, self);
        self.invalidate_caches();

        match result {
            Err(e) if e.is_already_installed() => Err(e),
            Ok(()) => {
                let now = now_ts();
                entry.installed = now;
                entry.updated = now;
                entry.skill_gid = descriptor.id.clone();
                self.with_manifest(|m| {
                    m.remove_entry(&descriptor.name);
                    m.skills.push(entry);
                });
                Ok(descriptor)
            }
            Err(e) => {
                entry.mark_failed(e.as_repr());
                self.with_manifest(|m| {
                    m.remove_entry(&descriptor.name);
                    m.skills.push(entry);
                });
                Err(e)
            }
        }
    }

    /// Resolve `param` and remove it (§4.F `remove`).
    pub fn remove(&self, param: &str, author: Option<&str>) -> Result<()> {
        let _guard = self.begin_mutation();
        let candidates = self.list()?;
        let mut descriptor = resolver::find(param, author, &candidates, &self.cfg.skills_dir)?;
        let result = lifecycle::remove(&mut descriptor);
        if result.is_ok() {
            self.with_manifest(|m| m.remove_entry(&descriptor.name));
        }
        self.invalidate_caches();
        result
    }

    /// Update one local skill, resolved by name/author (§4.F `update`).
    pub fn update(&self, skill: &str, author: Option<&str>) -> Result<bool> {
        let _guard = self.begin_mutation();
        let candidates = self.list()?;
        let descriptor = resolver::find(skill, author, &candidates, &self.cfg.skills_dir)?;
        self.update_descriptor(descriptor)
    }

    fn update_descriptor(&self, mut descriptor: SkillDescriptor) -> Result<bool> {
        let result = lifecycle::update(&mut descriptor, &self.cfg);
        match &result {
            Ok(changed) => {
                self.with_manifest(|m| {
                    if let Some(entry) = m.entry_mut(&descriptor.name) {
                        entry.status = Status::Active;
                        entry.installation = Installation::Installed;
                        entry.failure_message = None;
                        if *changed {
                            entry.updated = now_ts();
                        }
                    }
                });
            }
            Err(e) => {
                self.with_manifest(|m| {
                    if let Some(entry) = m.entry_mut(&descriptor.name) {
                        entry.mark_failed(e.as_repr());
                    }
                });
            }
        }
        self.invalidate_caches();
        result
    }

    /// Update every local skill under a bounded worker pool (§4.F
    /// `update_all`, §5). Per-skill failures are logged and do not abort the
    /// batch.
    pub fn update_all(&self) -> Result<Vec<bool>> {
        let _guard = self.begin_mutation();
        let locals = self.local_skills()?;
        Ok(self.apply(locals))
    }

    /// Install the platform's missing default skills, then update every
    /// local skill (§4.F `install_defaults`, §6 `default` command).
    pub fn install_defaults(&self) -> Result<Vec<bool>> {
        let _guard = self.begin_mutation();
        let defaults = self.default_skills_for_platform()?;
        let mut results = Vec::new();
        for d in defaults {
            if d.is_local {
                continue;
            }
            match self.install(&d.name, None, None, Origin::Default) {
                Ok(_) => results.push(true),
                Err(e) if e.is_already_installed() => results.push(true),
                Err(e) => {
                    error!("failed to install default skill {}: {e}", d.name);
                    results.push(false);
                }
            }
        }
        results.extend(self.update_all()?);
        Ok(results)
    }

    fn apply(&self, items: Vec<SkillDescriptor>) -> Vec<bool> {
        let workers = self.cfg.worker_pool_size;
        worker_pool::run(items, workers, |descriptor| {
            let name = descriptor.name.clone();
            match self.update_descriptor(descriptor) {
                Ok(changed) => changed,
                Err(e) => {
                    error!("update failed for {name}: {e}");
                    false
                }
            }
        })
    }
}

impl SkillInstaller for Manager {
    /// Recursive skill-dependency install (§4.D step 1, §9 "Cyclic
    /// references"): `AlreadyInstalled` is swallowed by the caller
    /// (`lifecycle::run_skill_requirements`), not here.
    fn install_by_name(&self, name: &str) -> Result<()> {
        self.install(name, None, None, Origin::Cli).map(|_| ())
    }
}

fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Scan `skills_dir/*/<entry-point>` for local skill folders (§4.F `list`).
fn scan_local_skills(skills_dir: &Path) -> Vec<SkillDescriptor> {
    let Ok(entries) = fs::read_dir(skills_dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if !path.join(ENTRY_POINT_FILE).is_file() {
            continue;
        }
        out.push(SkillDescriptor::from_folder(&path, ""));
    }
    out
}

/// Reconcile the manifest against the scanned filesystem (§3 invariants 1-2,
/// §4.H): drop entries claiming `installed` with no matching directory, add
/// entries for on-disk directories the manifest doesn't know about yet.
fn curate(manifest: &mut DeviceManifest, scanned: &[SkillDescriptor], default_names: &[String]) {
    let local_names: std::collections::HashSet<&str> = scanned
        .iter()
        .filter(|d| d.is_local)
        .map(|d| d.name.as_str())
        .collect();

    manifest.skills.retain(|entry| {
        entry.installation != Installation::Installed || local_names.contains(entry.name.as_str())
    });

    // Backfill `skill_gid` left empty by the v1->v2 migration (§4.A) now
    // that the scan results the pure migration function can't see are
    // available.
    for entry in manifest.skills.iter_mut() {
        if entry.skill_gid.is_empty() {
            if let Some(d) = scanned.iter().find(|d| d.name == entry.name) {
                entry.skill_gid = d.id.clone();
            }
        }
    }

    let known_names: std::collections::HashSet<String> =
        manifest.skills.iter().map(|e| e.name.clone()).collect();

    for d in scanned.iter().filter(|d| d.is_local) {
        if known_names.contains(&d.name) {
            continue;
        }
        let origin = if default_names.contains(&d.name) {
            Origin::Default
        } else if !d.url.is_empty() {
            Origin::Cli
        } else {
            Origin::NonMsm
        };
        let mut entry = SkillManifestEntry::new(&d.name, origin, d.is_beta(), &d.id);
        entry.installed = now_ts();
        entry.updated = entry.installed;
        manifest.skills.push(entry);
    }
}
