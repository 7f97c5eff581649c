//! Device manifest store (§3 "Device Manifest", §4.A).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Result, SpmError};

pub const CURRENT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Default,
    Cli,
    Voice,
    #[serde(rename = "non-msm")]
    NonMsm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Installation {
    Installed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifestEntry {
    pub name: String,
    pub origin: Origin,
    pub beta: bool,
    pub status: Status,
    pub installed: i64,
    pub updated: i64,
    pub installation: Installation,
    pub skill_gid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl SkillManifestEntry {
    pub fn new(name: &str, origin: Origin, beta: bool, skill_gid: &str) -> Self {
        SkillManifestEntry {
            name: name.to_string(),
            origin,
            beta,
            status: Status::Active,
            installed: 0,
            updated: 0,
            installation: Installation::Installed,
            skill_gid: skill_gid.to_string(),
            failure_message: None,
        }
    }

    pub fn mark_failed(&mut self, message: String) {
        self.status = Status::Error;
        self.installation = Installation::Failed;
        self.failure_message = Some(message);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceManifest {
    pub version: u32,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub skills: Vec<SkillManifestEntry>,
    /// Transient marker set by `migrate`; never serialized (§4.A).
    #[serde(skip)]
    pub upgraded: bool,
    /// Ad-hoc per-name top-level keys from a pre-`skills`-array v0 document,
    /// set by `value_to_manifest` and consumed by `migrate_v0_to_v1`; never
    /// serialized back (§4.A `migrate` v0 -> v1).
    #[serde(skip)]
    legacy_entries: BTreeMap<String, Value>,
}

impl Default for DeviceManifest {
    fn default() -> Self {
        DeviceManifest {
            version: 0,
            blacklist: Vec::new(),
            skills: Vec::new(),
            upgraded: false,
            legacy_entries: BTreeMap::new(),
        }
    }
}

impl DeviceManifest {
    pub fn entry_mut(&mut self, name: &str) -> Option<&mut SkillManifestEntry> {
        self.skills.iter_mut().find(|s| s.name == name)
    }

    pub fn entry(&self, name: &str) -> Option<&SkillManifestEntry> {
        self.skills.iter().find(|s| s.name == name)
    }

    pub fn remove_entry(&mut self, name: &str) {
        self.skills.retain(|s| s.name != name);
    }
}

/// Read the manifest, returning the empty document on a missing or corrupt
/// file (§4.A `load`).
pub fn load(path: &Path) -> DeviceManifest {
    let Ok(text) = fs::read_to_string(path) else {
        return DeviceManifest::default();
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => value_to_manifest(value),
        Err(_) => DeviceManifest::default(),
    }
}

/// Top-level keys a v1+ document owns; anything else on a v0 document is an
/// ad-hoc per-skill-name entry (§4.A `migrate` v0 -> v1).
const RESERVED_KEYS: &[&str] = &["version", "blacklist", "skills"];

/// Deserialize leniently so pre-migration documents (missing fields, ad-hoc
/// shapes handled by `migrate`) don't fail to parse outright.
fn value_to_manifest(value: Value) -> DeviceManifest {
    let version = value.get("version").and_then(Value::as_u64).unwrap_or(0) as u32;
    let blacklist = value
        .get("blacklist")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();
    let has_skills_array = value.get("skills").is_some();
    let skills = value
        .get("skills")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(|v| serde_json::from_value::<SkillManifestEntry>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    // A real v0 document (no `skills` array yet) stores one ad-hoc object
    // per skill name directly at the top level; capture those so
    // `migrate_v0_to_v1` can synthesize `skills` from them.
    let legacy_entries = if version == 0 && !has_skills_array {
        value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    } else {
        BTreeMap::new()
    };
    DeviceManifest {
        version,
        blacklist,
        skills,
        upgraded: false,
        legacy_entries,
    }
}

/// Deterministic hash of the document serialized with sorted keys (§4.A
/// `hash`): re-serialize through a `BTreeMap` so key order never perturbs it,
/// then hash with SHA-256.
pub fn hash(manifest: &DeviceManifest) -> String {
    let value = serde_json::json!({
        "version": manifest.version,
        "blacklist": manifest.blacklist,
        "skills": manifest.skills,
    });
    let sorted: BTreeMap<String, Value> = serde_json::from_value(value).unwrap_or_default();
    let canonical = serde_json::to_string(&sorted).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")
}

/// Atomic overwrite: write to a sibling temp file, then rename (§4.A
/// `write`).
pub fn write(path: &Path, manifest: &DeviceManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(SpmError::Io)?;
    }
    let body = serde_json::json!({
        "version": manifest.version,
        "blacklist": manifest.blacklist,
        "skills": manifest.skills,
    });
    let text = serde_json::to_string_pretty(&body)
        .map_err(|e| SpmError::Other(format!("failed to serialize manifest: {e}")))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(SpmError::Io)?;
    fs::rename(&tmp, path).map_err(SpmError::Io)?;
    Ok(())
}

/// Migrate a document to `CURRENT_VERSION`, in place (§4.A `migrate`).
pub fn migrate(mut manifest: DeviceManifest) -> DeviceManifest {
    if manifest.version == 0 {
        manifest = migrate_v0_to_v1(manifest);
        manifest.upgraded = true;
    }
    if manifest.version == 1 {
        manifest = migrate_v1_to_v2(manifest);
        manifest.upgraded = true;
    }
    manifest
}

/// Synthesize `skills` from the ad-hoc per-name top-level keys a v0 document
/// stored directly (§4.A `migrate` v0 -> v1): preserves each entry's prior
/// `origin`/`beta`/`installed`/`updated` fields, coercing a boolean
/// `installed` (the v0 shape used a plain flag rather than a timestamp) to
/// `0`.
fn migrate_v0_to_v1(mut manifest: DeviceManifest) -> DeviceManifest {
    for (name, raw) in std::mem::take(&mut manifest.legacy_entries) {
        manifest.skills.push(legacy_entry_to_entry(&name, &raw));
    }
    manifest.version = 1;
    manifest
}

fn legacy_entry_to_entry(name: &str, raw: &Value) -> SkillManifestEntry {
    let origin = raw
        .get("origin")
        .cloned()
        .and_then(|v| serde_json::from_value::<Origin>(v).ok())
        .unwrap_or(Origin::NonMsm);
    let beta = raw.get("beta").and_then(Value::as_bool).unwrap_or(false);
    let status = raw
        .get("status")
        .cloned()
        .and_then(|v| serde_json::from_value::<Status>(v).ok())
        .unwrap_or(Status::Active);
    let installation = raw
        .get("installation")
        .cloned()
        .and_then(|v| serde_json::from_value::<Installation>(v).ok())
        .unwrap_or(Installation::Installed);
    let skill_gid = raw
        .get("skill_gid")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let failure_message = raw
        .get("failure_message")
        .and_then(Value::as_str)
        .map(|s| s.to_string());
    SkillManifestEntry {
        name: name.to_string(),
        origin,
        beta,
        status,
        installed: coerce_timestamp(raw.get("installed")),
        updated: coerce_timestamp(raw.get("updated")),
        installation,
        skill_gid,
        failure_message,
    }
}

/// v0's `installed`/`updated` fields were sometimes a plain boolean flag
/// rather than a unix timestamp; coerce that case to `0` (unknown), and pass
/// a genuine number through (§4.A "coerces boolean `installed` to `0`").
fn coerce_timestamp(v: Option<&Value>) -> i64 {
    match v {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

fn migrate_v1_to_v2(mut manifest: DeviceManifest) -> DeviceManifest {
    // `skill_gid` defaults to empty string already; the caller
    // (`Manager::list`'s curation pass) fills it in from the matching local
    // descriptor, since this pure function doesn't have the scan results.
    manifest.version = 2;
    manifest
}
