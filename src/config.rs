//! Process configuration, threaded through `Manager::new` rather than read
//! from a global singleton (§9 Design Notes).

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};

use crate::paths;

/// Platform tags with a distinct default-skill group (§3 Glossary). `Default`
/// always falls back to the `default` group (§4.F `default_skills_for_platform`).
pub const SKILL_GROUPS: &[&str] = &["default", "mark_1", "picroft", "kde"];

pub const DEFAULT_REPO_URL: &str = "https://github.com/MycroftAI/mycroft-skills";
pub const DEFAULT_REPO_BRANCH: &str = "20231027";
pub const DEFAULT_SKILLS_SUBDIR: &str = "skills";
pub const DEFAULT_CATALOG_SUBDIR: &str = ".skills-repo";
pub const ENTRY_POINT_FILE: &str = "__init__.py";

/// Noise tokens stripped before fuzzy-matching a skill name (§4.C, GLOSSARY).
pub const NOISE_TOKENS: &[&str] = &["skill", "fallback", "mycroft"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub platform: String,
    pub skills_dir: PathBuf,
    pub repo_url: String,
    pub repo_branch: String,
    pub repo_cache: PathBuf,
    /// When `false`, skills install at the branch tip instead of their
    /// catalog-pinned commit (`--latest`, §6).
    pub versioned: bool,
    /// Branches update() is allowed to switch away from (§4.D step 4, §9 (b)).
    pub switchable_branches: BTreeSet<String>,
    /// Optional `pip -c <constraints>` file (§4.D step 6).
    pub pip_constraints: Option<PathBuf>,
    /// Worker-pool size for batch operations (§4.F, §5).
    pub worker_pool_size: usize,
    /// TTL in seconds for the `all_skills` cache (§4.F).
    pub cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let skills_dir = paths::default_skills_dir();
        let repo_cache = skills_dir.join(DEFAULT_CATALOG_SUBDIR);
        Config {
            platform: "default".to_string(),
            skills_dir,
            repo_url: DEFAULT_REPO_URL.to_string(),
            repo_branch: DEFAULT_REPO_BRANCH.to_string(),
            repo_cache,
            versioned: true,
            switchable_branches: ["master".to_string()].into_iter().collect(),
            pip_constraints: None,
            worker_pool_size: 20,
            cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl Config {
    pub fn is_known_platform(&self) -> bool {
        SKILL_GROUPS.contains(&self.platform.as_str())
    }

    fn config_dir() -> AnyResult<PathBuf> {
        if let Ok(override_dir) = std::env::var("SPM_CONFIG_DIR") {
            return Ok(PathBuf::from(override_dir));
        }
        let pd = directories::ProjectDirs::from("", "", "sk")
            .context("unable to determine config dir")?;
        Ok(pd.config_dir().to_path_buf())
    }

    fn config_path() -> AnyResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Persisted CLI defaults, read before the current invocation's flags are
    /// applied over them. Falls back to built-in defaults with no config file
    /// on disk yet (CLI-boundary concern, not part of the core's error
    /// taxonomy).
    pub fn load_or_default() -> AnyResult<Config> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_slice(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Write this config as the persisted default, but only the first time —
    /// an invocation's `--flags` never overwrite a config file that already
    /// exists.
    pub fn save_if_missing(&self) -> AnyResult<()> {
        let path = Self::config_path()?;
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let pretty = serde_json::to_string_pretty(self)?;
        fs::write(&path, pretty).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
