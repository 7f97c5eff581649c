//! Catalog: a local clone of the skill-index git repository (§3 "Catalog
//! Entry", §4.B, §6 "Catalog wire format").

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::warn;

use crate::error::{Result, SpmError};
use crate::git;

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub rel_path: String,
    pub url: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone)]
pub struct DefaultSkillGroup {
    pub platform_tag: String,
    pub skill_names: Vec<String>,
}

pub struct Catalog {
    pub path: PathBuf,
    pub url: String,
    pub branch: String,
}

impl Catalog {
    pub fn new(path: PathBuf, url: String, branch: String) -> Self {
        Catalog { path, url, branch }
    }

    /// Clone/fetch/reset the catalog onto `origin/<branch>` (§4.B `update`).
    pub fn update(&self) -> Result<()> {
        match self.try_update(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if self.path.exists() => {
                // Retry once into a scratch path; never recurse, never
                // touch the existing clone unless the retry succeeds.
                warn!("catalog update failed, retrying into scratch dir: {err}");
                let tmp = tempfile::tempdir().map_err(SpmError::Io)?;
                let scratch = tmp.path().join("catalog");
                match self.try_update(&scratch) {
                    Ok(()) => {
                        if self.path.exists() {
                            fs::remove_dir_all(&self.path).map_err(SpmError::Io)?;
                        }
                        copy_dir(&scratch, &self.path).map_err(SpmError::Io)?;
                        Ok(())
                    }
                    Err(_) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn try_update(&self, at: &Path) -> Result<()> {
        if !at.exists() {
            if let Some(parent) = at.parent() {
                fs::create_dir_all(parent).map_err(SpmError::Io)?;
            }
            git::clone(&self.url, at)?;
        }
        git::set_remote_url(at, &self.url)?;
        git::fetch(at)?;
        let remote_ref = format!("origin/{}", self.branch);
        if git::checkout(at, &self.branch).is_err() {
            git::checkout_new_tracking(at, &self.branch, &remote_ref)
                .map_err(|_| SpmError::InvalidBranch(self.branch.clone()))?;
        }
        git::reset_hard(at, &remote_ref)
            .map_err(|_| SpmError::InvalidBranch(self.branch.clone()))?;
        Ok(())
    }

    /// Parse `.gitmodules` plus the branch tree's commit pins (§4.B
    /// `skill_data`).
    pub fn skill_data(&self) -> Result<Vec<CatalogEntry>> {
        let pins = self.commit_pins()?;
        let gitmodules_path = self.path.join(".gitmodules");
        let text = fs::read_to_string(&gitmodules_path).unwrap_or_default();
        let mut out = Vec::new();
        for module in text.split("[submodule \"").skip(1) {
            match parse_submodule_block(module) {
                Some((name, rel_path, url)) => {
                    let commit_sha = pins.get(&rel_path).cloned().unwrap_or_default();
                    out.push(CatalogEntry {
                        name,
                        rel_path,
                        url,
                        commit_sha,
                    });
                }
                None => warn!("skipping malformed .gitmodules record"),
            }
        }
        Ok(out)
    }

    fn commit_pins(&self) -> Result<std::collections::HashMap<String, String>> {
        let remote_ref = format!("origin/{}", self.branch);
        let raw = git::ls_tree(&self.path, &remote_ref)?;
        let mut out = std::collections::HashMap::new();
        for line in raw.lines() {
            let Some((meta, path)) = line.split_once('\t') else {
                continue;
            };
            let mut fields = meta.split_whitespace();
            let (Some(_mode), Some(kind), Some(sha)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if kind == "commit" {
                out.insert(path.to_string(), sha.to_string());
            }
        }
        Ok(out)
    }

    /// Parse every `DEFAULT-SKILLS[.<tag>]` file in the repo root (§4.B
    /// `default_skill_groups`).
    pub fn default_skill_groups(&self) -> Result<Vec<DefaultSkillGroup>> {
        let mut groups = Vec::new();
        let entries = fs::read_dir(&self.path).map_err(SpmError::Io)?;
        for entry in entries {
            let entry = entry.map_err(SpmError::Io)?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !file_name.starts_with("DEFAULT-SKILLS") {
                continue;
            }
            let tag = file_name.trim_start_matches("DEFAULT-SKILLS");
            let platform_tag = tag.trim_start_matches('.').to_string();
            let platform_tag = if platform_tag.is_empty() {
                "default".to_string()
            } else {
                platform_tag
            };
            let text = fs::read_to_string(entry.path()).map_err(SpmError::Io)?;
            let skill_names: Vec<String> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
            groups.push(DefaultSkillGroup {
                platform_tag,
                skill_names,
            });
        }
        Ok(groups)
    }
}

/// Extract a `path = ...` / `url = ...` value from a `[submodule "..."]`
/// block's body, ignoring indentation and any other keys present.
fn submodule_field(body: &str, key: &str) -> Option<String> {
    let pattern = format!(r"(?m)^\s*{key}\s*=\s*(\S+)\s*$");
    let re = Regex::new(&pattern).ok()?;
    re.captures(body).map(|c| c[1].trim().to_string())
}

fn parse_submodule_block(block: &str) -> Option<(String, String, String)> {
    let name = block.split("\"]").next()?.trim().to_string();
    let rest = block.split_once("\"]")?.1;
    let path = submodule_field(rest, "path")?;
    let url = submodule_field(rest, "url")?;
    if name.is_empty() || path.is_empty() || url.is_empty() {
        return None;
    }
    Some((name, path, url))
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from).unwrap();
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_submodule_block_extracts_fields() {
        let block = "skill-weather\"]\n\tpath = weather\n\turl = https://github.com/MycroftAI/skill-weather.git\n";
        let (name, path, url) = parse_submodule_block(block).unwrap();
        assert_eq!(name, "skill-weather");
        assert_eq!(path, "weather");
        assert_eq!(url, "https://github.com/MycroftAI/skill-weather.git");
    }

    #[test]
    fn parse_submodule_block_rejects_malformed() {
        assert!(parse_submodule_block("no closing bracket here").is_none());
    }

    #[test]
    fn default_skill_groups_parses_tags_and_strips_comments() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("DEFAULT-SKILLS"), "# comment\nskill-a\n\nskill-b\n").unwrap();
        fs::write(tmp.path().join("DEFAULT-SKILLS.picroft"), "skill-c\n").unwrap();
        let catalog = Catalog::new(tmp.path().to_path_buf(), String::new(), "x".to_string());
        let mut groups = catalog.default_skill_groups().unwrap();
        groups.sort_by(|a, b| a.platform_tag.cmp(&b.platform_tag));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].platform_tag, "default");
        assert_eq!(groups[0].skill_names, vec!["skill-a", "skill-b"]);
        assert_eq!(groups[1].platform_tag, "picroft");
        assert_eq!(groups[1].skill_names, vec!["skill-c"]);
    }
}
