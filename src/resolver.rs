//! Map a user token (URL or fuzzy name, optional author) to exactly one
//! descriptor (§4.E).

use std::path::Path;

use crate::descriptor::SkillDescriptor;
use crate::error::{Result, SpmError};

/// Minimum score for a fuzzy match to be considered at all (§4.E step 2).
const MIN_SCORE: f64 = 0.3;

/// `find(query, author?, candidates) -> descriptor` (§4.E).
///
/// A `http(s)://` query is resolved by `id` against `candidates`, falling
/// back to a synthesized, unattached descriptor rooted at `skills_dir`.
/// Anything else is scored with `SkillDescriptor::match_score`.
pub fn find(
    query: &str,
    author: Option<&str>,
    candidates: &[SkillDescriptor],
    skills_dir: &Path,
) -> Result<SkillDescriptor> {
    if query.starts_with("http://") || query.starts_with("https://") {
        return Ok(find_by_url(query, candidates, skills_dir));
    }
    find_by_name(query, author, candidates)
}

fn find_by_url(url: &str, candidates: &[SkillDescriptor], skills_dir: &Path) -> SkillDescriptor {
    let id = SkillDescriptor::extract_repo_id(url);
    if let Some(found) = candidates.iter().find(|c| c.id == id) {
        return found.clone();
    }
    let name = SkillDescriptor::extract_repo_name(url);
    let path = SkillDescriptor::create_path(skills_dir, url, &name);
    SkillDescriptor::new(&name, &path, url, "")
}

fn find_by_name(
    query: &str,
    author: Option<&str>,
    candidates: &[SkillDescriptor],
) -> Result<SkillDescriptor> {
    if candidates.is_empty() {
        return Err(SpmError::SkillNotFound(query.to_string()));
    }

    let mut scored: Vec<(f64, &SkillDescriptor)> = candidates
        .iter()
        .map(|c| (c.match_score(query, author), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let (score, best) = scored[0];
    if score < MIN_SCORE {
        return Err(SpmError::SkillNotFound(query.to_string()));
    }

    let low = if score < 1.0 { score * 0.7 } else { 1.0 };
    let others: Vec<SkillDescriptor> = scored[1..]
        .iter()
        .filter(|(s, _)| *s >= low)
        .map(|(_, d)| (*d).clone())
        .collect();

    if others.is_empty() {
        Ok(best.clone())
    } else {
        let mut all = vec![best.clone()];
        all.extend(others);
        Err(SpmError::MultipleSkillMatches(all))
    }
}

/// Every candidate whose score against `query`/`author` is at least
/// `MIN_SCORE`, sorted best-first (§6 `search`).
pub fn search<'a>(
    query: &str,
    author: Option<&str>,
    candidates: &'a [SkillDescriptor],
) -> Vec<&'a SkillDescriptor> {
    let mut scored: Vec<(f64, &SkillDescriptor)> = candidates
        .iter()
        .map(|c| (c.match_score(query, author), c))
        .filter(|(s, _)| *s >= MIN_SCORE)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, d)| d).collect()
}
