//! `SkillDescriptor`: identity of one skill, local and/or remote (§3, §4.C).
//!
//! Deliberately one type with an `is_local` flag rather than a local/remote
//! type hierarchy — `attach` depends on being able to merge either kind into
//! the other (§9 Design Notes).

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub author: String,
    pub id: String,
    pub url: String,
    pub pinned_commit: String,
    pub local_path: PathBuf,
    pub is_local: bool,
}

impl SkillDescriptor {
    pub fn new(name: &str, path: &Path, url: &str, pinned_commit: &str) -> Self {
        let url = url.trim_end_matches('/').to_string();
        let author = if url.is_empty() {
            String::new()
        } else {
            Self::extract_author(&url)
        };
        let id = if url.is_empty() {
            name.to_string()
        } else {
            Self::extract_repo_id(&url)
        };
        SkillDescriptor {
            name: name.to_string(),
            author,
            id,
            url,
            pinned_commit: pinned_commit.to_string(),
            is_local: path.exists(),
            local_path: path.to_path_buf(),
        }
    }

    pub fn from_folder(path: &Path, url: &str) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Self::new(&name, path, url, "")
    }

    /// Path a fresh install of `url`/`name` would land at under `skills_dir`
    /// (§4.C "Path derivation").
    pub fn create_path(skills_dir: &Path, url: &str, name: &str) -> PathBuf {
        let repo_name = Self::extract_repo_name(url);
        let author = Self::extract_author(url);
        let base = if name.is_empty() { repo_name.as_str() } else { name };
        skills_dir.join(format!("{}.{}", base.to_lowercase(), author.to_lowercase()))
    }

    pub fn extract_repo_name(url: &str) -> String {
        let trimmed = url.trim_end_matches('/');
        let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
        last.strip_suffix(".git").unwrap_or(last).to_string()
    }

    fn extract_author(url: &str) -> String {
        let trimmed = url.trim_end_matches('/');
        let segs: Vec<&str> = trimmed.split('/').collect();
        let seg = if segs.len() >= 2 {
            segs[segs.len() - 2]
        } else {
            ""
        };
        seg.rsplit(':').next().unwrap_or(seg).to_lowercase()
    }

    pub fn extract_repo_id(url: &str) -> String {
        format!(
            "{}:{}",
            Self::extract_author(url),
            Self::extract_repo_name(url).to_lowercase()
        )
    }

    pub fn is_beta(&self) -> bool {
        self.pinned_commit.is_empty() || self.pinned_commit == "HEAD"
    }

    /// Merge a remote-derived descriptor into a locally-scanned one: copies
    /// name/url/pinned_commit/author, never touches `local_path`/`is_local`
    /// (§4.C).
    pub fn attach(&mut self, remote: &SkillDescriptor) {
        self.name = remote.name.clone();
        self.url = remote.url.clone();
        self.pinned_commit = remote.pinned_commit.clone();
        self.author = remote.author.clone();
    }

    /// Similarity of `query` (optionally scoped to `author`) against this
    /// skill, in `[0, 1]` (§4.C "Similarity scoring").
    pub fn match_score(&self, query: &str, author: Option<&str>) -> f64 {
        let (search, search_tokens, search_common) = extract_tokens(query, NOISE_TOKENS);
        let (_name, name_tokens, name_common) = extract_tokens(&self.name, NOISE_TOKENS);
        let name_clean = name_tokens.join(" ");

        let mut weights: Vec<(f64, f64)> = vec![
            (9.0, char_ratio(&name_clean, &search)),
            (9.0, token_ratio(&name_tokens, &search_tokens)),
            (2.0, token_ratio(&name_common, &search_common)),
        ];

        let author_multiplier = if let Some(author) = author {
            let author_ratio = char_ratio(&self.author, author);
            weights.push((5.0, author_ratio));
            author_ratio
        } else {
            1.0
        };

        let weight_sum: f64 = weights.iter().map(|(w, _)| w).sum();
        let weighted_mean: f64 = weights.iter().map(|(w, v)| w * v).sum::<f64>() / weight_sum;
        author_multiplier * weighted_mean
    }
}

const NOISE_TOKENS: &[&str] = crate::config::NOISE_TOKENS;

/// Lowercase, replace `-` with space, strip occurrences of each noise token
/// (by substring, matching the original's `str.count`/`str.replace`),
/// re-collapse whitespace, and split into words (§4.C step 1).
fn extract_tokens(s: &str, tokens: &[&str]) -> (String, Vec<String>, Vec<String>) {
    let mut s = s.to_lowercase().replace('-', " ");
    let mut extracted = Vec::new();
    for token in tokens {
        let count = s.matches(token).count();
        for _ in 0..count {
            extracted.push((*token).to_string());
        }
        s = s.replace(token, "");
    }
    let words: Vec<String> = s.split(' ').filter(|w| !w.is_empty()).map(|w| w.to_string()).collect();
    (words.join(" "), words, extracted)
}

/// Ratcliff/Obershelp ratio over characters, equivalent to Python's
/// `difflib.SequenceMatcher(a, b).ratio()` for short (non-"junk") inputs.
fn char_ratio(a: &str, b: &str) -> f64 {
    let av: Vec<char> = a.chars().collect();
    let bv: Vec<char> = b.chars().collect();
    sequence_ratio(&av, &bv)
}

fn token_ratio(a: &[String], b: &[String]) -> f64 {
    sequence_ratio(a, b)
}

fn sequence_ratio<T: Eq + Hash + Clone>(a: &[T], b: &[T]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_total(a, b) as f64 / total as f64
}

fn matching_total<T: Eq + Hash + Clone>(a: &[T], b: &[T]) -> usize {
    let mut total = 0usize;
    let mut stack = vec![(0usize, a.len(), 0usize, b.len())];
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        if alo >= ahi || blo >= bhi {
            continue;
        }
        let (i, j, k) = find_longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        stack.push((alo, i, blo, j));
        stack.push((i + k, ahi, j + k, bhi));
    }
    total
}

/// Classic `difflib.SequenceMatcher.find_longest_match` (no autojunk; never
/// triggers for the short names/tokens this is used on).
fn find_longest_match<T: Eq + Hash + Clone>(
    a: &[T],
    b: &[T],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let mut b2j: HashMap<&T, Vec<usize>> = HashMap::new();
    for (j, item) in b.iter().enumerate().take(bhi).skip(blo) {
        b2j.entry(item).or_default().push(j);
    }

    let mut best_i = alo;
    let mut best_j = blo;
    let mut best_size = 0usize;
    let mut j2len: HashMap<usize, usize> = HashMap::new();

    for i in alo..ahi {
        let mut new_j2len: HashMap<usize, usize> = HashMap::new();
        if let Some(js) = b2j.get(&a[i]) {
            for &j in js {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let k = if j == 0 {
                    1
                } else {
                    j2len.get(&(j - 1)).copied().unwrap_or(0) + 1
                };
                new_j2len.insert(j, k);
                if k > best_size {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_size = k;
                }
            }
        }
        j2len = new_j2len;
    }
    (best_i, best_j, best_size)
}
