//! Closed error taxonomy for the skill package manager core (§7).

use thiserror::Error;

use crate::descriptor::SkillDescriptor;

/// All failures the core can raise. Kept as one flat enum (rather than a
/// family of nested error types) so the CLI boundary can pattern-match on
/// variant name for exit-code derivation (§6).
#[derive(Error, Debug)]
pub enum SpmError {
    #[error("git command failed: {0}")]
    Git(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("already installed: {0}")]
    AlreadyInstalled(String),

    #[error("failed to clone skill: {0}")]
    Clone(String),

    #[error("failed to install skill dependencies: {0}")]
    SkillRequirements(String),

    #[error("requirements.sh exited with code {0}")]
    SystemRequirements(i32),

    #[error("pip returned code {code}:\n{stdout}\n{stderr}")]
    PipRequirements {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("skill not installed: {0}")]
    NotInstalled(String),

    #[error("already removed: {0}")]
    AlreadyRemoved(String),

    #[error("failed to remove skill: {0}")]
    Remove(String),

    #[error("skill has uncommitted changes:\n{0}")]
    SkillModified(String),

    #[error("{}", multiple_matches_message(.0))]
    MultipleSkillMatches(Vec<SkillDescriptor>),

    #[error("invalid catalog branch: {0}")]
    InvalidBranch(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn multiple_matches_message(skills: &[SkillDescriptor]) -> String {
    skills
        .iter()
        .map(|s| s.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SpmError {
    /// Name of the enum variant, used both for `failure_message` persistence
    /// and for the `1 + sum_of_bytes(name) mod 255` exit code scheme (§6).
    pub fn variant_name(&self) -> &'static str {
        match self {
            SpmError::Git(_) => "Git",
            SpmError::SkillNotFound(_) => "SkillNotFound",
            SpmError::AlreadyInstalled(_) => "AlreadyInstalled",
            SpmError::Clone(_) => "Clone",
            SpmError::SkillRequirements(_) => "SkillRequirements",
            SpmError::SystemRequirements(_) => "SystemRequirements",
            SpmError::PipRequirements { .. } => "PipRequirements",
            SpmError::NotInstalled(_) => "NotInstalled",
            SpmError::AlreadyRemoved(_) => "AlreadyRemoved",
            SpmError::Remove(_) => "Remove",
            SpmError::SkillModified(_) => "SkillModified",
            SpmError::MultipleSkillMatches(_) => "MultipleSkillMatches",
            SpmError::InvalidBranch(_) => "InvalidBranch",
            SpmError::Catalog(_) => "Catalog",
            SpmError::Io(_) => "Io",
            SpmError::Other(_) => "Other",
        }
    }

    /// `repr()`-style rendering persisted into `failure_message` (§4.F).
    pub fn as_repr(&self) -> String {
        format!("{}({})", self.variant_name(), self)
    }

    pub fn exit_code(&self) -> i32 {
        let sum: u32 = self.variant_name().bytes().map(u32::from).sum();
        1 + (sum % 255) as i32
    }

    pub fn is_already_installed(&self) -> bool {
        matches!(self, SpmError::AlreadyInstalled(_))
    }

    pub fn is_already_removed(&self) -> bool {
        matches!(self, SpmError::AlreadyRemoved(_))
    }
}

pub type Result<T> = std::result::Result<T, SpmError>;
