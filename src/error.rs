use thiserror::Error;

pub type Result<T> = anyhow::Result<T>;

/// Recoverable failures that drop a package (and its subtree) from a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    /// Version or dist-tag could not be matched, or the registry call failed.
    #[error("no version of {name} satisfies '{range}': {reason}")]
    NotFound { name: String, range: String, reason: String },
    /// Tarball download or git clone/pull failed.
    #[error("failed to fetch {name}@{version}: {reason}")]
    Transport { name: String, version: String, reason: String },
    /// The fetched content is unusable (missing name/version, hash mismatch).
    #[error("{name} is not installable: {reason}")]
    Integrity { name: String, reason: String },
}

impl InstallError {
    pub fn not_found(name: &str, range: &str, reason: impl ToString) -> Self {
        Self::NotFound { name: name.into(), range: range.into(), reason: reason.to_string() }
    }

    pub fn transport(name: &str, version: &str, reason: impl ToString) -> Self {
        Self::Transport { name: name.into(), version: version.into(), reason: reason.to_string() }
    }

    pub fn integrity(name: &str, reason: impl ToString) -> Self {
        Self::Integrity { name: name.into(), reason: reason.to_string() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InstallError::NotFound { .. } => "not-found",
            InstallError::Transport { .. } => "transport",
            InstallError::Integrity { .. } => "integrity",
        }
    }
}
