use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";
pub const DEFAULT_LOCKFILE: &str = "nestpm-lock.json";

/// Environment overrides.
pub const REGISTRY_ENV: &str = "NESTPM_REGISTRY";
pub const CONCURRENCY_ENV: &str = "NESTPM_CONCURRENCY";
pub const STAGING_DIR_ENV: &str = "NESTPM_STAGING_DIR";

/// Maximum tarball size (200 MiB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Registry base URL without trailing slash.
    pub registry: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Worker threads for resolution and installation fan-out; `None` lets rayon decide.
    pub concurrency: Option<usize>,
    /// Root under which git clones are staged before being moved into place.
    pub staging_dir: PathBuf,
    pub lockfile_name: String,
    pub max_tarball_size: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.into(),
            timeout: Duration::from_secs(30),
            concurrency: None,
            staging_dir: default_staging_dir(),
            lockfile_name: DEFAULT_LOCKFILE.into(),
            max_tarball_size: MAX_TARBALL_SIZE,
        }
    }
}

impl InstallConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(registry) = std::env::var(REGISTRY_ENV) {
            if !registry.trim().is_empty() {
                config.registry = registry;
            }
        }
        if let Some(n) = std::env::var(CONCURRENCY_ENV).ok().and_then(|v| v.trim().parse().ok()) {
            config.concurrency = Some(n).filter(|n: &usize| *n > 0);
        }
        if let Some(dir) = std::env::var_os(STAGING_DIR_ENV) {
            config.staging_dir = PathBuf::from(dir);
        }
        config.registry = config.registry.trim_end_matches('/').to_string();
        config
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = registry.into().trim_end_matches('/').to_string();
        self
    }
}

fn default_staging_dir() -> PathBuf {
    let mut root = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    root.push("nestpm");
    root.push("git-staging");
    root
}
