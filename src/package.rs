use crate::git::{GitUrl, RefType};
use crate::progress::{PackageSnapshot, Progress, Stage};
use parking_lot::{Mutex, RwLock};
use semver::Version;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Registry,
    Git(GitUrl),
}

#[derive(Debug, Clone)]
struct Identity {
    name: String,
    version: Option<Version>,
    version_original: Option<String>,
}

/// A node of the dependency graph.
///
/// Shared between resolution and installation tasks, so every mutable part
/// sits behind its own lock.
#[derive(Debug)]
pub struct Package {
    /// Distinguishes structurally identical packages within one session.
    pub installation_id: usize,
    pub source: SourceKind,
    pub direct: bool,
    pub dev: bool,
    identity: RwLock<Identity>,
    git_ref_type: RwLock<Option<RefType>>,
    git_staging_dir: Mutex<Option<PathBuf>>,
    aliases: Mutex<Vec<String>>,
    locations: Mutex<Vec<String>>,
    dependants: Mutex<Vec<Weak<Package>>>,
    dependencies: Mutex<Vec<Arc<Package>>>,
    progress: Mutex<Progress>,
}

impl Package {
    pub fn new(installation_id: usize, name: impl Into<String>, source: SourceKind) -> Self {
        Self {
            installation_id,
            source,
            direct: false,
            dev: false,
            identity: RwLock::new(Identity {
                name: name.into(),
                version: None,
                version_original: None,
            }),
            git_ref_type: RwLock::new(None),
            git_staging_dir: Mutex::new(None),
            aliases: Mutex::new(Vec::new()),
            locations: Mutex::new(Vec::new()),
            dependants: Mutex::new(Vec::new()),
            dependencies: Mutex::new(Vec::new()),
            progress: Mutex::new(Progress::default()),
        }
    }

    pub fn with_flags(mut self, direct: bool, dev: bool) -> Self {
        self.direct = direct;
        self.dev = dev;
        self
    }

    pub fn with_version(self, version: Version, original: Option<String>) -> Self {
        self.set_identity(None, version, original);
        self
    }

    pub fn name(&self) -> String {
        self.identity.read().name.clone()
    }

    pub fn version(&self) -> Option<Version> {
        self.identity.read().version.clone()
    }

    /// The literal the version came from (lock entry) or its canonical form.
    pub fn version_string(&self) -> Option<String> {
        let id = self.identity.read();
        id.version_original.clone().or_else(|| id.version.as_ref().map(Version::to_string))
    }

    /// `name@version` (or just `name` while unresolved).
    pub fn key(&self) -> String {
        match self.version_string() {
            Some(v) => format!("{}@{}", self.name(), v),
            None => self.name(),
        }
    }

    /// Replace the identity; `name` is kept when `None`.
    pub fn set_identity(&self, name: Option<String>, version: Version, original: Option<String>) {
        let mut id = self.identity.write();
        if let Some(name) = name {
            id.name = name;
        }
        id.version = Some(version);
        id.version_original = original;
    }

    pub fn git(&self) -> Option<&GitUrl> {
        match &self.source {
            SourceKind::Git(url) => Some(url),
            SourceKind::Registry => None,
        }
    }

    pub fn git_ref_type(&self) -> Option<RefType> {
        *self.git_ref_type.read()
    }

    pub fn set_git_ref_type(&self, ref_type: RefType) {
        *self.git_ref_type.write() = Some(ref_type);
    }

    pub fn staging_dir(&self) -> Option<PathBuf> {
        self.git_staging_dir.lock().clone()
    }

    pub fn set_staging_dir(&self, dir: Option<PathBuf>) {
        *self.git_staging_dir.lock() = dir;
    }

    /// Clear and return the staging directory.
    pub fn take_staging_dir(&self) -> Option<PathBuf> {
        self.git_staging_dir.lock().take()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.aliases.lock().clone()
    }

    pub fn add_alias(&self, alias: impl Into<String>) {
        let alias = alias.into();
        let mut aliases = self.aliases.lock();
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }

    pub fn locations(&self) -> Vec<String> {
        self.locations.lock().clone()
    }

    /// Append-only; returns `false` when `location` is already recorded.
    pub fn add_location(&self, location: impl Into<String>) -> bool {
        let location = location.into();
        let mut locations = self.locations.lock();
        if locations.contains(&location) {
            return false;
        }
        locations.push(location);
        true
    }

    pub fn add_dependant(&self, parent: &Arc<Package>) {
        self.dependants.lock().push(Arc::downgrade(parent));
    }

    pub fn dependants(&self) -> Vec<Arc<Package>> {
        self.dependants.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn add_dependency(&self, child: Arc<Package>) {
        self.dependencies.lock().push(child);
    }

    pub fn dependencies(&self) -> Vec<Arc<Package>> {
        self.dependencies.lock().clone()
    }

    pub fn progress(&self) -> Progress {
        *self.progress.lock()
    }

    pub fn set_progress(&self, progress: Progress) {
        *self.progress.lock() = progress;
    }

    pub fn stage(&self) -> Stage {
        self.progress.lock().stage
    }

    pub fn snapshot(&self, session_id: usize) -> PackageSnapshot {
        PackageSnapshot {
            name: self.name(),
            version: self.version_string(),
            id: session_id,
            package_id: self.installation_id,
            progress: self.progress(),
        }
    }
}

/// Depth-first walk over a dependency forest, parents before children.
pub fn walk(roots: &[Arc<Package>], visit: &mut dyn FnMut(&Arc<Package>)) {
    for pkg in roots {
        visit(pkg);
        walk(&pkg.dependencies(), visit);
    }
}
