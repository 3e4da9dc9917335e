use crate::config::InstallConfig;
use crate::error::{InstallError, Result};
use crate::fetch::{HttpRegistry, Registry};
use crate::fsutil::{Fs, StdFs, INSTALL_ORIGIN};
use crate::git::{CommandGit, Git, GitUrl};
use crate::graph;
use crate::installer::{self, NODE_MODULES};
use crate::lockfile::{self, LockEntry, LockStore};
use crate::manifest::{self, Manifest};
use crate::package::{self, Package};
use crate::progress::{NullSink, Progress, ProgressSink, SessionSnapshot, Stage, INSTALLATION_EVENT};
use crate::resolver::{ModuleSpecifier, RangeSet};
use anyhow::Context;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// External collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn Registry>,
    pub git: Arc<dyn Git>,
    pub fs: Arc<dyn Fs>,
    pub sink: Arc<dyn ProgressSink>,
}

impl Collaborators {
    /// HTTP registry, `git` binary, local filesystem, no progress sink.
    pub fn from_config(config: &InstallConfig) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(HttpRegistry::new(config)?),
            git: Arc::new(CommandGit),
            fs: Arc::new(StdFs),
            sink: Arc::new(NullSink),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Session id echoed in every progress payload.
    pub id: usize,
    pub project_id: String,
    /// Skip update checks (git pulls) for packages that are already in place.
    pub quick: bool,
}

/// A dependency to install at the top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRequest {
    /// Unknown for raw git specifiers until the checkout names the package.
    pub name: Option<String>,
    pub range: String,
    pub dev: bool,
}

impl DependencyRequest {
    /// Accepts `name@range/sub/path` or a git URL.
    pub fn from_specifier(raw: &str, dev: bool) -> Self {
        if GitUrl::parse(raw).is_some() {
            return Self { name: None, range: raw.trim().to_string(), dev };
        }
        let spec = ModuleSpecifier::parse(raw);
        Self { name: Some(spec.name), range: spec.range, dev }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPackage {
    pub name: String,
    pub version: Option<String>,
    /// Target parent directory, when the failure happened while installing.
    pub location: Option<String>,
    pub error: InstallError,
}

#[derive(Debug)]
pub struct InstallationReport {
    pub duration: Duration,
    pub packages_installed_count: usize,
    pub failures: Vec<FailedPackage>,
    pub roots: Vec<Arc<Package>>,
    pub lock_entries: Vec<LockEntry>,
}

impl InstallationReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One resolution + installation session rooted at `base_directory`.
pub struct Installation {
    id: usize,
    base_directory: PathBuf,
    project_id: String,
    quick: bool,
    config: InstallConfig,
    registry: Arc<dyn Registry>,
    git: Arc<dyn Git>,
    fs: Arc<dyn Fs>,
    sink: Arc<dyn ProgressSink>,
    local_packages: LockStore,
    packages_installed_count: Mutex<usize>,
    failures: Mutex<Vec<FailedPackage>>,
    dir_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
    next_package_id: AtomicUsize,
}

impl Installation {
    /// Loads the previous lock file from `base_directory`.
    pub fn new(
        base_directory: impl Into<PathBuf>,
        options: InstallOptions,
        config: InstallConfig,
        collaborators: Collaborators,
    ) -> Self {
        let base_directory = base_directory.into();
        let lock_path = base_directory.join(&config.lockfile_name);
        let local_packages = LockStore::load(collaborators.fs.as_ref(), &lock_path);
        debug!(entries = local_packages.len(), path = %lock_path.display(), "loaded lock");
        Self {
            id: options.id,
            base_directory,
            project_id: options.project_id,
            quick: options.quick,
            config,
            registry: collaborators.registry,
            git: collaborators.git,
            fs: collaborators.fs,
            sink: collaborators.sink,
            local_packages,
            packages_installed_count: Mutex::new(0),
            failures: Mutex::new(Vec::new()),
            dir_locks: Mutex::new(HashMap::new()),
            next_package_id: AtomicUsize::new(1),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn quick(&self) -> bool {
        self.quick
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    pub fn git(&self) -> &dyn Git {
        self.git.as_ref()
    }

    pub fn fs(&self) -> &dyn Fs {
        self.fs.as_ref()
    }

    pub fn local_packages(&self) -> &LockStore {
        &self.local_packages
    }

    pub fn lockfile_path(&self) -> PathBuf {
        self.base_directory.join(&self.config.lockfile_name)
    }

    pub fn packages_installed_count(&self) -> usize {
        *self.packages_installed_count.lock()
    }

    pub fn failures(&self) -> Vec<FailedPackage> {
        self.failures.lock().clone()
    }

    pub(crate) fn next_package_id(&self) -> usize {
        self.next_package_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn record_fresh_install(&self) {
        *self.packages_installed_count.lock() += 1;
    }

    pub(crate) fn record_failure(&self, pkg: &Package, location: Option<&str>, error: InstallError) {
        warn!(package = %pkg.key(), location = location.unwrap_or("-"), kind = error.kind(), "{error}");
        self.failures.lock().push(FailedPackage {
            name: pkg.name(),
            version: pkg.version_string(),
            location: location.map(str::to_string),
            error,
        });
    }

    /// Mutex guarding one install directory for the already-installed check
    /// and the fresh install that may follow it.
    pub(crate) fn dir_lock(&self, dir: &Path) -> Arc<Mutex<()>> {
        self.dir_locks.lock().entry(dir.to_path_buf()).or_default().clone()
    }

    pub(crate) fn update_progress(&self, pkg: &Package, progress: Progress) {
        pkg.set_progress(progress);
        self.notify(pkg);
    }

    pub(crate) fn notify(&self, pkg: &Package) {
        match serde_json::to_string(&pkg.snapshot(self.id)) {
            Ok(payload) => self.sink.notify(&self.project_id, INSTALLATION_EVENT, &payload),
            Err(e) => warn!("serialize progress for {}: {e}", pkg.key()),
        }
    }

    /// Install `dependencies` and `devDependencies` of `<base>/package.json`.
    pub fn install_project(&self) -> Result<InstallationReport> {
        let manifest = manifest::read_in(self.fs(), &self.base_directory)?.with_context(|| {
            format!("no package.json in {}", self.base_directory.display())
        })?;
        self.install(project_requests(&manifest).into_values().collect())
    }

    /// Install `specs` alongside the project's own dependencies, then add
    /// them to `package.json` so the next project install keeps them.
    pub fn install_specifiers(&self, specs: &[String], dev: bool) -> Result<InstallationReport> {
        let mut requests = match manifest::read_in(self.fs(), &self.base_directory)? {
            Some(manifest) => project_requests(&manifest),
            None => BTreeMap::new(),
        };
        let added: Vec<DependencyRequest> =
            specs.iter().map(|s| DependencyRequest::from_specifier(s, dev)).collect();
        let mut unnamed: Vec<DependencyRequest> = Vec::new();
        for req in &added {
            match &req.name {
                Some(name) => {
                    requests.insert(name.clone(), req.clone());
                }
                None => {
                    let known = requests.values().chain(&unnamed).any(|r| r.range == req.range);
                    if !known {
                        unnamed.push(req.clone());
                    }
                }
            }
        }

        let report = self.install(requests.into_values().chain(unnamed).collect())?;
        let saved = saved_ranges(&added, &report.roots);
        manifest::record_dependencies(self.fs(), &self.base_directory, &saved, dev)
            .context("record installed packages in package.json")?;
        Ok(report)
    }

    /// Resolve, expand, install and lock `requests` as direct dependencies.
    ///
    /// Runs to completion: there is no cancellation once started. Per-package
    /// failures end up in [`InstallationReport::failures`]; only lock file
    /// persistence errors fail the call.
    pub fn install(&self, requests: Vec<DependencyRequest>) -> Result<InstallationReport> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.concurrency.unwrap_or(0))
            .thread_name(|i| format!("nestpm-{i}"))
            .build()
            .context("build install thread pool")?;

        let roots: Vec<Arc<Package>> = pool.install(|| {
            let roots: Vec<Arc<Package>> = requests
                .par_iter()
                .filter_map(|req| {
                    graph::resolve_tree(self, req.name.as_deref(), &req.range, true, req.dev, &[])
                })
                .collect();
            roots.par_iter().for_each(|root| installer::install(self, root, NODE_MODULES));
            roots
        });

        let lock_entries = lockfile::persist(self.fs(), &self.lockfile_path(), &roots)
            .with_context(|| format!("write {}", self.lockfile_path().display()))?;
        self.discard_leftover_staging(&roots);

        let report = InstallationReport {
            duration: start.elapsed(),
            packages_installed_count: self.packages_installed_count(),
            failures: self.failures(),
            roots,
            lock_entries,
        };
        info!(
            installed = report.packages_installed_count,
            failed = report.failures.len(),
            locked = report.lock_entries.len(),
            "installation finished in {:.2?}",
            report.duration
        );
        let summary = SessionSnapshot {
            id: self.id,
            duration: report.duration.as_millis() as u64,
            packages_installed_count: report.packages_installed_count,
            failed_count: report.failures.len(),
        };
        if let Ok(payload) = serde_json::to_string(&summary) {
            self.sink.notify(&self.project_id, INSTALLATION_EVENT, &payload);
        }
        Ok(report)
    }

    fn discard_leftover_staging(&self, roots: &[Arc<Package>]) {
        package::walk(roots, &mut |pkg| {
            if let Some(dir) = pkg.take_staging_dir() {
                if let Err(e) = self.fs.rmdir(&dir, Some(INSTALL_ORIGIN)) {
                    warn!("remove staging dir {}: {e:#}", dir.display());
                }
            }
        });
    }
}

fn project_requests(manifest: &Manifest) -> BTreeMap<String, DependencyRequest> {
    let mut requests = BTreeMap::new();
    for (name, range) in &manifest.dev_dependencies {
        requests.insert(name.clone(), DependencyRequest { name: Some(name.clone()), range: range.clone(), dev: true });
    }
    // `dependencies` wins when a name is listed twice.
    for (name, range) in &manifest.dependencies {
        requests.insert(name.clone(), DependencyRequest { name: Some(name.clone()), range: range.clone(), dev: false });
    }
    requests
}

/// `package.json` ranges for the requested packages that were installed.
/// Wildcards and dist-tags are saved as `^<installed version>`.
fn saved_ranges(added: &[DependencyRequest], roots: &[Arc<Package>]) -> BTreeMap<String, String> {
    let mut saved = BTreeMap::new();
    for req in added {
        let root = roots.iter().filter(|r| r.stage() == Stage::Done).find(|r| match &req.name {
            Some(name) => r.name() == *name,
            None => r.aliases().contains(&req.range),
        });
        let Some(root) = root else { continue };
        let range = match root.version() {
            Some(version) if root.git().is_none() && is_floating(&req.range) => format!("^{version}"),
            _ => req.range.clone(),
        };
        saved.insert(root.name(), range);
    }
    saved
}

fn is_floating(range: &str) -> bool {
    matches!(range.trim(), "" | "*" | "latest") || RangeSet::parse(range).is_err()
}
