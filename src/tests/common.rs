use crate::config::InstallConfig;
use crate::fetch::{NpmDist, NpmMetadata, NpmVersion, Registry};
use crate::git::{Git, RefType};
use crate::installation::{Collaborators, InstallOptions, Installation};
use crate::fsutil::StdFs;
use crate::lockfile::{self, LockEntry};
use crate::progress::PackageSnapshot;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{write::GzEncoder, Compression};
use parking_lot::Mutex;
use semver::Version;
use serde_json::{json, Value};
use sha2::{Digest, Sha512};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const REGISTRY_URL: &str = "https://registry.test";

/// Gzipped tarball with every file under `package/`.
pub fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, format!("package/{path}"), *data).expect("append tar entry");
    }
    builder.into_inner().expect("finish tar").finish().expect("finish gzip")
}

pub fn sri(bytes: &[u8]) -> String {
    format!("sha512-{}", STANDARD.encode(Sha512::digest(bytes)))
}

/// In-memory registry serving metadata and tarballs.
#[derive(Default)]
pub struct FakeRegistry {
    packages: Mutex<HashMap<String, NpmMetadata>>,
    tarballs: Mutex<HashMap<String, Vec<u8>>>,
    broken: Mutex<HashSet<String>>,
    failing_manifests: Mutex<HashSet<String>>,
    download_delay: Mutex<Duration>,
    downloads: AtomicUsize,
}

impl FakeRegistry {
    pub fn publish(&self, name: &str, version: &str, deps: &[(&str, &str)]) {
        let manifest = json!({
            "name": name,
            "version": version,
            "dependencies": deps.iter().map(|(n, r)| (n.to_string(), json!(r))).collect::<serde_json::Map<_, _>>(),
        });
        let bytes = tarball(&[
            ("package.json", manifest.to_string().as_bytes()),
            ("index.js", b"module.exports = 1;\n"),
            ("lib/util.js", b"exports.util = true;\n"),
        ]);
        let url = format!("{REGISTRY_URL}/{name}/-/{name}-{version}.tgz");
        let entry = NpmVersion {
            version: version.to_string(),
            dist: NpmDist { tarball: url.clone(), integrity: Some(sri(&bytes)) },
            dependencies: deps.iter().map(|(n, r)| (n.to_string(), r.to_string())).collect(),
        };
        self.tarballs.lock().insert(url, bytes);

        let mut packages = self.packages.lock();
        let meta = packages.entry(name.to_string()).or_default();
        meta.versions.insert(version.to_string(), entry);
        let latest = meta
            .versions
            .keys()
            .filter_map(|v| Version::parse(v).ok())
            .filter(|v| v.pre.is_empty())
            .max();
        if let Some(latest) = latest {
            meta.dist_tags.insert("latest".into(), latest.to_string());
        }
    }

    /// Make the tarball download of `name@version` fail.
    pub fn break_tarball(&self, name: &str, version: &str) {
        self.broken.lock().insert(format!("{REGISTRY_URL}/{name}/-/{name}-{version}.tgz"));
    }

    pub fn corrupt_integrity(&self, name: &str, version: &str) {
        let mut packages = self.packages.lock();
        if let Some(v) = packages.get_mut(name).and_then(|m| m.versions.get_mut(version)) {
            v.dist.integrity = Some(sri(b"something else"));
        }
    }

    /// Fail the next `version_manifest` call for `name`.
    pub fn fail_next_manifest(&self, name: &str) {
        self.failing_manifests.lock().insert(name.to_string());
    }

    pub fn slow_downloads(&self, delay: Duration) {
        *self.download_delay.lock() = delay;
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Registry for FakeRegistry {
    fn package_metadata(&self, name: &str) -> Result<NpmMetadata> {
        self.packages.lock().get(name).cloned().with_context(|| format!("404 {name}"))
    }

    fn version_manifest(&self, name: &str, version: &str) -> Result<NpmVersion> {
        if self.failing_manifests.lock().remove(name) {
            bail!("503 {name}@{version}");
        }
        self.package_metadata(name)?
            .versions
            .get(version)
            .cloned()
            .with_context(|| format!("404 {name}@{version}"))
    }

    fn download_tarball(
        &self,
        url: &str,
        on_progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<Vec<u8>> {
        if self.broken.lock().contains(url) {
            bail!("connection reset fetching {url}");
        }
        let bytes = self.tarballs.lock().get(url).cloned().with_context(|| format!("404 {url}"))?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.download_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let total = bytes.len() as u64;
        on_progress(0, Some(total));
        on_progress(total, Some(total));
        Ok(bytes)
    }
}

/// Branch every fake repository reports as its default.
pub const DEFAULT_BRANCH: &str = "main";

/// Git stand-in: "cloning" writes the registered manifest plus a `.git`
/// marker that records the checked out ref.
#[derive(Default)]
pub struct FakeGit {
    repos: Mutex<HashMap<String, Value>>,
    pulls: Mutex<Vec<PathBuf>>,
    clones: AtomicUsize,
}

impl FakeGit {
    pub fn add_repo(&self, url: &str, name: &str, version: &str, deps: &[(&str, &str)]) {
        let deps: serde_json::Map<String, Value> =
            deps.iter().map(|(n, r)| (n.to_string(), json!(r))).collect();
        self.repos
            .lock()
            .insert(url.to_string(), json!({ "name": name, "version": version, "dependencies": deps }));
    }

    pub fn pulls(&self) -> Vec<PathBuf> {
        self.pulls.lock().clone()
    }

    pub fn clones(&self) -> usize {
        self.clones.load(Ordering::SeqCst)
    }
}

fn ref_marker(dir: &Path) -> PathBuf {
    dir.join(".git").join("NESTPM_REF")
}

impl Git for FakeGit {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let manifest = self.repos.lock().get(url).cloned().with_context(|| format!("repository {url} not found"))?;
        fs::create_dir_all(dest.join(".git"))?;
        fs::write(dest.join("package.json"), manifest.to_string())?;
        self.clones.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pull(&self, dir: &Path, _editor_or_project_context: bool, _project_id: &str) -> Result<()> {
        self.pulls.lock().push(dir.to_path_buf());
        Ok(())
    }

    fn checkout_ref(&self, dir: &Path, reference: &str, preferred: RefType) -> Result<RefType> {
        let ref_type = if reference.is_empty() {
            RefType::Default
        } else if preferred != RefType::Default {
            preferred
        } else if reference == DEFAULT_BRANCH {
            RefType::Default
        } else if reference.starts_with('v') && reference[1..].starts_with(|c: char| c.is_ascii_digit()) {
            RefType::Tag
        } else {
            RefType::Branch
        };
        fs::write(ref_marker(dir), format!("{ref_type}:{reference}"))?;
        Ok(ref_type)
    }

    fn is_on_ref(&self, dir: &Path, reference: &str, ref_type: RefType) -> Result<bool> {
        Ok(fs::read_to_string(ref_marker(dir)).is_ok_and(|m| m == format!("{ref_type}:{reference}")))
    }
}

/// A project directory plus fakes, all inside one temp dir.
pub struct Sandbox {
    temp: TempDir,
    pub registry: Arc<FakeRegistry>,
    pub git: Arc<FakeGit>,
    events: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("create sandbox tempdir");
        fs::create_dir_all(temp.path().join("project")).expect("create project dir");
        Self {
            temp,
            registry: Arc::new(FakeRegistry::default()),
            git: Arc::new(FakeGit::default()),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn project(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn staging(&self) -> PathBuf {
        self.temp.path().join("staging")
    }

    pub fn config(&self) -> InstallConfig {
        InstallConfig {
            registry: REGISTRY_URL.into(),
            concurrency: Some(4),
            staging_dir: self.staging(),
            ..InstallConfig::default()
        }
    }

    pub fn installation(&self, quick: bool) -> Installation {
        let events = self.events.clone();
        let collaborators = Collaborators {
            registry: self.registry.clone(),
            git: self.git.clone(),
            fs: Arc::new(StdFs),
            sink: Arc::new(move |scope: &str, event: &str, payload: &str| {
                events.lock().push((scope.to_string(), event.to_string(), payload.to_string()));
            }),
        };
        let options = InstallOptions { id: 7, project_id: "project-1".into(), quick };
        Installation::new(self.project(), options, self.config(), collaborators)
    }

    pub fn write_manifest(&self, dependencies: Value) {
        let manifest = json!({ "name": "app", "version": "0.0.0", "dependencies": dependencies });
        fs::write(self.project().join("package.json"), manifest.to_string()).expect("write package.json");
    }

    pub fn write_lock(&self, entries: Value) {
        fs::write(self.project().join("nestpm-lock.json"), entries.to_string()).expect("write lock");
    }

    pub fn read_lock(&self) -> Vec<LockEntry> {
        lockfile::read(&StdFs, &self.project().join("nestpm-lock.json")).expect("read lock")
    }

    /// Version from the installed `package.json` at `rel`, if any.
    pub fn installed_version(&self, rel: &str) -> Option<String> {
        let data = fs::read(self.project().join(rel).join("package.json")).ok()?;
        let value: Value = serde_json::from_slice(&data).ok()?;
        value["version"].as_str().map(str::to_string)
    }

    pub fn events(&self) -> Vec<(String, String, String)> {
        self.events.lock().clone()
    }

    pub fn snapshots(&self) -> Vec<PackageSnapshot> {
        self.events().iter().filter_map(|(_, _, payload)| serde_json::from_str(payload).ok()).collect()
    }

    pub fn last_snapshot_of(&self, name: &str) -> Option<PackageSnapshot> {
        self.snapshots().into_iter().filter(|s| s.name == name).last()
    }
}
