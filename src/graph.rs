//! Builds the dependency forest: every requested dependency becomes a
//! resolved [`Package`] whose children are resolved recursively and in
//! parallel. The same `name@version` reached along different paths is a
//! different node, because it may have to be installed in several places.

use crate::error::InstallError;
use crate::fsutil::{safe_join, INSTALL_ORIGIN};
use crate::installation::Installation;
use crate::manifest::{self, Manifest};
use crate::package::{Package, SourceKind};
use crate::progress::{Progress, Stage};
use crate::resolver::{PackageSpec, VersionResolver};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use semver::Version;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolve `range` (for `name`, when known) and build the subtree below it.
///
/// `ancestors` holds the `name@version` keys on the path from the root; a
/// package already on that path is dropped instead of expanded again.
/// Returns `None` when the package could not be resolved.
pub fn resolve_tree(
    inst: &Installation,
    name: Option<&str>,
    range: &str,
    direct: bool,
    dev: bool,
    ancestors: &[String],
) -> Option<Arc<Package>> {
    let pkg = resolve_package(inst, name, range, direct, dev)?;
    let key = cycle_key(&pkg);
    if ancestors.contains(&key) {
        debug!(package = %key, "dependency cycle, not expanding again");
        discard_staging(inst, &pkg);
        return None;
    }
    let mut chain = ancestors.to_vec();
    chain.push(key);
    expand(inst, &pkg, &chain);
    Some(pkg)
}

/// Turn one `(name, range)` pair into a package with a concrete version.
///
/// Failures are recorded on the session and yield `None`.
pub fn resolve_package(
    inst: &Installation,
    name: Option<&str>,
    range: &str,
    direct: bool,
    dev: bool,
) -> Option<Arc<Package>> {
    match PackageSpec::parse(range) {
        PackageSpec::Registry { range } => {
            let Some(name) = name else {
                let pkg = new_package(inst, &range, SourceKind::Registry, direct, dev);
                fail(inst, &pkg, InstallError::not_found(&range, &range, "missing package name"));
                return None;
            };
            resolve_registry(inst, name, &range, direct, dev)
        }
        PackageSpec::Git(url) => {
            let display = name.unwrap_or_else(|| url.repo_name()).to_string();
            let pkg = new_package(inst, &display, SourceKind::Git(url), direct, dev);
            resolve_git(inst, pkg, range.trim())
        }
        PackageSpec::Unsupported { raw } => {
            let pkg = new_package(inst, name.unwrap_or(&raw), SourceKind::Registry, direct, dev);
            fail(inst, &pkg, InstallError::not_found(&pkg.name(), &raw, "unsupported dependency specifier"));
            None
        }
    }
}

fn resolve_registry(
    inst: &Installation,
    name: &str,
    range: &str,
    direct: bool,
    dev: bool,
) -> Option<Arc<Package>> {
    let pkg = new_package(inst, name, SourceKind::Registry, direct, dev);
    if let Some((entry, version)) = inst.local_packages().best_match(name, range) {
        debug!(name, range, version = %entry.version, "locked");
        pkg.set_identity(None, version, Some(entry.version.clone()));
        return Some(pkg);
    }
    match VersionResolver::new(inst.registry()).resolve(name, range) {
        Ok(version) => {
            pkg.set_identity(None, version, None);
            Some(pkg)
        }
        Err(e) => {
            fail(inst, &pkg, e);
            None
        }
    }
}

fn resolve_git(inst: &Installation, pkg: Arc<Package>, raw: &str) -> Option<Arc<Package>> {
    pkg.add_alias(raw);
    if let Some(entry) = inst.local_packages().find_by_alias(raw) {
        if let Ok(version) = Version::parse(entry.version.trim_start_matches('v')) {
            debug!(alias = raw, name = %entry.name, version = %entry.version, "locked git dependency");
            pkg.set_identity(Some(entry.name.clone()), version, Some(entry.version.clone()));
            if let Some(ref_type) = entry.git {
                pkg.set_git_ref_type(ref_type);
            }
            return Some(pkg);
        }
    }
    match stage_manifest(inst, &pkg) {
        Ok((manifest, version)) => {
            pkg.set_identity(Some(manifest.name().to_string()), version, Some(manifest.version().to_string()));
            Some(pkg)
        }
        Err(e) => {
            discard_staging(inst, &pkg);
            fail(inst, &pkg, e);
            None
        }
    }
}

fn expand(inst: &Installation, pkg: &Arc<Package>, chain: &[String]) {
    let deps: Vec<(String, String)> = discover_dependencies(inst, pkg).into_iter().collect();
    let children: Vec<Arc<Package>> = deps
        .par_iter()
        .filter_map(|(name, range)| resolve_tree(inst, Some(name), range, false, pkg.dev, chain))
        .collect();
    for child in children {
        child.add_dependant(pkg);
        pkg.add_dependency(child);
    }
}

/// Dependency list of a resolved package, from the cheapest source that has
/// it: an installed copy matching the lock, the staged git checkout, or the
/// registry's version manifest.
fn discover_dependencies(inst: &Installation, pkg: &Arc<Package>) -> BTreeMap<String, String> {
    if let Some(deps) = installed_dependencies(inst, pkg) {
        return deps;
    }
    if pkg.git().is_some() {
        return match stage_manifest(inst, pkg) {
            Ok((manifest, _)) => manifest.dependencies,
            Err(e) => {
                discard_staging(inst, pkg);
                fail(inst, pkg, e);
                BTreeMap::new()
            }
        };
    }
    let Some(version) = pkg.version() else {
        return BTreeMap::new();
    };
    match inst.registry().version_manifest(&pkg.name(), &version.to_string()) {
        Ok(meta) => meta.dependencies,
        Err(e) => {
            fail(inst, pkg, InstallError::transport(&pkg.name(), &version.to_string(), format!("{e:#}")));
            BTreeMap::new()
        }
    }
}

fn installed_dependencies(inst: &Installation, pkg: &Package) -> Option<BTreeMap<String, String>> {
    let expected = pkg.version()?;
    let name = pkg.name();
    let entry = inst.local_packages().get(&name, &pkg.version_string()?)?;
    entry.locations.iter().find_map(|loc| {
        let dir = safe_join(inst.base_directory(), &format!("{loc}/{name}"))?;
        let manifest = manifest::read_in(inst.fs(), &dir).ok()??;
        let installed = Version::parse(manifest.version().trim_start_matches('v')).ok()?;
        (manifest.name() == name && installed == expected).then_some(manifest.dependencies)
    })
}

/// Stage the checkout (if needed) and read its manifest.
pub(crate) fn stage_manifest(
    inst: &Installation,
    pkg: &Package,
) -> Result<(Manifest, Version), InstallError> {
    let name = pkg.name();
    let reference = pkg.git().map(|g| g.reference().to_string()).unwrap_or_default();
    let dir = ensure_staged(inst, pkg)
        .map_err(|e| InstallError::transport(&name, &reference, format!("{e:#}")))?;
    let manifest = match manifest::read_in(inst.fs(), &dir) {
        Ok(Some(m)) if m.is_installable() => m,
        Ok(_) => {
            return Err(InstallError::integrity(&name, "checkout has no package.json with name and version"))
        }
        Err(e) => return Err(InstallError::integrity(&name, format!("{e:#}"))),
    };
    let version = Version::parse(manifest.version().trim_start_matches('v')).map_err(|e| {
        InstallError::integrity(&name, format!("invalid version '{}': {e}", manifest.version()))
    })?;
    Ok((manifest, version))
}

/// Clone a git package into a fresh directory under the staging root and
/// check out its ref. Reuses an existing staging directory.
pub(crate) fn ensure_staged(inst: &Installation, pkg: &Package) -> Result<PathBuf> {
    if let Some(dir) = pkg.staging_dir() {
        return Ok(dir);
    }
    let Some(url) = pkg.git() else {
        bail!("{} is not a git dependency", pkg.name());
    };
    let root = &inst.config().staging_dir;
    inst.fs().mkdir(root, Some(INSTALL_ORIGIN))?;
    let dir = tempfile::Builder::new()
        .prefix("git-")
        .tempdir_in(root)
        .with_context(|| format!("create staging dir in {}", root.display()))?
        .keep();

    let staged = (|| -> Result<()> {
        inst.git().clone_repo(&url.url, &dir)?;
        let preferred = pkg.git_ref_type().unwrap_or_else(|| url.preferred_type());
        let ref_type = inst.git().checkout_ref(&dir, url.reference(), preferred)?;
        pkg.set_git_ref_type(ref_type);
        Ok(())
    })();
    if let Err(e) = staged {
        if let Err(rm) = inst.fs().rmdir(&dir, Some(INSTALL_ORIGIN)) {
            warn!("remove staging dir {}: {rm:#}", dir.display());
        }
        return Err(e.context(format!("stage {}", url.url)));
    }
    debug!(url = %url.url, dir = %dir.display(), "staged");
    pkg.set_staging_dir(Some(dir.clone()));
    Ok(dir)
}

/// Remove a package's staging directory, if it still has one.
pub(crate) fn discard_staging(inst: &Installation, pkg: &Package) {
    if let Some(dir) = pkg.take_staging_dir() {
        if let Err(e) = inst.fs().rmdir(&dir, Some(INSTALL_ORIGIN)) {
            warn!("remove staging dir {}: {e:#}", dir.display());
        }
    }
}

pub(crate) fn fail(inst: &Installation, pkg: &Package, error: InstallError) {
    inst.update_progress(pkg, Progress::new(Stage::Error, 0, 0));
    inst.record_failure(pkg, None, error);
}

fn new_package(
    inst: &Installation,
    name: &str,
    source: SourceKind,
    direct: bool,
    dev: bool,
) -> Arc<Package> {
    Arc::new(Package::new(inst.next_package_id(), name, source).with_flags(direct, dev))
}

fn cycle_key(pkg: &Package) -> String {
    match pkg.version() {
        Some(v) => format!("{}@{}", pkg.name(), v),
        None => pkg.name(),
    }
}
