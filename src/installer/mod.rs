use crate::error::InstallError;
use crate::fsutil::{safe_join, INSTALL_ORIGIN};
use crate::graph;
use crate::installation::Installation;
use crate::manifest;
use crate::package::Package;
use crate::progress::{Progress, Stage};
use rayon::prelude::*;
use semver::Version;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod tarball;

pub const NODE_MODULES: &str = "node_modules";

/// Materialize `pkg` at `<target_parent>/<name>` (relative to the session's
/// base directory), then its dependencies under that copy's `node_modules`.
///
/// A copy that already matches is kept. Failures are recorded on the
/// session and stop descent into the failed package only.
///
/// # Panics
///
/// When `pkg` has no resolved version.
pub fn install(inst: &Installation, pkg: &Arc<Package>, target_parent: &str) {
    let Some(version) = pkg.version() else {
        panic!("package {} reached installation without a resolved version", pkg.name());
    };
    if pkg.stage() == Stage::Error {
        return;
    }
    let name = pkg.name();
    let pkg_rel = format!("{target_parent}/{name}");
    let Some(pkg_dir) = safe_join(inst.base_directory(), &pkg_rel) else {
        graph::discard_staging(inst, pkg);
        fail(inst, pkg, target_parent, InstallError::integrity(&name, format!("unsafe install path {pkg_rel}")));
        return;
    };
    pkg.add_location(target_parent);

    let placed = {
        let lock = inst.dir_lock(&pkg_dir);
        let _guard = lock.lock();
        place(inst, pkg, &pkg_dir, target_parent, &version)
    };
    if !placed {
        return;
    }

    let nested = format!("{pkg_rel}/{NODE_MODULES}");
    pkg.dependencies().par_iter().for_each(|child| install(inst, child, &nested));
}

/// Runs with the directory lock held. Returns whether the package is in place.
fn place(
    inst: &Installation,
    pkg: &Package,
    pkg_dir: &Path,
    target_parent: &str,
    version: &Version,
) -> bool {
    if is_installed(inst, pkg, pkg_dir, version) {
        debug!(package = %pkg.key(), dir = %pkg_dir.display(), "already installed");
        if pkg.git_ref_type().is_some_and(|t| t.is_tracking()) && !inst.quick() {
            update_checkout(inst, pkg, pkg_dir);
        }
        graph::discard_staging(inst, pkg);
    } else {
        let fresh = match pkg.git() {
            Some(_) => install_git(inst, pkg, pkg_dir),
            None => install_registry(inst, pkg, pkg_dir, version),
        };
        if let Err(e) = fresh {
            if let Err(rm) = inst.fs().rmdir(pkg_dir, Some(INSTALL_ORIGIN)) {
                warn!("remove partial install {}: {rm:#}", pkg_dir.display());
            }
            graph::discard_staging(inst, pkg);
            fail(inst, pkg, target_parent, e);
            return false;
        }
        inst.record_fresh_install();
    }
    inst.update_progress(pkg, Progress::new(Stage::Done, 1, 1));
    true
}

/// The directory holds this package: same name and version for registry
/// packages, checked out at the expected ref for git ones.
fn is_installed(inst: &Installation, pkg: &Package, pkg_dir: &Path, version: &Version) -> bool {
    let manifest = match manifest::read_in(inst.fs(), pkg_dir) {
        Ok(Some(m)) => m,
        Ok(None) => return false,
        Err(e) => {
            debug!(dir = %pkg_dir.display(), "unreadable manifest: {e:#}");
            return false;
        }
    };
    if manifest.name() != pkg.name() {
        return false;
    }
    match pkg.git() {
        None => Version::parse(manifest.version().trim_start_matches('v')).is_ok_and(|v| &v == version),
        Some(url) => {
            let ref_type = pkg.git_ref_type().unwrap_or_else(|| url.preferred_type());
            inst.git().is_on_ref(pkg_dir, url.reference(), ref_type).unwrap_or(false)
        }
    }
}

fn install_registry(
    inst: &Installation,
    pkg: &Package,
    pkg_dir: &Path,
    version: &Version,
) -> Result<(), InstallError> {
    let name = pkg.name();
    let version_str = version.to_string();
    let transport = |e: anyhow::Error| InstallError::transport(&name, &version_str, format!("{e:#}"));
    let integrity = |e: anyhow::Error| InstallError::integrity(&name, format!("{e:#}"));

    let meta = inst.registry().version_manifest(&name, &version_str).map_err(transport)?;
    inst.fs().rmdir(pkg_dir, Some(INSTALL_ORIGIN)).map_err(transport)?;

    inst.update_progress(pkg, Progress::new(Stage::Downloading, 0, 0));
    let bytes = inst
        .registry()
        .download_tarball(&meta.dist.tarball, &mut |loaded, total| {
            inst.update_progress(pkg, Progress::new(Stage::Downloading, loaded, total.unwrap_or(0)));
        })
        .map_err(transport)?;
    tarball::verify_integrity(&bytes, meta.dist.integrity.as_deref()).map_err(integrity)?;

    let total = tarball::count_entries(&bytes).map_err(integrity)?;
    inst.update_progress(pkg, Progress::new(Stage::Unpacking, 0, total));
    inst.fs().mkdir(pkg_dir, Some(INSTALL_ORIGIN)).map_err(transport)?;
    tarball::extract(inst.fs(), &bytes, pkg_dir, &mut |n| {
        inst.update_progress(pkg, Progress::new(Stage::Unpacking, n, total));
    })
    .map_err(integrity)?;

    match manifest::read_in(inst.fs(), pkg_dir) {
        Ok(Some(m)) if m.name() == name => Ok(()),
        Ok(Some(m)) => {
            warn!(package = %name, found = m.name(), "tarball manifest names another package");
            Ok(())
        }
        Ok(None) => Err(InstallError::integrity(&name, "tarball has no package.json")),
        Err(e) => Err(integrity(e)),
    }
}

/// Move the staged checkout into place, staging it first when resolution
/// was served from the lock.
fn install_git(inst: &Installation, pkg: &Package, pkg_dir: &Path) -> Result<(), InstallError> {
    inst.update_progress(pkg, Progress::new(Stage::Downloading, 0, 0));
    let (manifest, version) = graph::stage_manifest(inst, pkg)?;
    pkg.set_identity(Some(manifest.name().to_string()), version, Some(manifest.version().to_string()));

    let name = pkg.name();
    let reference = pkg.git().map(|g| g.reference().to_string()).unwrap_or_default();
    let transport = |e: anyhow::Error| InstallError::transport(&name, &reference, format!("{e:#}"));
    let Some(staging) = pkg.staging_dir() else {
        return Err(InstallError::transport(&name, &reference, "checkout vanished before install"));
    };

    inst.update_progress(pkg, Progress::new(Stage::Unpacking, 0, 1));
    inst.fs().rmdir(pkg_dir, Some(INSTALL_ORIGIN)).map_err(transport)?;
    if let Some(parent) = pkg_dir.parent() {
        inst.fs().mkdir(parent, Some(INSTALL_ORIGIN)).map_err(transport)?;
    }
    inst.fs().rename(&staging, pkg_dir, Some(INSTALL_ORIGIN)).map_err(transport)?;
    pkg.take_staging_dir();
    Ok(())
}

/// Pull a tracking checkout and pick up its new identity.
fn update_checkout(inst: &Installation, pkg: &Package, pkg_dir: &Path) {
    if let Err(e) = inst.git().pull(pkg_dir, false, inst.project_id()) {
        warn!(package = %pkg.key(), "git pull failed, keeping current checkout: {e:#}");
        return;
    }
    match manifest::read_in(inst.fs(), pkg_dir) {
        Ok(Some(m)) if m.is_installable() => {
            if let Ok(version) = Version::parse(m.version().trim_start_matches('v')) {
                pkg.set_identity(Some(m.name().to_string()), version, Some(m.version().to_string()));
            }
        }
        Ok(_) => warn!(package = %pkg.key(), "pulled checkout has no usable package.json"),
        Err(e) => warn!(package = %pkg.key(), "read pulled manifest: {e:#}"),
    }
}

fn fail(inst: &Installation, pkg: &Package, target_parent: &str, error: InstallError) {
    inst.update_progress(pkg, Progress::new(Stage::Error, 0, 0));
    inst.record_failure(pkg, Some(target_parent), error);
}
