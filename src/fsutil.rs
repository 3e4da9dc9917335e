use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Origin tag attached to every mutation made by an installation.
pub const INSTALL_ORIGIN: &str = "packages-installation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Existence {
    pub exists: bool,
    pub is_file: bool,
}

/// Filesystem operations used by the installer.
///
/// The `origin` tag on mutating calls only feeds change notification in the
/// host; implementations must not change behavior based on it.
pub trait Fs: Send + Sync {
    fn exists(&self, path: &Path) -> Existence;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    fn write_file(&self, path: &Path, data: &[u8], origin: Option<&str>) -> Result<()>;
    /// Recursive.
    fn mkdir(&self, path: &Path, origin: Option<&str>) -> Result<()>;
    /// Recursive; removing a missing directory is not an error.
    fn rmdir(&self, path: &Path, origin: Option<&str>) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path, origin: Option<&str>) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFs;

impl Fs for StdFs {
    fn exists(&self, path: &Path) -> Existence {
        match fs::metadata(path) {
            Ok(meta) => Existence { exists: true, is_file: meta.is_file() },
            Err(_) => Existence::default(),
        }
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("read {}", path.display()))
    }

    fn write_file(&self, path: &Path, data: &[u8], _origin: Option<&str>) -> Result<()> {
        fs::write(path, data).with_context(|| format!("write {}", path.display()))
    }

    fn mkdir(&self, path: &Path, _origin: Option<&str>) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("mkdir {}", path.display()))
    }

    fn rmdir(&self, path: &Path, _origin: Option<&str>) -> Result<()> {
        match fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("rmdir {}", path.display())),
        }
    }

    fn rename(&self, from: &Path, to: &Path, _origin: Option<&str>) -> Result<()> {
        if fs::rename(from, to).is_ok() {
            return Ok(());
        }
        // Staging roots may live on another device; fall back to copy + remove.
        copy_tree(from, to)
            .with_context(|| format!("move {} to {}", from.display(), to.display()))?;
        fs::remove_dir_all(from).with_context(|| format!("remove {}", from.display()))?;
        Ok(())
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest)?;
        let perms = entry.metadata()?.permissions();
        fs::set_permissions(&dest, perms)?;
    }
    Ok(())
}

/// Join a `/`-separated relative path onto `base`, refusing anything that
/// could escape it.
pub fn safe_join(base: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    let mut p = base.to_path_buf();
    for part in rel.split('/').filter(|s| !s.is_empty() && *s != ".") {
        p.push(part);
    }
    Some(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_rejects_escapes() {
        let base = Path::new("/base");
        assert_eq!(safe_join(base, "node_modules/@a/b"), Some(PathBuf::from("/base/node_modules/@a/b")));
        assert_eq!(safe_join(base, "../etc"), None);
        assert_eq!(safe_join(base, "/etc"), None);
    }

    #[test]
    fn rename_moves_tree_and_rmdir_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        fs::create_dir_all(from.join("lib")).unwrap();
        fs::write(from.join("lib/index.js"), "x").unwrap();
        let to = dir.path().join("nested/to");
        fs::create_dir_all(to.parent().unwrap()).unwrap();

        StdFs.rename(&from, &to, Some(INSTALL_ORIGIN)).unwrap();
        assert!(StdFs.exists(&to.join("lib/index.js")).is_file);
        assert!(!StdFs.exists(&from).exists);

        StdFs.rmdir(&to, None).unwrap();
        StdFs.rmdir(&to, None).unwrap();
    }
}
