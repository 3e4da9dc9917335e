use crate::fsutil::{Fs, INSTALL_ORIGIN};
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha512};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;

// Header sizes are untrusted; larger entries grow the buffer while reading.
const PREALLOC_LIMIT: u64 = 1 << 20;

/// Check `bytes` against an SRI `sha512-...` string. Other algorithms are
/// accepted unchecked.
pub fn verify_integrity(bytes: &[u8], integrity: Option<&str>) -> Result<()> {
    let Some(b64) = integrity.and_then(|i| i.trim().strip_prefix("sha512-")) else {
        return Ok(());
    };
    let expected = STANDARD.decode(b64).context("decode integrity base64")?;
    let digest = Sha512::digest(bytes);
    if expected != digest[..] {
        bail!(
            "integrity mismatch: expected sha512-{}, got sha512-{}",
            b64,
            STANDARD.encode(digest)
        );
    }
    Ok(())
}

/// Number of entries in a gzipped tarball.
pub fn count_entries(bytes: &[u8]) -> Result<u64> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut count = 0;
    for entry in archive.entries().context("read tarball")? {
        entry.context("read tarball entry")?;
        count += 1;
    }
    Ok(count)
}

/// Unpack a gzipped tarball into `dest`, dropping the first path component
/// of every entry (`package/` for npm tarballs).
///
/// `on_entry` receives the running entry count. Returns the total.
pub fn extract(
    fs: &dyn Fs,
    bytes: &[u8],
    dest: &Path,
    on_entry: &mut dyn FnMut(u64),
) -> Result<u64> {
    let mut archive = Archive::new(GzDecoder::new(bytes));
    let mut count = 0;
    for entry in archive.entries().context("read tarball")? {
        let mut entry = entry.context("read tarball entry")?;
        count += 1;
        let path = entry.path().context("tarball entry path")?.into_owned();
        if let Some(rel) = strip_first_component(&path) {
            let target = dest.join(&rel);
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                fs.mkdir(&target, Some(INSTALL_ORIGIN))?;
            } else if kind.is_file() {
                let mut data = Vec::with_capacity(entry.size().min(PREALLOC_LIMIT) as usize);
                entry
                    .read_to_end(&mut data)
                    .with_context(|| format!("read {} from tarball", path.display()))?;
                if let Some(parent) = target.parent() {
                    fs.mkdir(parent, Some(INSTALL_ORIGIN))?;
                }
                fs.write_file(&target, &data, Some(INSTALL_ORIGIN))?;
            }
            // links and special files are skipped
        }
        on_entry(count);
    }
    Ok(count)
}

/// `None` for the root entry itself and for paths escaping the destination.
fn strip_first_component(path: &Path) -> Option<PathBuf> {
    let mut parts = path.components();
    parts.next()?;
    let mut out = PathBuf::new();
    for part in parts {
        match part {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}
