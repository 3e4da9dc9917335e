use crate::colors::*;
use crate::config::DEFAULT_LOCKFILE;
use crate::fsutil::{Fs, StdFs};
use crate::lockfile::{self, LockStore};
use anyhow::Result;
use std::path::Path;

pub(crate) fn cmd_list(dir: &Path) -> Result<()> {
    let lock_path = dir.join(DEFAULT_LOCKFILE);
    if !StdFs.exists(&lock_path).is_file {
        println!("{C_GRAY}[nestpm]{C_RESET} {C_RED}error{C_RESET} no lock file. Run 'nestpm install'.");
        return Ok(());
    }
    let store = LockStore::from_entries(lockfile::read(&StdFs, &lock_path)?);
    if store.is_empty() {
        println!("{C_GRAY}[nestpm]{C_RESET} lock file is empty");
        return Ok(());
    }

    println!("{C_GRAY}[nestpm]{C_RESET} packages ({} entries):", store.len());
    for entry in store.entries() {
        let git = entry.git.map(|t| format!(" {C_YELLOW}git:{t}{C_RESET}")).unwrap_or_default();
        println!(
            "{C_GRAY}[nestpm]{C_RESET}  {C_DIM}-{C_RESET} {}@{}{git} {C_DIM}{}{C_RESET}",
            entry.name,
            entry.version,
            entry.locations.join(", ")
        );
    }
    Ok(())
}
