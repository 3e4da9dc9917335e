use super::progress::{status_for_payload, ProgressRenderer};
use crate::colors::*;
use crate::config::InstallConfig;
use crate::installation::{Collaborators, InstallOptions, Installation, InstallationReport};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct InstallArgs {
    pub specs: Vec<String>,
    pub dev: bool,
    pub quick: bool,
    pub registry: Option<String>,
    pub dir: PathBuf,
    pub no_progress: bool,
}

pub(crate) fn cmd_install(args: InstallArgs) -> Result<()> {
    let mut config = InstallConfig::from_env();
    if let Some(registry) = &args.registry {
        config = config.with_registry(registry.as_str());
    }
    let base = std::fs::canonicalize(&args.dir)
        .with_context(|| format!("project directory {}", args.dir.display()))?;

    let renderer = Arc::new(Mutex::new(ProgressRenderer::new()));
    let mut collaborators = Collaborators::from_config(&config)?;
    if !args.no_progress {
        let renderer = renderer.clone();
        collaborators = collaborators.with_sink(Arc::new(move |_scope: &str, _event: &str, payload: &str| {
            if let Some(line) = status_for_payload(payload) {
                renderer.lock().render(line);
            }
        }));
    }

    let options = InstallOptions {
        id: std::process::id() as usize,
        project_id: base.display().to_string(),
        quick: args.quick,
    };
    let inst = Installation::new(&base, options, config, collaborators);
    let report = if args.specs.is_empty() {
        inst.install_project()?
    } else {
        inst.install_specifiers(&args.specs, args.dev)?
    };
    renderer.lock().clear_line();
    print_summary(&report);

    if !report.is_complete() {
        bail!("{} package(s) failed to install", report.failures.len());
    }
    Ok(())
}

fn print_summary(report: &InstallationReport) {
    for failure in &report.failures {
        let label = match &failure.version {
            Some(v) => format!("{}@{}", failure.name, v),
            None => failure.name.clone(),
        };
        let at = failure.location.as_deref().map(|l| format!(" in {l}")).unwrap_or_default();
        println!(
            "{C_GRAY}[nestpm]{C_RESET} {C_RED}{kind}{C_RESET} {label}{at}: {err}",
            kind = failure.error.kind(),
            err = failure.error
        );
    }
    println!(
        "{C_GRAY}[nestpm]{C_RESET} {C_GREEN}installed{C_RESET} {} new, {} locked {C_DIM}({:.2}s){C_RESET}",
        report.packages_installed_count,
        report.lock_entries.len(),
        report.duration.as_secs_f64()
    );
}
