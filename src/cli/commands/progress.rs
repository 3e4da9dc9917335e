use crate::colors::*;
use crate::progress::{PackageSnapshot, Stage};
use std::io::{self, Write};

/// Single status line rewritten in place.
#[derive(Debug, Default)]
pub(super) struct ProgressRenderer {
    last_len: usize,
}

impl ProgressRenderer {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn render(&mut self, message: impl Into<String>) {
        let message = message.into();
        let mut out = io::stdout();
        let pad = self.last_len.saturating_sub(message.len());
        write!(out, "\r{}{}", message, " ".repeat(pad)).ok();
        out.flush().ok();
        self.last_len = message.len();
    }

    pub(super) fn clear_line(&mut self) {
        if self.last_len == 0 {
            return;
        }
        print!("\r{}\r", " ".repeat(self.last_len));
        io::stdout().flush().ok();
        self.last_len = 0;
    }
}

/// Render a package payload; `None` for payloads that are not per-package.
pub(super) fn status_for_payload(payload: &str) -> Option<String> {
    let snap: PackageSnapshot = serde_json::from_str(payload).ok()?;
    let label = match &snap.version {
        Some(v) => format!("{}@{}", snap.name, v),
        None => snap.name.clone(),
    };
    let p = snap.progress;
    let detail = match p.stage {
        Stage::Downloading if p.total > 0 => format!("{label} {}/{} KiB", p.loaded / 1024, p.total / 1024),
        Stage::Downloading if p.loaded > 0 => format!("{label} {} KiB", p.loaded / 1024),
        Stage::Unpacking if p.total > 0 => format!("{label} {}/{}", p.loaded, p.total),
        _ => label,
    };
    Some(format_status(p.stage, &detail))
}

pub(super) fn format_status(stage: Stage, detail: &str) -> String {
    let (color, action) = match stage {
        Stage::Pending => (C_DIM, "pending"),
        Stage::Downloading => (C_CYAN, "downloading"),
        Stage::Unpacking => (C_MAGENTA, "unpacking"),
        Stage::Done => (C_GREEN, "done"),
        Stage::Error => (C_RED, "error"),
    };
    format!("{C_GRAY}[nestpm]{C_RESET} {color}{action}{C_RESET} {detail}")
}
