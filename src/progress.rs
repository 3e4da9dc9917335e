use serde::{Deserialize, Serialize};

/// Event carrying per-package progress and the final session summary.
pub const INSTALLATION_EVENT: &str = "packages-installation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Pending,
    Downloading,
    Unpacking,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub stage: Stage,
    pub loaded: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(stage: Stage, loaded: u64, total: u64) -> Self {
        Self { stage, loaded, total }
    }
}

/// Snapshot sent for every change of a package's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Session id.
    pub id: usize,
    /// Distinguishes copies of the same name@version at different locations.
    pub package_id: usize,
    pub progress: Progress,
}

/// Sent once when a session finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: usize,
    /// Milliseconds.
    pub duration: u64,
    pub packages_installed_count: usize,
    pub failed_count: usize,
}

/// Receives `(scope_id, event_name, json_payload)` notifications.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, scope_id: &str, event: &str, payload: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, &str, &str) + Send + Sync,
{
    fn notify(&self, scope_id: &str, event: &str, payload: &str) {
        self(scope_id, event, payload)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn notify(&self, _scope_id: &str, _event: &str, _payload: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_payload_shape() {
        let snap = PackageSnapshot {
            name: "left-pad".into(),
            version: Some("1.3.0".into()),
            id: 7,
            package_id: 3,
            progress: Progress::new(Stage::Downloading, 10, 100),
        };
        let v: serde_json::Value = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["name"], "left-pad");
        assert_eq!(v["id"], 7);
        assert_eq!(v["progress"]["stage"], "downloading");
        assert_eq!(v["progress"]["total"], 100);

        let unresolved = PackageSnapshot { version: None, ..snap };
        let v = serde_json::to_value(&unresolved).unwrap();
        assert!(v.get("version").is_none());
    }
}
