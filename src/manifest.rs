use crate::error::Result;
use crate::fsutil::{Fs, INSTALL_ORIGIN};
use anyhow::{bail, Context};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

pub const MANIFEST_FILE: &str = "package.json";

/// The subset of `package.json` this crate reads.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "string_map")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies", deserialize_with = "string_map")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<Browser>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Exports>,
}

/// `exports` is either a path, a list of fallbacks, or a condition/subpath map.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Exports {
    Path(String),
    List(Vec<Exports>),
    Map(BTreeMap<String, Exports>),
    /// `null` entries block a subpath.
    Blocked(()),
}

/// `browser` is either a replacement entry point or a per-file remap where
/// `false` disables a module.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Browser {
    Path(String),
    Map(BTreeMap<String, BrowserTarget>),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum BrowserTarget {
    Path(String),
    Disabled(bool),
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: Some(name.into()), version: Some(version.into()), ..Self::default() }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Both `name` and `version` present and non-empty.
    pub fn is_installable(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.name) && filled(&self.version)
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or_default()
    }
}

/// Read `<dir>/package.json`; `Ok(None)` when there is no such file.
pub fn read_in(fs: &dyn Fs, dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !fs.exists(&path).is_file {
        return Ok(None);
    }
    let data = fs.read_file(&path)?;
    let manifest =
        Manifest::parse(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(manifest))
}

/// Add `entries` to `dependencies` (or `devDependencies`) of
/// `<dir>/package.json`, creating the file when there is none. Fields this
/// crate does not model are written back unchanged.
pub fn record_dependencies(
    fs: &dyn Fs,
    dir: &Path,
    entries: &BTreeMap<String, String>,
    dev: bool,
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let path = dir.join(MANIFEST_FILE);
    let mut doc = if fs.exists(&path).is_file {
        serde_json::from_slice(&fs.read_file(&path)?).with_context(|| format!("parse {}", path.display()))?
    } else {
        Value::Object(Map::new())
    };
    let Value::Object(root) = &mut doc else {
        bail!("{} is not a JSON object", path.display());
    };
    let field = if dev { "devDependencies" } else { "dependencies" };
    let section = root.entry(field).or_insert_with(|| Value::Object(Map::new()));
    if !section.is_object() {
        *section = Value::Object(Map::new());
    }
    if let Value::Object(map) = section {
        for (name, range) in entries {
            map.insert(name.clone(), Value::String(range.clone()));
        }
    }
    let mut data = serde_json::to_vec_pretty(&doc)?;
    data.push(b'\n');
    fs.write_file(&path, &data, Some(INSTALL_ORIGIN))
}

// Dependency maps occasionally carry non-string values in the wild; keep the
// string entries instead of rejecting the whole manifest.
pub(crate) fn string_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Object(map) = raw else {
        return Ok(BTreeMap::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::String(s) => Some((k, s)),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exports_shapes_once() {
        let m = Manifest::parse(br#"{"name":"a","version":"1.0.0","exports":"./index.js"}"#).unwrap();
        assert_eq!(m.exports, Some(Exports::Path("./index.js".into())));

        let m = Manifest::parse(
            br#"{"name":"a","version":"1.0.0","exports":{".":{"import":"./a.mjs","require":["./a.cjs","./b.cjs"]},"./x":null}}"#,
        )
        .unwrap();
        let Some(Exports::Map(root)) = m.exports else { panic!("expected map") };
        let Some(Exports::Map(conds)) = root.get(".") else { panic!("expected conditions") };
        assert_eq!(conds.get("import"), Some(&Exports::Path("./a.mjs".into())));
        assert!(matches!(conds.get("require"), Some(Exports::List(l)) if l.len() == 2));
        assert_eq!(root.get("./x"), Some(&Exports::Blocked(())));
    }

    #[test]
    fn browser_field_accepts_path_or_map() {
        let m = Manifest::parse(br#"{"browser":{"fs":false,"./a.js":"./b.js"}}"#).unwrap();
        let Some(Browser::Map(map)) = &m.browser else { panic!("expected map") };
        assert_eq!(map.get("fs"), Some(&BrowserTarget::Disabled(false)));
        assert!(!m.is_installable());
    }

    #[test]
    fn recording_keeps_unknown_fields() {
        use crate::fsutil::StdFs;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{"name":"app","scripts":{"test":"node t.js"},"dependencies":{"a":"^1.0.0"}}"#,
        )
        .unwrap();
        let added = BTreeMap::from([("b".to_string(), "^2.1.0".to_string())]);

        record_dependencies(&StdFs, dir.path(), &added, false).unwrap();
        record_dependencies(&StdFs, dir.path(), &added, true).unwrap();

        let doc: Value = serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(doc["scripts"]["test"], "node t.js");
        assert_eq!(doc["dependencies"]["a"], "^1.0.0");
        assert_eq!(doc["dependencies"]["b"], "^2.1.0");
        assert_eq!(doc["devDependencies"]["b"], "^2.1.0");
    }

    #[test]
    fn recording_creates_missing_manifest() {
        use crate::fsutil::StdFs;

        let dir = tempfile::tempdir().unwrap();
        let added = BTreeMap::from([("tool".to_string(), "github:org/tool".to_string())]);
        record_dependencies(&StdFs, dir.path(), &added, false).unwrap();

        let m = read_in(&StdFs, dir.path()).unwrap().unwrap();
        assert_eq!(m.dependencies, added);
        assert!(!m.is_installable());
    }

    #[test]
    fn non_string_dependencies_are_skipped() {
        let m = Manifest::parse(br#"{"name":"a","version":"1.0.0","dependencies":{"b":"^1.0.0","c":{"x":1}}}"#)
            .unwrap();
        assert_eq!(m.dependencies.len(), 1);
        assert_eq!(m.dependencies["b"], "^1.0.0");
        assert!(m.is_installable());
    }
}
