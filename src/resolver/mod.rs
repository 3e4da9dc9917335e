use crate::error::InstallError;
use crate::fetch::{NpmMetadata, Registry};
use anyhow::{anyhow, Result};
use semver::{Version, VersionReq};
use std::str::FromStr;
use tracing::debug;

pub mod spec;

pub use spec::{ModuleSpecifier, PackageSpec};

/// An npm range: one or more `||`-separated comparator sets.
#[derive(Debug, Clone)]
pub struct RangeSet {
    reqs: Vec<VersionReq>,
}

impl RangeSet {
    pub fn parse(range: &str) -> Result<Self> {
        let mut reqs = Vec::new();
        for part in range.split("||").map(str::trim) {
            if part.is_empty() && range.contains("||") {
                continue;
            }
            let norm = canonicalize_npm_range(part);
            let req = if norm == "*" {
                VersionReq::STAR
            } else {
                VersionReq::from_str(&norm).map_err(|e| {
                    anyhow!("invalid semver range '{}' (orig '{}'): {}", norm, part, e)
                })?
            };
            reqs.push(req);
        }
        if reqs.is_empty() {
            return Err(anyhow!("empty OR range '{}'", range));
        }
        Ok(Self { reqs })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.reqs.iter().any(|r| r.matches(version))
    }
}

/// Highest version in `candidates` satisfying `range`.
pub fn pick_version<'a, I>(candidates: I, range: &str) -> Result<Version>
where
    I: IntoIterator<Item = &'a Version>,
{
    let set = RangeSet::parse(range)?;
    let mut sorted: Vec<&Version> = candidates.into_iter().collect();
    sorted.sort_by(|a, b| b.cmp(a)); // descending
    sorted
        .into_iter()
        .find(|v| set.matches(v))
        .cloned()
        .ok_or_else(|| anyhow!("no version matches range {}", range))
}

/// Apply dist-tags, then pick the highest listed version satisfying the range.
pub fn select_version(meta: &NpmMetadata, range_or_tag: &str) -> Result<Version> {
    let requested = range_or_tag.trim();
    let effective = meta.dist_tags.get(requested).map(String::as_str).unwrap_or(requested);
    let available: Vec<Version> =
        meta.versions.keys().filter_map(|v| Version::parse(v).ok()).collect();
    pick_version(&available, effective)
}

/// Resolves `(name, range-or-tag)` against the registry.
pub struct VersionResolver<'a> {
    registry: &'a dyn Registry,
}

impl<'a> VersionResolver<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self { registry }
    }

    /// Registry and payload failures surface as [`InstallError::NotFound`].
    pub fn resolve(&self, name: &str, range_or_tag: &str) -> Result<Version, InstallError> {
        let meta = self
            .registry
            .package_metadata(name)
            .map_err(|e| InstallError::not_found(name, range_or_tag, format!("{e:#}")))?;
        let version = select_version(&meta, range_or_tag)
            .map_err(|e| InstallError::not_found(name, range_or_tag, e))?;
        debug!(name, range = range_or_tag, %version, "resolved");
        Ok(version)
    }
}

pub fn canonicalize_npm_range(input: &str) -> String {
    let s = input.trim();
    if s.is_empty() || s == "*" || s == "latest" || s.eq_ignore_ascii_case("x") {
        return "*".into();
    }

    // Full semver (including prerelease/build) means an exact pin.
    if Version::parse(s.trim_start_matches(['v', '='])).is_ok() {
        return format!("={}", s.trim_start_matches(['v', '=']));
    }

    // "1.2.3 - 2.3.4" => ">=1.2.3, <=2.3.4"
    if let Some((left, right)) = s.split_once(" - ") {
        let (left, right) = (left.trim(), right.trim());
        if is_version_like(left) && is_version_like(right) {
            return format!(">={left}, <={right}");
        }
    }

    let tokens: Vec<&str> = s.split_whitespace().collect();
    if tokens.len() > 1 {
        let mut comps: Vec<String> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let t = tokens[i];
            if is_op(t) {
                let Some(ver) = tokens.get(i + 1) else {
                    // dangling operator
                    return s.to_string();
                };
                comps.push(format!("{t}{ver}"));
                i += 2;
                continue;
            }
            if !is_version_like(t) && !t.starts_with(|c: char| "<>=^~".contains(c)) {
                return s.to_string();
            }
            comps.push(expand_partial(t));
            i += 1;
        }
        return comps.join(", ");
    }

    expand_partial(s)
}

/// Bare majors, `major.minor` and wildcards become explicit ranges.
fn expand_partial(t: &str) -> String {
    if is_numeric(t) {
        return format!("^{t}.0.0");
    }
    let parts: Vec<&str> = t.split('.').collect();
    let wild = |p: &str| p.eq_ignore_ascii_case("x") || p == "*";
    match parts.as_slice() {
        [maj, min] if is_numeric(maj) && wild(min) => {
            let maj: u64 = maj.parse().unwrap_or_default();
            format!(">={maj}.0.0, <{}.0.0", maj + 1)
        }
        [maj, min, patch] if is_numeric(maj) && is_numeric(min) && wild(patch) => {
            let min_i: u64 = min.parse().unwrap_or_default();
            format!(">={maj}.{min}.0, <{maj}.{}.0", min_i + 1)
        }
        [maj, min] if is_numeric(maj) && is_numeric(min) => {
            let min_i: u64 = min.parse().unwrap_or_default();
            format!(">={maj}.{min}.0, <{maj}.{}.0", min_i + 1)
        }
        _ => t.to_string(),
    }
}

fn is_op(t: &str) -> bool {
    matches!(t, ">" | "<" | ">=" | "<=" | "=" | "^" | "~")
}

fn is_numeric(t: &str) -> bool {
    !t.is_empty() && t.chars().all(|c| c.is_ascii_digit())
}

fn is_version_like(t: &str) -> bool {
    let mut has_digit = false;
    for c in t.chars() {
        if c.is_ascii_digit() {
            has_digit = true;
            continue;
        }
        if !matches!(c, '.' | '-' | '+' | 'x' | 'X' | '*' | 'a'..='z' | 'A'..='Z') {
            return false;
        }
    }
    has_digit
}
