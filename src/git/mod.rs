use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// How a git reference behaves on re-install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Default,
    Branch,
    Tag,
    Commit,
}

impl RefType {
    /// Default branch and named branches move; tags and commits are immutable.
    pub fn is_tracking(self) -> bool {
        matches!(self, RefType::Default | RefType::Branch)
    }

    fn from_selector(selector: &str) -> Option<Self> {
        match selector {
            "branch" | "head" => Some(RefType::Branch),
            "tag" => Some(RefType::Tag),
            "commit" => Some(RefType::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RefType::Default => "default",
            RefType::Branch => "branch",
            RefType::Tag => "tag",
            RefType::Commit => "commit",
        })
    }
}

/// A git dependency: clone URL plus optional ref.
///
/// Accepted forms: `host:org/repo`, `github:org/repo`,
/// `scheme://host[:port]/org/repo`, `git+https://...`, `git@host:org/repo`,
/// each optionally followed by `#ref` or `#branch=|tag=|commit=ref`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GitUrl {
    pub url: String,
    pub reference: Option<String>,
    /// Only set when the fragment names the type explicitly.
    pub ref_type: Option<RefType>,
}

impl GitUrl {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.contains(char::is_whitespace) || trimmed.starts_with('@') {
            return None;
        }
        let (location, fragment) = match trimmed.split_once('#') {
            Some((lhs, rhs)) => (lhs, Some(rhs)),
            None => (trimmed, None),
        };
        let location = location.strip_prefix("git+").unwrap_or(location);

        let url = if let Some((scheme, rest)) = location.split_once("://") {
            if scheme.is_empty() || !has_repo_path(rest.split_once('/')?.1) {
                return None;
            }
            location.to_string()
        } else if let Some(rest) = location.strip_prefix("git@") {
            let (_, path) = rest.split_once(':')?;
            if !has_repo_path(path) {
                return None;
            }
            location.to_string()
        } else if let Some((host, path)) = location.split_once(':') {
            let host = match host {
                "github" => "github.com",
                "gitlab" => "gitlab.com",
                "bitbucket" => "bitbucket.org",
                h if h.contains('.') && !h.contains('/') => h,
                _ => return None,
            };
            if !has_repo_path(path) {
                return None;
            }
            format!("https://{host}/{}", path.trim_start_matches('/'))
        } else {
            return None;
        };

        let (reference, ref_type) = parse_fragment(fragment);
        Some(Self { url, reference, ref_type })
    }

    /// Like [`GitUrl::parse`], also accepting the `org/repo` GitHub shorthand
    /// that is only meaningful as a dependency value.
    pub fn parse_dependency(raw: &str) -> Option<Self> {
        if let Some(git) = Self::parse(raw) {
            return Some(git);
        }
        let trimmed = raw.trim();
        let (location, fragment) = match trimmed.split_once('#') {
            Some((lhs, rhs)) => (lhs, Some(rhs)),
            None => (trimmed, None),
        };
        if location.starts_with(['@', '.', '/'])
            || location.contains([':', ' '])
            || location.split('/').count() != 2
            || !has_repo_path(location)
        {
            return None;
        }
        let (reference, ref_type) = parse_fragment(fragment);
        Some(Self { url: format!("https://github.com/{location}"), reference, ref_type })
    }

    pub fn reference(&self) -> &str {
        self.reference.as_deref().unwrap_or_default()
    }

    /// Type hint handed to the checkout; unspecified means default branch.
    pub fn preferred_type(&self) -> RefType {
        self.ref_type.unwrap_or(RefType::Default)
    }

    /// Repository name, used until the checked out manifest names the package.
    pub fn repo_name(&self) -> &str {
        let path = self.url.trim_end_matches('/');
        let last = path.rsplit(['/', ':']).next().unwrap_or(path);
        last.strip_suffix(".git").unwrap_or(last)
    }
}

fn has_repo_path(path: &str) -> bool {
    let mut parts = path.trim_start_matches('/').split('/');
    matches!((parts.next(), parts.next()), (Some(org), Some(repo)) if !org.is_empty() && !repo.is_empty())
}

fn parse_fragment(fragment: Option<&str>) -> (Option<String>, Option<RefType>) {
    let Some(fragment) = fragment.map(str::trim).filter(|f| !f.is_empty()) else {
        return (None, None);
    };
    if let Some((selector, value)) = fragment.split_once('=') {
        if let Some(ref_type) = RefType::from_selector(selector) {
            return (Some(value.to_string()), Some(ref_type));
        }
    }
    (Some(fragment.to_string()), None)
}

/// Git transport used for git-sourced packages.
pub trait Git: Send + Sync {
    /// Clone `url` into `dest`, which must be empty or missing.
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
    /// Fast-forward the checked out branch.
    fn pull(&self, dir: &Path, editor_or_project_context: bool, project_id: &str) -> Result<()>;
    /// Check out `reference`, trying `preferred` first; returns the type the
    /// reference actually resolved as.
    fn checkout_ref(&self, dir: &Path, reference: &str, preferred: RefType) -> Result<RefType>;
    fn is_on_ref(&self, dir: &Path, reference: &str, ref_type: RefType) -> Result<bool>;
}

/// [`Git`] backed by the `git` executable.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandGit;

impl CommandGit {
    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.arg("-C").arg(dir);
        }
        let output = cmd
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn verifies(&self, dir: &Path, rev: &str) -> bool {
        self.run(Some(dir), &["rev-parse", "--verify", "--quiet", rev]).is_ok()
    }

    fn default_branch(&self, dir: &Path) -> Option<String> {
        let head = self
            .run(Some(dir), &["symbolic-ref", "--short", "refs/remotes/origin/HEAD"])
            .ok()?;
        Some(head.trim_start_matches("origin/").to_string())
    }

    fn current_branch(&self, dir: &Path) -> Option<String> {
        self.run(Some(dir), &["symbolic-ref", "--short", "-q", "HEAD"]).ok()
    }

    fn try_checkout(&self, dir: &Path, reference: &str, ref_type: RefType) -> Result<bool> {
        match ref_type {
            RefType::Default => {
                if !reference.is_empty() && self.default_branch(dir).as_deref() != Some(reference) {
                    return Ok(false);
                }
                let Some(branch) = self.default_branch(dir) else { return Ok(false) };
                self.run(Some(dir), &["checkout", &branch])?;
            }
            RefType::Branch => {
                if !self.verifies(dir, &format!("refs/remotes/origin/{reference}")) {
                    return Ok(false);
                }
                let upstream = format!("origin/{reference}");
                self.run(Some(dir), &["checkout", "-B", reference, "--track", &upstream])?;
            }
            RefType::Tag => {
                let tag = format!("refs/tags/{reference}");
                if !self.verifies(dir, &tag) {
                    return Ok(false);
                }
                self.run(Some(dir), &["checkout", "--detach", &tag])?;
            }
            RefType::Commit => {
                if !self.verifies(dir, &format!("{reference}^{{commit}}")) {
                    return Ok(false);
                }
                self.run(Some(dir), &["checkout", "--detach", reference])?;
            }
        }
        Ok(true)
    }
}

impl Git for CommandGit {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        self.run(None, &["clone", "--quiet", url, &dest_str])?;
        Ok(())
    }

    fn pull(&self, dir: &Path, editor_or_project_context: bool, project_id: &str) -> Result<()> {
        debug!(dir = %dir.display(), editor_or_project_context, project_id, "git pull");
        self.run(Some(dir), &["pull", "--ff-only", "--quiet"])?;
        Ok(())
    }

    fn checkout_ref(&self, dir: &Path, reference: &str, preferred: RefType) -> Result<RefType> {
        if reference.is_empty() {
            return Ok(RefType::Default);
        }
        let mut order = vec![preferred];
        for candidate in [RefType::Default, RefType::Branch, RefType::Tag, RefType::Commit] {
            if !order.contains(&candidate) {
                order.push(candidate);
            }
        }
        for ref_type in order {
            if self.try_checkout(dir, reference, ref_type)? {
                return Ok(ref_type);
            }
        }
        bail!("ref '{reference}' not found in {}", dir.display())
    }

    fn is_on_ref(&self, dir: &Path, reference: &str, ref_type: RefType) -> Result<bool> {
        if !dir.join(".git").exists() {
            return Ok(false);
        }
        let on = match ref_type {
            RefType::Default => {
                let current = self.current_branch(dir);
                current.is_some() && current == self.default_branch(dir)
            }
            RefType::Branch => self.current_branch(dir).as_deref() == Some(reference),
            RefType::Tag => {
                let head = self.run(Some(dir), &["rev-parse", "HEAD"])?;
                let tag = self.run(Some(dir), &["rev-parse", &format!("refs/tags/{reference}^{{commit}}")]);
                tag.is_ok_and(|t| t == head)
            }
            RefType::Commit => {
                let head = self.run(Some(dir), &["rev-parse", "HEAD"])?;
                !reference.is_empty() && head.starts_with(reference)
            }
        };
        Ok(on)
    }
}
