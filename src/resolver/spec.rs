use crate::git::GitUrl;

/// A module specifier split into its package name, requested range and the
/// sub-path left for module resolution.
///
/// ```text
///  name         range  sub_path
///   ⌄             ⌄       ⌄
/// @scope/pkg  @  ^1.2  /sub/path
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpecifier {
    pub name: String,
    pub range: String,
    pub sub_path: String,
}

impl ModuleSpecifier {
    /// Never fails; a missing or empty `@version` defaults to `latest`.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let scoped = trimmed.starts_with('@');
        let segments: Vec<&str> = trimmed.split('/').collect();
        let name_len = (if scoped { 2 } else { 1 }).min(segments.len());

        let mut name_parts: Vec<&str> = segments[..name_len].to_vec();
        let mut range = "";
        if let Some(last) = name_parts.last_mut() {
            // Skip the scope's own leading '@' when it is also the last name segment.
            let segment: &str = *last;
            let search_from = usize::from(scoped && name_len == 1);
            if let Some(at) = segment[search_from..].find('@').map(|i| i + search_from) {
                range = &segment[at + 1..];
                *last = &segment[..at];
            }
        }

        let sub_path = if segments.len() > name_len {
            format!("/{}", segments[name_len..].join("/"))
        } else {
            String::new()
        };
        let range = range.trim();

        Self {
            name: name_parts.join("/"),
            range: if range.is_empty() { "latest".into() } else { range.to_string() },
            sub_path,
        }
    }

    /// `name` plus `sub_path`, the form a bundler imports by.
    pub fn import_path(&self) -> String {
        format!("{}{}", self.name, self.sub_path)
    }
}

/// Where a dependency's content comes from, decided from its range string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSpec {
    Registry { range: String },
    Git(GitUrl),
    /// Tarball URLs, aliases and local protocols (`file:`, `link:`, ...).
    Unsupported { raw: String },
}

impl PackageSpec {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if ["file:", "link:", "workspace:", "portal:", "patch:", "npm:"]
            .iter()
            .any(|p| trimmed.starts_with(p))
            || is_tarball_url(trimmed)
        {
            return PackageSpec::Unsupported { raw: trimmed.to_string() };
        }

        if let Some(git) = GitUrl::parse_dependency(trimmed) {
            return PackageSpec::Git(git);
        }

        PackageSpec::Registry { range: trimmed.to_string() }
    }
}

fn is_tarball_url(value: &str) -> bool {
    (value.starts_with("http://") || value.starts_with("https://"))
        && [".tgz", ".tar.gz", ".tar"].iter().any(|ext| {
            value.split(['?', '#']).next().unwrap_or(value).ends_with(ext)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::RefType;

    #[test]
    fn parses_scoped_with_range_and_sub_path() {
        let s = ModuleSpecifier::parse("@scope/pkg@^1.2/sub/path");
        assert_eq!(s.name, "@scope/pkg");
        assert_eq!(s.range, "^1.2");
        assert_eq!(s.sub_path, "/sub/path");
        assert_eq!(s.import_path(), "@scope/pkg/sub/path");
    }

    #[test]
    fn parses_plain_names() {
        let s = ModuleSpecifier::parse("pkg@18/file");
        assert_eq!((s.name.as_str(), s.range.as_str(), s.sub_path.as_str()), ("pkg", "18", "/file"));

        let s = ModuleSpecifier::parse("react");
        assert_eq!((s.name.as_str(), s.range.as_str(), s.sub_path.as_str()), ("react", "latest", ""));

        let s = ModuleSpecifier::parse("react/jsx-runtime");
        assert_eq!(s.name, "react");
        assert_eq!(s.sub_path, "/jsx-runtime");
    }

    #[test]
    fn empty_version_defaults_to_latest() {
        assert_eq!(ModuleSpecifier::parse("left-pad@").range, "latest");
        assert_eq!(ModuleSpecifier::parse("@scope/pkg@").range, "latest");
        let bare_scope = ModuleSpecifier::parse("@scope");
        assert_eq!(bare_scope.name, "@scope");
        assert_eq!(bare_scope.range, "latest");
    }

    #[test]
    fn detects_dependency_sources() {
        assert_eq!(PackageSpec::parse("^1.0.0"), PackageSpec::Registry { range: "^1.0.0".into() });
        assert!(matches!(PackageSpec::parse("file:../local"), PackageSpec::Unsupported { .. }));
        assert!(matches!(
            PackageSpec::parse("https://example.com/pkg-1.0.0.tgz"),
            PackageSpec::Unsupported { .. }
        ));

        let PackageSpec::Git(git) = PackageSpec::parse("github.com:org/repo#v1.0.0") else {
            panic!("expected git source");
        };
        assert_eq!(git.url, "https://github.com/org/repo");
        assert_eq!(git.reference.as_deref(), Some("v1.0.0"));
        assert_eq!(git.ref_type, None);

        let PackageSpec::Git(git) = PackageSpec::parse("org/repo#tag=v2") else {
            panic!("expected github shorthand");
        };
        assert_eq!(git.url, "https://github.com/org/repo");
        assert_eq!(git.ref_type, Some(RefType::Tag));
    }
}
