//! Dependency declarations and the edges recorded from them.
//!
//! First-party ("kis") dependencies are other packages of the SDK, identified
//! by exact name. They may carry a remote location (`url` + `tag`); only one
//! declaration in the whole workspace needs to supply it. Third-party
//! dependencies are opaque to the resolver and handed to the build executor
//! as external link names.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Link visibility of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Used by the target and propagated to its consumers
    Public,
    /// Used only by the target itself
    Private,
    /// Propagated to consumers only (header-only / interface targets)
    Interface,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "PUBLIC"),
            Visibility::Private => write!(f, "PRIVATE"),
            Visibility::Interface => write!(f, "INTERFACE"),
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "interface" => Ok(Visibility::Interface),
            other => Err(format!(
                "invalid visibility `{}` (expected public, private or interface)",
                other
            )),
        }
    }
}

/// Build component a dependency is needed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyScope {
    Main,
    Tests,
    Samples,
    Benchmarks,
    /// Matches whenever any component is enabled
    All,
}

impl fmt::Display for DependencyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DependencyScope::Main => "main",
            DependencyScope::Tests => "tests",
            DependencyScope::Samples => "samples",
            DependencyScope::Benchmarks => "benchmarks",
            DependencyScope::All => "all",
        };
        f.write_str(s)
    }
}

impl FromStr for DependencyScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(DependencyScope::Main),
            "tests" | "test" => Ok(DependencyScope::Tests),
            "samples" | "sample" => Ok(DependencyScope::Samples),
            "benchmarks" | "benchmark" | "bench" => Ok(DependencyScope::Benchmarks),
            "all" => Ok(DependencyScope::All),
            other => Err(format!(
                "invalid scope `{}` (expected main, tests, samples, benchmarks or all)",
                other
            )),
        }
    }
}

/// The set of build components enabled for a configuration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledScopes {
    scopes: BTreeSet<DependencyScope>,
}

impl Default for EnabledScopes {
    fn default() -> Self {
        EnabledScopes {
            scopes: BTreeSet::from([DependencyScope::Main]),
        }
    }
}

impl EnabledScopes {
    pub fn new(scopes: impl IntoIterator<Item = DependencyScope>) -> Self {
        EnabledScopes {
            scopes: scopes.into_iter().collect(),
        }
    }

    /// Whether a dependency declared for `declared` participates.
    ///
    /// Empty means `[main]`. `all` on either side matches anything enabled.
    /// Otherwise any overlap matches.
    pub fn matches(&self, declared: &[DependencyScope]) -> bool {
        if self.scopes.is_empty() {
            return false;
        }
        if self.scopes.contains(&DependencyScope::All) {
            return true;
        }
        if declared.is_empty() {
            return self.scopes.contains(&DependencyScope::Main);
        }
        declared
            .iter()
            .any(|s| *s == DependencyScope::All || self.scopes.contains(s))
    }

    pub fn iter(&self) -> impl Iterator<Item = DependencyScope> + '_ {
        self.scopes.iter().copied()
    }
}

/// Where a first-party package can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub url: String,
    /// Tag or ref to check out
    pub tag: String,
}

impl fmt::Display for RemoteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.tag)
    }
}

/// A first-party dependency entry from a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KisDependency {
    pub name: String,
    /// Remote location, when this manifest is the one supplying it
    pub remote: Option<RemoteSpec>,
    pub scope: Vec<DependencyScope>,
    /// Explicit visibility; `None` picks the default for the consumer kind
    pub visibility: Option<Visibility>,
}

impl KisDependency {
    pub fn new(name: impl Into<String>) -> Self {
        KisDependency {
            name: name.into(),
            remote: None,
            scope: Vec::new(),
            visibility: None,
        }
    }

    pub fn with_remote(mut self, url: impl Into<String>, tag: impl Into<String>) -> Self {
        self.remote = Some(RemoteSpec {
            url: url.into(),
            tag: tag.into(),
        });
        self
    }
}

/// A third-party dependency entry from a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThirdPartyDependency {
    pub name: String,
    /// Opaque fetch description handed to the executor (URL, archive, ...)
    pub fetch: Option<String>,
    pub scope: Vec<DependencyScope>,
    pub visibility: Option<Visibility>,
}

impl ThirdPartyDependency {
    pub fn new(name: impl Into<String>) -> Self {
        ThirdPartyDependency {
            name: name.into(),
            fetch: None,
            scope: Vec::new(),
            visibility: None,
        }
    }
}

/// Whether an edge points at a first-party or third-party package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    FirstParty,
    ThirdParty,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::FirstParty => write!(f, "first-party"),
            DependencyKind::ThirdParty => write!(f, "third-party"),
        }
    }
}

/// A declared dependency edge, as recorded in the workspace state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub consumer: String,
    pub dependency: String,
    pub scope: Vec<DependencyScope>,
    pub kind: DependencyKind,
    pub visibility: Option<Visibility>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scope_means_main() {
        let main_only = EnabledScopes::default();
        assert!(main_only.matches(&[]));

        let tests_only = EnabledScopes::new([DependencyScope::Tests]);
        assert!(!tests_only.matches(&[]));
    }

    #[test]
    fn test_scope_or_semantics() {
        let enabled = EnabledScopes::new([DependencyScope::Main, DependencyScope::Samples]);
        assert!(enabled.matches(&[DependencyScope::Tests, DependencyScope::Samples]));
        assert!(!enabled.matches(&[DependencyScope::Tests, DependencyScope::Benchmarks]));
    }

    #[test]
    fn test_all_scope_matches_anything_enabled() {
        let enabled = EnabledScopes::new([DependencyScope::Benchmarks]);
        assert!(enabled.matches(&[DependencyScope::All]));

        let nothing = EnabledScopes::new([]);
        assert!(!nothing.matches(&[DependencyScope::All]));

        let everything = EnabledScopes::new([DependencyScope::All]);
        assert!(everything.matches(&[DependencyScope::Tests]));
    }

    #[test]
    fn test_parse_visibility_and_scope() {
        assert_eq!("PUBLIC".parse::<Visibility>().unwrap(), Visibility::Public);
        assert!("friend".parse::<Visibility>().is_err());
        assert_eq!("bench".parse::<DependencyScope>().unwrap(), DependencyScope::Benchmarks);
        assert_eq!(Visibility::Private.to_string(), "PRIVATE");
    }
}
