//! Trusted URL prefixes.
//!
//! Prefixes are literal strings compared with `starts_with`. Nothing in a
//! prefix is interpreted as a pattern, so `https://a.b/` never matches
//! `https://axb/`.

/// True iff `url` begins with one of `prefixes`.
pub fn is_trusted<S: AsRef<str>>(url: &str, prefixes: &[S]) -> bool {
    prefixes
        .iter()
        .map(AsRef::as_ref)
        .any(|prefix| !prefix.is_empty() && url.starts_with(prefix))
}

/// The ordered allow-list of remote URL prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustPolicy {
    prefixes: Vec<String>,
}

impl TrustPolicy {
    /// Build a policy. Blank entries are dropped and duplicates removed
    /// keeping the first occurrence.
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut out: Vec<String> = Vec::new();
        for prefix in prefixes {
            let prefix = prefix.into().trim().to_string();
            if !prefix.is_empty() && !out.contains(&prefix) {
                out.push(prefix);
            }
        }
        TrustPolicy { prefixes: out }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn is_trusted(&self, url: &str) -> bool {
        is_trusted(url, &self.prefixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match() {
        let prefixes = ["https://github.com/org/"];
        assert!(is_trusted("https://github.com/org/m.git", &prefixes));
        assert!(!is_trusted("https://github.com/other/m.git", &prefixes));
        assert!(!is_trusted("https://github.com/org", &prefixes));
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(!is_trusted("https://axb/repo.git", &["https://a.b/"]));
        assert!(is_trusted("https://a.b/repo.git", &["https://a.b/"]));
        assert!(!is_trusted("https://github.com/org/x", &["https://github.com/.*"]));
        assert!(is_trusted("git@host:[x]+/r", &["git@host:[x]+/"]));
    }

    #[test]
    fn test_suffix_never_changes_trust() {
        let prefixes = ["https://git.example.com/sdk/", "ssh://git@example.com/"];
        for base in ["https://git.example.com/sdk/", "https://git.example.com/other/"] {
            let trusted = is_trusted(base, &prefixes);
            for suffix in ["", "a", "a/b.git", "../../evil", "?x=1"] {
                let url = format!("{}{}", base, suffix);
                assert_eq!(is_trusted(&url, &prefixes), trusted, "{url}");
            }
        }
    }

    #[test]
    fn test_empty_prefixes_trust_nothing() {
        let none: [&str; 0] = [];
        assert!(!is_trusted("https://github.com/org/m.git", &none));
        assert!(!is_trusted("https://github.com/org/m.git", &[""]));

        let policy = TrustPolicy::new(["", "  "]);
        assert!(policy.is_empty());
        assert!(!policy.is_trusted("anything"));
    }

    #[test]
    fn test_policy_dedups_in_order() {
        let policy = TrustPolicy::new(["https://b/", "https://a/", "https://b/"]);
        assert_eq!(policy.prefixes(), &["https://b/", "https://a/"]);
        assert!(policy.is_trusted("https://a/x"));
    }
}
