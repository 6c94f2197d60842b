//! Platform identity and per-package platform constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::hash::{Digest, Fingerprint};

/// The platform a configuration run targets.
///
/// `tags` are ordered from most general to most specific (`unix`, `linux`,
/// `linux-x86_64`); the order decides search-root specificity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    pub tags: Vec<String>,
}

impl Platform {
    pub fn new(id: impl Into<String>, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut seen = Vec::new();
        for tag in tags {
            let tag = tag.into();
            if !seen.contains(&tag) {
                seen.push(tag);
            }
        }
        Platform {
            id: id.into(),
            tags: seen,
        }
    }

    /// Detect the host platform.
    pub fn host() -> Self {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let id = format!("{}-{}", os, arch);

        let tags: Vec<String> = match os {
            "linux" => vec!["unix".into(), "linux".into()],
            "macos" => vec!["unix".into(), "apple".into(), "macos".into()],
            "ios" => vec!["unix".into(), "apple".into(), "ios".into()],
            "android" => vec!["unix".into(), "linux".into(), "android".into()],
            "freebsd" | "openbsd" | "netbsd" => vec!["unix".into(), "bsd".into(), os.into()],
            "windows" => vec!["windows".into()],
            other => vec![other.to_string()],
        };

        Platform::new(id, tags)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Digest of the platform identity, used to key cached platform checks.
    pub fn fingerprint(&self) -> Digest {
        let mut fp = Fingerprint::with_domain("platform");
        fp.update_str(&self.id)
            .update_list(self.tags.iter().map(String::as_str));
        fp.finish()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.tags.join(", "))
    }
}

/// Platform constraints declared by a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PlatformConstraints {
    /// Allow-list of platform ids
    pub platforms: Option<Vec<String>>,
    /// Deny-list of platform ids
    pub exclude_platforms: Vec<String>,
    /// Allow-list of tags; at least one must match
    pub tags: Option<Vec<String>>,
    /// Deny-list of tags; none may match
    pub exclude_tags: Vec<String>,
    /// Every one of these tags must be present
    pub requires_tags: Vec<String>,
}

/// The first platform check a package failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformMismatch {
    ExcludedPlatform { platform: String },
    ExcludedTag { tag: String },
    PlatformNotAllowed { platform: String, allowed: Vec<String> },
    NoAllowedTag { current: Vec<String>, allowed: Vec<String> },
    MissingRequiredTag { tag: String, current: Vec<String> },
}

impl fmt::Display for PlatformMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformMismatch::ExcludedPlatform { platform } => {
                write!(f, "platform `{}` is explicitly excluded", platform)
            }
            PlatformMismatch::ExcludedTag { tag } => {
                write!(f, "platform tag `{}` is explicitly excluded", tag)
            }
            PlatformMismatch::PlatformNotAllowed { platform, allowed } => write!(
                f,
                "platform `{}` is not in the allowed platforms [{}]",
                platform,
                allowed.join(", ")
            ),
            PlatformMismatch::NoAllowedTag { current, allowed } => write!(
                f,
                "none of the current tags [{}] is in the allowed tags [{}]",
                current.join(", "),
                allowed.join(", ")
            ),
            PlatformMismatch::MissingRequiredTag { tag, current } => write!(
                f,
                "required tag `{}` is not among the current tags [{}]",
                tag,
                current.join(", ")
            ),
        }
    }
}

impl PlatformConstraints {
    /// Check every constraint against `platform`, reporting the first failure.
    pub fn check(&self, platform: &Platform) -> Result<(), PlatformMismatch> {
        if self.exclude_platforms.iter().any(|p| *p == platform.id) {
            return Err(PlatformMismatch::ExcludedPlatform {
                platform: platform.id.clone(),
            });
        }

        // The platform deny-list also applies to tags so `exclude-platforms = ["windows"]`
        // works against a tag as well as an id.
        if let Some(tag) = platform
            .tags
            .iter()
            .find(|t| self.exclude_platforms.contains(t))
        {
            return Err(PlatformMismatch::ExcludedTag { tag: tag.clone() });
        }

        if let Some(allowed) = &self.platforms {
            if !allowed.iter().any(|p| *p == platform.id) {
                return Err(PlatformMismatch::PlatformNotAllowed {
                    platform: platform.id.clone(),
                    allowed: allowed.clone(),
                });
            }
        }

        if let Some(allowed) = &self.tags {
            if !platform.tags.iter().any(|t| allowed.contains(t)) {
                return Err(PlatformMismatch::NoAllowedTag {
                    current: platform.tags.clone(),
                    allowed: allowed.clone(),
                });
            }
        }

        if let Some(tag) = platform
            .tags
            .iter()
            .find(|t| self.exclude_tags.contains(t))
        {
            return Err(PlatformMismatch::ExcludedTag { tag: tag.clone() });
        }

        if let Some(tag) = self.requires_tags.iter().find(|t| !platform.has_tag(t)) {
            return Err(PlatformMismatch::MissingRequiredTag {
                tag: tag.clone(),
                current: platform.tags.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> Platform {
        Platform::new("linux-x86_64", ["unix", "linux"])
    }

    #[test]
    fn test_unconstrained_package_passes() {
        assert!(PlatformConstraints::default().check(&linux()).is_ok());
    }

    #[test]
    fn test_platform_allow_list() {
        let constraints = PlatformConstraints {
            platforms: Some(vec!["windows-x86_64".into()]),
            ..Default::default()
        };
        assert!(matches!(
            constraints.check(&linux()),
            Err(PlatformMismatch::PlatformNotAllowed { .. })
        ));
    }

    #[test]
    fn test_tag_allow_list_needs_one_match() {
        let constraints = PlatformConstraints {
            tags: Some(vec!["apple".into(), "linux".into()]),
            ..Default::default()
        };
        assert!(constraints.check(&linux()).is_ok());

        let constraints = PlatformConstraints {
            tags: Some(vec!["apple".into()]),
            ..Default::default()
        };
        assert!(matches!(
            constraints.check(&linux()),
            Err(PlatformMismatch::NoAllowedTag { .. })
        ));
    }

    #[test]
    fn test_deny_lists() {
        let by_tag = PlatformConstraints {
            exclude_tags: vec!["unix".into()],
            ..Default::default()
        };
        assert_eq!(
            by_tag.check(&linux()),
            Err(PlatformMismatch::ExcludedTag { tag: "unix".into() })
        );

        let by_id = PlatformConstraints {
            exclude_platforms: vec!["linux-x86_64".into()],
            ..Default::default()
        };
        assert!(matches!(
            by_id.check(&linux()),
            Err(PlatformMismatch::ExcludedPlatform { .. })
        ));

        let id_list_hits_tag = PlatformConstraints {
            exclude_platforms: vec!["linux".into()],
            ..Default::default()
        };
        assert!(matches!(
            id_list_hits_tag.check(&linux()),
            Err(PlatformMismatch::ExcludedTag { .. })
        ));
    }

    #[test]
    fn test_requires_all_tags() {
        let constraints = PlatformConstraints {
            requires_tags: vec!["unix".into(), "cuda".into()],
            ..Default::default()
        };
        let err = constraints.check(&linux()).unwrap_err();
        assert_eq!(
            err,
            PlatformMismatch::MissingRequiredTag {
                tag: "cuda".into(),
                current: vec!["unix".into(), "linux".into()],
            }
        );
        assert!(err.to_string().contains("`cuda`"));
    }

    #[test]
    fn test_platform_tags_are_deduplicated_in_order() {
        let platform = Platform::new("x", ["unix", "linux", "unix"]);
        assert_eq!(platform.tags, vec!["unix", "linux"]);
    }

    #[test]
    fn test_host_platform_has_tags() {
        let host = Platform::host();
        assert!(!host.id.is_empty());
        assert!(!host.tags.is_empty());
    }
}
