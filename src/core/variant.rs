//! Build variants and ABI compatibility groups.
//!
//! Variants in the same group share calling convention, runtime linkage and
//! memory layout, so a `profiling` build may consume a `release` artifact.
//! Linking across groups is never allowed.

use std::collections::{BTreeMap, BTreeSet};

pub const RELEASE_VARIANT: &str = "release";
pub const DEBUG_VARIANT: &str = "debug";

pub const RELEASE_GROUP: &str = "RELEASE";
pub const DEBUG_GROUP: &str = "DEBUG";

/// Group assigned to variants nobody registered. Never compatible with anything.
pub const UNKNOWN_GROUP: &str = "UNKNOWN";

/// Normalize a variant name. The empty name is `release`.
pub fn normalize_variant(name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        RELEASE_VARIANT.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

fn normalize_group(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

/// Registry of variant names and the ABI group each belongs to.
#[derive(Debug, Clone)]
pub struct VariantRegistry {
    abi_groups: BTreeMap<String, BTreeSet<String>>,
    variant_to_group: BTreeMap<String, String>,
    descriptions: BTreeMap<String, String>,
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VariantRegistry {
    /// Registry holding the built-in groups only.
    pub fn new() -> Self {
        let mut registry = VariantRegistry {
            abi_groups: BTreeMap::new(),
            variant_to_group: BTreeMap::new(),
            descriptions: BTreeMap::new(),
        };

        for (name, group, description) in [
            ("release", RELEASE_GROUP, "optimized build"),
            ("profiling", RELEASE_GROUP, "optimized build with profiling hooks"),
            ("debug", DEBUG_GROUP, "unoptimized build with debug info"),
            ("asan", DEBUG_GROUP, "debug build with AddressSanitizer"),
        ] {
            registry.insert(name.to_string(), group.to_string(), Some(description.to_string()));
        }
        registry
    }

    fn insert(&mut self, name: String, group: String, description: Option<String>) {
        if let Some(previous) = self.variant_to_group.get(&name) {
            if let Some(members) = self.abi_groups.get_mut(previous) {
                members.remove(&name);
            }
        }
        self.abi_groups
            .entry(group.clone())
            .or_default()
            .insert(name.clone());
        if let Some(description) = description {
            self.descriptions.insert(name.clone(), description);
        }
        self.variant_to_group.insert(name, group);
    }

    /// Register a custom variant.
    ///
    /// Returns the previous group when the name was already registered to a
    /// different one; the new registration wins.
    pub fn register_custom_variant(
        &mut self,
        name: &str,
        group: &str,
        description: Option<&str>,
    ) -> Option<String> {
        let name = normalize_variant(name);
        let group = normalize_group(group);

        let previous = self
            .variant_to_group
            .get(&name)
            .filter(|g| **g != group)
            .cloned();

        if let Some(ref old) = previous {
            tracing::warn!(
                "variant `{}` re-registered from ABI group {} to {}",
                name,
                old,
                group
            );
        } else {
            tracing::debug!("registered variant `{}` in ABI group {}", name, group);
        }

        self.insert(name, group, description.map(str::to_string));
        previous
    }

    pub fn is_known(&self, variant: &str) -> bool {
        self.variant_to_group
            .contains_key(&normalize_variant(variant))
    }

    /// ABI group of a variant, or [`UNKNOWN_GROUP`].
    pub fn abi_group_of(&self, variant: &str) -> &str {
        let variant = normalize_variant(variant);
        match self.variant_to_group.get(&variant) {
            Some(group) => group,
            None => {
                tracing::warn!("unknown variant `{}`", variant);
                UNKNOWN_GROUP
            }
        }
    }

    /// True iff both variants belong to the same known group.
    pub fn are_compatible(&self, a: &str, b: &str) -> bool {
        let ga = self.variant_to_group.get(&normalize_variant(a));
        let gb = self.variant_to_group.get(&normalize_variant(b));
        matches!((ga, gb), (Some(x), Some(y)) if x == y)
    }

    /// Pick the variant to import an artifact from.
    ///
    /// `release` for RELEASE and `debug` for DEBUG when available, otherwise
    /// the first member of the group present in `available`.
    pub fn fallback_variant(&self, group: &str, available: &[String]) -> Option<String> {
        let group = normalize_group(group);
        let available: Vec<String> = available.iter().map(|v| normalize_variant(v)).collect();
        let has = |v: &str| available.iter().any(|a| a == v);

        if group == RELEASE_GROUP && has(RELEASE_VARIANT) {
            return Some(RELEASE_VARIANT.to_string());
        }
        if group == DEBUG_GROUP && has(DEBUG_VARIANT) {
            return Some(DEBUG_VARIANT.to_string());
        }

        let members = self.abi_groups.get(&group)?;
        available.into_iter().find(|v| members.contains(v))
    }

    pub fn description(&self, variant: &str) -> Option<&str> {
        self.descriptions
            .get(&normalize_variant(variant))
            .map(String::as_str)
    }

    /// Groups and their members, for listing.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.abi_groups
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(g, m)| (g.as_str(), m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_builtin_groups() {
        let registry = VariantRegistry::new();
        assert_eq!(registry.abi_group_of("release"), RELEASE_GROUP);
        assert_eq!(registry.abi_group_of("profiling"), RELEASE_GROUP);
        assert_eq!(registry.abi_group_of("asan"), DEBUG_GROUP);
        assert_eq!(registry.abi_group_of(""), RELEASE_GROUP);
        assert_eq!(registry.abi_group_of("tsan"), UNKNOWN_GROUP);
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        let mut registry = VariantRegistry::new();
        registry.register_custom_variant("tsan", "DEBUG", None);

        let all = ["release", "profiling", "debug", "asan", "tsan", "bogus", ""];
        for a in all {
            for b in all {
                assert_eq!(
                    registry.are_compatible(a, b),
                    registry.are_compatible(b, a),
                    "{a} / {b}"
                );
            }
        }
        assert!(registry.are_compatible("profiling", "release"));
        assert!(registry.are_compatible("tsan", "asan"));
        assert!(!registry.are_compatible("release", "debug"));
    }

    #[test]
    fn test_unknown_is_never_compatible() {
        let registry = VariantRegistry::new();
        assert!(registry.are_compatible("debug", "debug"));
        assert!(!registry.are_compatible("bogus", "bogus"));
        assert!(!registry.are_compatible("bogus", "release"));
    }

    #[test]
    fn test_reregistration_last_write_wins() {
        let mut registry = VariantRegistry::new();
        assert_eq!(registry.register_custom_variant("fast", "RELEASE", None), None);
        assert_eq!(
            registry.register_custom_variant("fast", "debug", Some("moved")),
            Some(RELEASE_GROUP.to_string())
        );
        assert_eq!(registry.abi_group_of("fast"), DEBUG_GROUP);

        let release: Vec<_> = registry
            .groups()
            .find(|(g, _)| *g == RELEASE_GROUP)
            .map(|(_, m)| m.iter().cloned().collect())
            .unwrap();
        assert!(!release.contains(&"fast".to_string()));
        assert_eq!(registry.description("fast"), Some("moved"));
    }

    #[test]
    fn test_fallback_priority() {
        let registry = VariantRegistry::new();
        assert_eq!(
            registry.fallback_variant("RELEASE", &names(&["debug", "release"])),
            Some("release".into())
        );
        assert_eq!(
            registry.fallback_variant("DEBUG", &names(&["asan", "debug"])),
            Some("debug".into())
        );
        assert_eq!(
            registry.fallback_variant("RELEASE", &names(&["debug", "profiling"])),
            Some("profiling".into())
        );
        assert_eq!(registry.fallback_variant("DEBUG", &names(&["release"])), None);
        assert_eq!(registry.fallback_variant("UNKNOWN", &names(&["release"])), None);
    }
}
