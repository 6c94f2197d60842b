//! Two-phase linker.
//!
//! Phase 1 records link intents per target with [`LinkTable::defer_link`];
//! nothing is checked against the target set yet. Phase 2,
//! [`LinkTable::resolve_all`], runs once after every target exists: it applies
//! override substitution, enforces visibility rules and produces the final
//! link records handed to the build executor.
//!
//! Once phase 2 has begun the table is sealed and further `defer_link` calls
//! are rejected with [`LinkError::LinkerSealed`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use miette::Diagnostic as MietteDiagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::core::dependency::{DependencyScope, EnabledScopes, Visibility};
use crate::core::manifest::PackageKind;
use crate::core::workspace::{follow_overrides, WorkspaceState};
use crate::util::diagnostic::{Diagnostic, Warnings};

/// Errors raised by the linker and the import-fallback planner.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum LinkError {
    #[error("cannot defer links for `{target}`: link resolution has already started")]
    #[diagnostic(code(kis::link::sealed))]
    LinkerSealed { target: String },

    #[error("link resolution already ran for this configuration")]
    #[diagnostic(code(kis::link::already_resolved))]
    AlreadyResolved,

    #[error("link target `{}` was never created", missing_name(target, dependency))]
    #[diagnostic(code(kis::link::missing_target))]
    MissingLinkTarget {
        target: String,
        dependency: Option<String>,
    },

    #[error("override cycle: {}", chain.join(" -> "))]
    #[diagnostic(code(kis::link::override_cycle))]
    OverrideCycle { chain: Vec<String> },

    #[error("circular import dependency: {}", cycle.join(" -> "))]
    #[diagnostic(code(kis::link::circular_import))]
    CircularImportDependency { cycle: Vec<String> },

    #[error("imported `{package}` uses base variant `{base_variant}` which is not ABI-compatible with `{variant}`")]
    #[diagnostic(code(kis::link::abi_mismatch))]
    AbiMismatch {
        package: String,
        variant: String,
        base_variant: String,
    },
}

fn missing_name<'a>(target: &'a str, dependency: &'a Option<String>) -> &'a str {
    dependency.as_deref().unwrap_or(target)
}

impl LinkError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            LinkError::LinkerSealed { target } => Diagnostic::error(format!(
                "link intent for `{}` recorded after link resolution started",
                target
            ))
            .with_code("kis::link::sealed")
            .with_context("all targets must be created and their links deferred before resolution")
            .with_suggestion("this is an internal ordering error; please report it"),

            LinkError::AlreadyResolved => Diagnostic::error("link resolution ran twice")
                .with_code("kis::link::already_resolved")
                .with_suggestion("this is an internal ordering error; please report it"),

            LinkError::MissingLinkTarget { target, dependency } => match dependency {
                Some(dep) => Diagnostic::error(format!(
                    "`{}` links against `{}`, which was never created as a target",
                    target, dep
                ))
                .with_code("kis::link::missing_target")
                .with_context("discovery produced a package set that does not contain this dependency")
                .with_suggestion("this indicates an inconsistent configuration pipeline; please report it"),
                None => Diagnostic::error(format!(
                    "links were deferred for `{}`, which was never created as a target",
                    target
                ))
                .with_code("kis::link::missing_target")
                .with_suggestion("this indicates an inconsistent configuration pipeline; please report it"),
            },

            LinkError::OverrideCycle { chain } => Diagnostic::error("packages override each other in a cycle")
                .with_code("kis::link::override_cycle")
                .with_context(format!("cycle: {}", chain.join(" -> ")))
                .with_suggestion("remove one of the `overrides` entries in the cycle"),

            LinkError::CircularImportDependency { cycle } => {
                Diagnostic::error("circular dependency between imported packages")
                    .with_code("kis::link::circular_import")
                    .with_context(format!("cycle: {}", cycle.join(" -> ")))
                    .with_context(
                        "these packages do not support the requested variant and must be imported from a base variant",
                    )
                    .with_suggestion("break the cycle, or add the requested variant to one of the packages")
            }

            LinkError::AbiMismatch {
                package,
                variant,
                base_variant,
            } => Diagnostic::error(format!(
                "cannot import `{}` built as `{}` into a `{}` build",
                package, base_variant, variant
            ))
            .with_code("kis::link::abi_mismatch")
            .with_context("the variants belong to different ABI groups")
            .with_suggestion(format!("add `{}` to the package's `variants`", variant)),
        }
    }
}

/// Overall phase of the link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    /// Phase 1: link intents are being recorded
    Collecting,
    /// Phase 2 has started; the table is sealed
    Resolving,
    Resolved,
}

/// Per-target link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetLinkState {
    Unlinked,
    PendingResolution,
    Resolved,
}

impl fmt::Display for TargetLinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetLinkState::Unlinked => write!(f, "unlinked"),
            TargetLinkState::PendingResolution => write!(f, "pending"),
            TargetLinkState::Resolved => write!(f, "resolved"),
        }
    }
}

/// A link intent recorded in phase 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub visibility: Visibility,
    pub dependency: String,
    pub scope: Vec<DependencyScope>,
}

/// A final `(visibility, dependency)` edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub visibility: Visibility,
    pub dependency: String,
}

#[derive(Debug, Clone)]
struct TargetEntry {
    kind: PackageKind,
    state: TargetLinkState,
}

/// Visibility used when a manifest does not name one.
pub fn default_visibility(kind: PackageKind) -> Visibility {
    match kind {
        PackageKind::Interface => Visibility::Interface,
        PackageKind::Library | PackageKind::Executable => Visibility::Private,
    }
}

/// Deferred and final link records of one configuration run.
#[derive(Debug, Clone)]
pub struct LinkTable {
    phase: LinkPhase,
    targets: BTreeMap<String, TargetEntry>,
    external: BTreeSet<String>,
    pending: BTreeMap<String, Vec<PendingLink>>,
    resolved: BTreeMap<String, Vec<LinkRecord>>,
}

impl Default for LinkTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTable {
    pub fn new() -> Self {
        LinkTable {
            phase: LinkPhase::Collecting,
            targets: BTreeMap::new(),
            external: BTreeSet::new(),
            pending: BTreeMap::new(),
            resolved: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    fn ensure_collecting(&self, target: &str) -> Result<(), LinkError> {
        if self.phase == LinkPhase::Collecting {
            Ok(())
        } else {
            Err(LinkError::LinkerSealed {
                target: target.to_string(),
            })
        }
    }

    /// Register a materialized target.
    pub fn add_target(&mut self, name: &str, kind: PackageKind) -> Result<(), LinkError> {
        self.ensure_collecting(name)?;
        let state = if self.pending.contains_key(name) {
            TargetLinkState::PendingResolution
        } else {
            TargetLinkState::Unlinked
        };
        self.targets
            .insert(name.to_string(), TargetEntry { kind, state });
        Ok(())
    }

    /// Register a name provided outside the workspace (third-party).
    pub fn add_external(&mut self, name: &str) {
        self.external.insert(name.to_string());
    }

    pub fn is_external(&self, name: &str) -> bool {
        self.external.contains(name)
    }

    /// Phase 1: record that `target` links `dependencies` with `visibility`.
    ///
    /// Re-recording the same `(visibility, dependency)` pair is a no-op.
    /// Returns how many new records were appended.
    pub fn defer_link(
        &mut self,
        target: &str,
        scope: &[DependencyScope],
        visibility: Visibility,
        dependencies: &[String],
    ) -> Result<usize, LinkError> {
        self.ensure_collecting(target)?;

        let records = self.pending.entry(target.to_string()).or_default();
        let mut appended = 0;
        for dep in dependencies {
            let duplicate = records
                .iter()
                .any(|r| r.visibility == visibility && r.dependency == *dep);
            if !duplicate {
                records.push(PendingLink {
                    visibility,
                    dependency: dep.clone(),
                    scope: scope.to_vec(),
                });
                appended += 1;
            }
        }

        if let Some(entry) = self.targets.get_mut(target) {
            entry.state = TargetLinkState::PendingResolution;
        }
        Ok(appended)
    }

    /// Phase 2: resolve every pending record. Runs at most once.
    pub fn resolve_all(
        &mut self,
        overrides: &BTreeMap<String, String>,
        warnings: &mut Warnings,
    ) -> Result<(), LinkError> {
        if self.phase != LinkPhase::Collecting {
            return Err(LinkError::AlreadyResolved);
        }
        self.phase = LinkPhase::Resolving;

        for (target, records) in &self.pending {
            let Some(entry) = self.targets.get(target) else {
                return Err(LinkError::MissingLinkTarget {
                    target: target.clone(),
                    dependency: None,
                });
            };

            let mut resolved: Vec<LinkRecord> = Vec::with_capacity(records.len());
            for record in records {
                let name = follow_overrides(&record.dependency, overrides)
                    .map_err(|chain| LinkError::OverrideCycle { chain })?;
                if name != record.dependency {
                    tracing::debug!(
                        "{}: link `{}` substituted by override `{}`",
                        target,
                        record.dependency,
                        name
                    );
                }

                if name == *target {
                    tracing::debug!("{}: dropping self-link via override of `{}`", target, record.dependency);
                    continue;
                }

                if !self.targets.contains_key(&name) && !self.external.contains(&name) {
                    return Err(LinkError::MissingLinkTarget {
                        target: target.clone(),
                        dependency: Some(name),
                    });
                }

                let mut visibility = record.visibility;
                if entry.kind == PackageKind::Interface && visibility != Visibility::Interface {
                    warnings.push(
                        Diagnostic::warning(format!(
                            "interface target `{}` links `{}` as {}",
                            target, name, visibility
                        ))
                        .with_code("kis::link::interface_visibility")
                        .with_context("interface targets can only carry INTERFACE links")
                        .with_suggestion(format!(
                            "declare the dependency on `{}` with visibility = \"interface\"",
                            record.dependency
                        )),
                    );
                    visibility = Visibility::Interface;
                }

                match resolved.iter_mut().find(|r| r.dependency == name) {
                    Some(existing) => {
                        if existing.visibility == Visibility::Private
                            && visibility == Visibility::Public
                        {
                            existing.visibility = Visibility::Public;
                        }
                    }
                    None => resolved.push(LinkRecord {
                        visibility,
                        dependency: name,
                    }),
                }
            }

            self.resolved.insert(target.clone(), resolved);
        }

        for (name, entry) in self.targets.iter_mut() {
            entry.state = TargetLinkState::Resolved;
            self.resolved.entry(name.clone()).or_default();
        }

        self.phase = LinkPhase::Resolved;
        Ok(())
    }

    pub fn target_state(&self, name: &str) -> Option<TargetLinkState> {
        self.targets.get(name).map(|t| t.state)
    }

    pub fn pending(&self, target: &str) -> &[PendingLink] {
        self.pending.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Final link records of `target`, available after phase 2.
    pub fn final_links(&self, target: &str) -> Option<&[LinkRecord]> {
        self.resolved.get(target).map(Vec::as_slice)
    }

}

/// Phase 1 for a discovered workspace: create every target and record the
/// scope-enabled dependencies of each as deferred links.
pub fn defer_workspace_links(
    state: &mut WorkspaceState,
    scopes: &EnabledScopes,
) -> Result<usize, LinkError> {
    struct Intent {
        target: String,
        scope: Vec<DependencyScope>,
        visibility: Visibility,
        dependency: String,
    }

    let mut targets = Vec::new();
    let mut externals = Vec::new();
    let mut intents = Vec::new();
    for (pkg, _) in state.targets() {
        let kind = pkg.kind();
        targets.push((pkg.name().to_string(), kind));
        for dep in &pkg.manifest.kis_dependencies {
            if scopes.matches(&dep.scope) {
                intents.push(Intent {
                    target: pkg.name().to_string(),
                    scope: dep.scope.clone(),
                    visibility: dep.visibility.unwrap_or_else(|| default_visibility(kind)),
                    dependency: dep.name.clone(),
                });
            }
        }
        for dep in &pkg.manifest.third_party_dependencies {
            if scopes.matches(&dep.scope) {
                externals.push(dep.name.clone());
                intents.push(Intent {
                    target: pkg.name().to_string(),
                    scope: dep.scope.clone(),
                    visibility: dep.visibility.unwrap_or_else(|| default_visibility(kind)),
                    dependency: dep.name.clone(),
                });
            }
        }
    }

    let links = &mut state.links;
    for (name, kind) in &targets {
        links.add_target(name, *kind)?;
    }
    for name in &externals {
        links.add_external(name);
    }
    let mut recorded = 0;
    for intent in intents {
        recorded += links.defer_link(
            &intent.target,
            &intent.scope,
            intent.visibility,
            std::slice::from_ref(&intent.dependency),
        )?;
    }
    tracing::debug!(
        "deferred {} link(s) for {} target(s)",
        recorded,
        targets.len()
    );
    Ok(recorded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn record(visibility: Visibility, dep: &str) -> LinkRecord {
        LinkRecord {
            visibility,
            dependency: dep.to_string(),
        }
    }

    #[test]
    fn test_defer_then_resolve() {
        let mut table = LinkTable::new();
        table.add_target("core", PackageKind::Library).unwrap();
        // intents may be recorded before the target exists
        table
            .defer_link("app", &[], Visibility::Private, &names(&["core"]))
            .unwrap();
        table.add_target("app", PackageKind::Executable).unwrap();

        assert_eq!(table.target_state("app"), Some(TargetLinkState::PendingResolution));
        assert_eq!(table.target_state("core"), Some(TargetLinkState::Unlinked));

        let mut warnings = Warnings::new();
        table.resolve_all(&BTreeMap::new(), &mut warnings).unwrap();

        assert_eq!(
            table.final_links("app").unwrap(),
            &[record(Visibility::Private, "core")]
        );
        assert_eq!(table.final_links("core").unwrap(), &[]);
        assert_eq!(table.target_state("core"), Some(TargetLinkState::Resolved));
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_defer_link_is_idempotent() {
        let mut table = LinkTable::new();
        let deps = names(&["core", "net"]);
        assert_eq!(
            table.defer_link("app", &[], Visibility::Public, &deps).unwrap(),
            2
        );
        assert_eq!(
            table.defer_link("app", &[], Visibility::Public, &deps).unwrap(),
            0
        );
        assert_eq!(table.pending("app").len(), 2);
    }

    #[test]
    fn test_defer_after_resolution_is_rejected() {
        let mut table = LinkTable::new();
        table.add_target("core", PackageKind::Library).unwrap();
        table
            .resolve_all(&BTreeMap::new(), &mut Warnings::new())
            .unwrap();

        let err = table
            .defer_link("core", &[], Visibility::Private, &names(&["x"]))
            .unwrap_err();
        assert!(matches!(err, LinkError::LinkerSealed { .. }));
        assert!(table.pending("core").is_empty());
        assert!(matches!(
            table.add_target("late", PackageKind::Library),
            Err(LinkError::LinkerSealed { .. })
        ));
        assert!(matches!(
            table.resolve_all(&BTreeMap::new(), &mut Warnings::new()),
            Err(LinkError::AlreadyResolved)
        ));
    }

    #[test]
    fn test_table_stays_sealed_after_failed_resolution() {
        let mut table = LinkTable::new();
        table.add_target("app", PackageKind::Executable).unwrap();
        table
            .defer_link("app", &[], Visibility::Private, &names(&["ghost"]))
            .unwrap();

        let err = table
            .resolve_all(&BTreeMap::new(), &mut Warnings::new())
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::MissingLinkTarget { dependency: Some(ref d), .. } if d == "ghost"
        ));
        assert_eq!(table.phase(), LinkPhase::Resolving);
        assert!(matches!(
            table.defer_link("app", &[], Visibility::Private, &names(&["core"])),
            Err(LinkError::LinkerSealed { .. })
        ));
    }

    #[test]
    fn test_override_substitution() {
        let mut table = LinkTable::new();
        table.add_target("app", PackageKind::Executable).unwrap();
        table.add_target("gpu_lib", PackageKind::Library).unwrap();
        table
            .defer_link("app", &[], Visibility::Private, &names(&["cpu_lib"]))
            .unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("cpu_lib".to_string(), "gpu_lib".to_string());
        table.resolve_all(&overrides, &mut Warnings::new()).unwrap();

        assert_eq!(
            table.final_links("app").unwrap(),
            &[record(Visibility::Private, "gpu_lib")]
        );
    }

    #[test]
    fn test_interface_target_visibility_is_coerced() {
        let mut table = LinkTable::new();
        table.add_target("headers", PackageKind::Interface).unwrap();
        table.add_target("core", PackageKind::Library).unwrap();
        table
            .defer_link("headers", &[], Visibility::Public, &names(&["core"]))
            .unwrap();

        let mut warnings = Warnings::new();
        table.resolve_all(&BTreeMap::new(), &mut warnings).unwrap();

        assert_eq!(
            table.final_links("headers").unwrap(),
            &[record(Visibility::Interface, "core")]
        );
        assert!(warnings.contains_code("kis::link::interface_visibility"));
    }

    #[test]
    fn test_external_names_and_missing_targets() {
        let mut table = LinkTable::new();
        table.add_target("app", PackageKind::Executable).unwrap();
        table.add_external("zlib");
        table
            .defer_link("app", &[], Visibility::Private, &names(&["zlib"]))
            .unwrap();
        table
            .resolve_all(&BTreeMap::new(), &mut Warnings::new())
            .unwrap();
        assert_eq!(
            table.final_links("app").unwrap(),
            &[record(Visibility::Private, "zlib")]
        );

        let mut table = LinkTable::new();
        table
            .defer_link("never_created", &[], Visibility::Private, &names(&["x"]))
            .unwrap();
        assert!(matches!(
            table.resolve_all(&BTreeMap::new(), &mut Warnings::new()),
            Err(LinkError::MissingLinkTarget { dependency: None, .. })
        ));
    }

    #[test]
    fn test_duplicate_resolved_names_merge() {
        let mut table = LinkTable::new();
        table.add_target("app", PackageKind::Executable).unwrap();
        table.add_target("gpu", PackageKind::Library).unwrap();
        table
            .defer_link("app", &[], Visibility::Private, &names(&["cpu"]))
            .unwrap();
        table
            .defer_link("app", &[], Visibility::Public, &names(&["gpu"]))
            .unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert("cpu".to_string(), "gpu".to_string());
        table.resolve_all(&overrides, &mut Warnings::new()).unwrap();

        assert_eq!(
            table.final_links("app").unwrap(),
            &[record(Visibility::Public, "gpu")]
        );
    }

    #[test]
    fn test_default_visibility() {
        assert_eq!(default_visibility(PackageKind::Interface), Visibility::Interface);
        assert_eq!(default_visibility(PackageKind::Library), Visibility::Private);
        assert_eq!(default_visibility(PackageKind::Executable), Visibility::Private);
    }
}
