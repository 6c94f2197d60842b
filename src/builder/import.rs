//! Import-fallback planning.
//!
//! A package that does not support the requested variant is represented by
//! its artifact from a compatible base variant. Importing a package imports
//! every first-party dependency of it that is itself in import mode, so the
//! planner walks those edges depth first with an explicit in-progress stack.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::builder::link::LinkError;
use crate::core::dependency::EnabledScopes;
use crate::core::variant::VariantRegistry;
use crate::core::workspace::{follow_overrides, BuildMode, WorkspaceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    NotStarted,
    InProgress,
    Done,
}

/// A package represented by a prebuilt artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedPackage {
    pub name: String,
    pub abi_group: String,
    pub base_variant: String,
}

/// Plans imports for one requested variant.
pub struct ImportPlanner<'a> {
    state: &'a WorkspaceState,
    registry: &'a VariantRegistry,
    variant: &'a str,
    scopes: &'a EnabledScopes,
    overrides: BTreeMap<String, String>,
    status: HashMap<String, ImportStatus>,
    stack: Vec<String>,
    planned: Vec<ImportedPackage>,
}

impl<'a> ImportPlanner<'a> {
    pub fn new(
        state: &'a WorkspaceState,
        registry: &'a VariantRegistry,
        variant: &'a str,
        scopes: &'a EnabledScopes,
    ) -> Self {
        ImportPlanner {
            state,
            registry,
            variant,
            scopes,
            overrides: state.override_map(),
            status: HashMap::new(),
            stack: Vec::new(),
            planned: Vec::new(),
        }
    }

    pub fn status(&self, name: &str) -> ImportStatus {
        self.status
            .get(name)
            .copied()
            .unwrap_or(ImportStatus::NotStarted)
    }

    /// Import every target in import mode. Dependencies come before the
    /// packages that import them.
    pub fn plan(mut self) -> Result<Vec<ImportedPackage>, LinkError> {
        let roots: Vec<String> = self
            .state
            .targets()
            .filter(|(_, sel)| sel.mode.is_import())
            .map(|(pkg, _)| pkg.name().to_string())
            .collect();

        for name in roots {
            self.import(&name)?;
        }
        Ok(self.planned)
    }

    fn import(&mut self, name: &str) -> Result<(), LinkError> {
        match self.status(name) {
            ImportStatus::Done => return Ok(()),
            ImportStatus::InProgress => {
                let start = self
                    .stack
                    .iter()
                    .position(|n| n == name)
                    .unwrap_or(0);
                let mut cycle: Vec<String> = self.stack[start..].to_vec();
                cycle.push(name.to_string());
                return Err(LinkError::CircularImportDependency { cycle });
            }
            ImportStatus::NotStarted => {}
        }

        let Some(BuildMode::Import {
            abi_group,
            base_variant,
        }) = self.state.selection(name).map(|s| s.mode.clone())
        else {
            return Ok(());
        };

        if !self.registry.are_compatible(self.variant, &base_variant) {
            return Err(LinkError::AbiMismatch {
                package: name.to_string(),
                variant: self.variant.to_string(),
                base_variant,
            });
        }

        self.status.insert(name.to_string(), ImportStatus::InProgress);
        self.stack.push(name.to_string());

        let deps: Vec<String> = self
            .state
            .package(name)
            .map(|pkg| {
                pkg.manifest
                    .kis_dependencies
                    .iter()
                    .filter(|d| self.scopes.matches(&d.scope))
                    .map(|d| d.name.clone())
                    .collect()
            })
            .unwrap_or_default();

        for dep in deps {
            let resolved = follow_overrides(&dep, &self.overrides)
                .map_err(|chain| LinkError::OverrideCycle { chain })?;
            let is_import = self
                .state
                .selection(&resolved)
                .is_some_and(|s| s.mode.is_import());
            if is_import {
                self.import(&resolved)?;
            }
        }

        self.stack.pop();
        self.status.insert(name.to_string(), ImportStatus::Done);
        tracing::debug!("import {} from `{}` ({})", name, base_variant, abi_group);
        self.planned.push(ImportedPackage {
            name: name.to_string(),
            abi_group,
            base_variant,
        });
        Ok(())
    }
}

/// Plan imports for `state` under `variant`.
pub fn plan_imports(
    state: &WorkspaceState,
    registry: &VariantRegistry,
    variant: &str,
    scopes: &EnabledScopes,
) -> Result<Vec<ImportedPackage>, LinkError> {
    ImportPlanner::new(state, registry, variant, scopes).plan()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dependency::KisDependency;
    use crate::core::manifest::{PackageKind, PackageManifest};
    use crate::core::workspace::{LoadedPackage, Selection, WorkspaceLayout};
    use std::path::PathBuf;

    fn loaded(name: &str, deps: &[&str]) -> LoadedPackage {
        let mut manifest = PackageManifest::new(name, "1.0.0", PackageKind::Library);
        for dep in deps {
            manifest.kis_dependencies.push(KisDependency::new(*dep));
        }
        LoadedPackage {
            dir: PathBuf::from(name),
            manifest_path: PathBuf::from(name).join("kis.toml"),
            manifest_digest: manifest.fingerprint(),
            manifest,
            specificity: 0,
            from_cache: false,
        }
    }

    fn import_mode() -> Selection {
        Selection {
            mode: BuildMode::Import {
                abi_group: "RELEASE".to_string(),
                base_variant: "release".to_string(),
            },
            overridden_by: None,
        }
    }

    fn direct() -> Selection {
        Selection {
            mode: BuildMode::Direct,
            overridden_by: None,
        }
    }

    #[test]
    fn test_import_cycle_is_reported() {
        let mut state = WorkspaceState::new(WorkspaceLayout::new("/ws"));
        state.set_packages(vec![loaded("a", &["b"]), loaded("b", &["a"])]);
        state.set_selection("a", import_mode());
        state.set_selection("b", import_mode());

        let registry = VariantRegistry::new();
        let scopes = EnabledScopes::default();
        let err = plan_imports(&state, &registry, "profiling", &scopes).unwrap_err();
        match err {
            LinkError::CircularImportDependency { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_dependencies_are_imported_first() {
        let mut state = WorkspaceState::new(WorkspaceLayout::new("/ws"));
        state.set_packages(vec![
            loaded("app", &["gfx"]),
            loaded("gfx", &["math", "core"]),
            loaded("math", &[]),
            loaded("core", &["gfx_direct_only"]),
        ]);
        state.set_selection("app", direct());
        state.set_selection("gfx", import_mode());
        state.set_selection("math", import_mode());
        state.set_selection("core", direct());

        let registry = VariantRegistry::new();
        let scopes = EnabledScopes::default();
        let planned = plan_imports(&state, &registry, "profiling", &scopes).unwrap();
        let names: Vec<_> = planned.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["math", "gfx"]);
    }

    #[test]
    fn test_cross_group_import_is_rejected() {
        let mut state = WorkspaceState::new(WorkspaceLayout::new("/ws"));
        state.set_packages(vec![loaded("gfx", &[])]);
        state.set_selection("gfx", import_mode());

        let registry = VariantRegistry::new();
        let err = plan_imports(&state, &registry, "asan", &EnabledScopes::default()).unwrap_err();
        assert!(matches!(err, LinkError::AbiMismatch { ref base_variant, .. } if base_variant == "release"));
    }
}
