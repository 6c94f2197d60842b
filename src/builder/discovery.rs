//! Discovery and filtering of the resolved package set.
//!
//! Discovery runs on the resolver's final scan. It applies the feature filter,
//! checks platform constraints, builds the override map, registers custom
//! variants and decides per package whether it is built directly or imported
//! from a compatible base variant.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::dependency::EnabledScopes;
use crate::core::manifest::{AbiVariant, PackageKind};
use crate::core::platform::{Platform, PlatformMismatch};
use crate::core::variant::{normalize_variant, VariantRegistry, UNKNOWN_GROUP};
use crate::core::workspace::{
    follow_overrides, BuildMode, LoadedPackage, OverrideOutcome, Selection, WorkspaceState,
};
use crate::resolver::scan::ResolutionCache;
use crate::util::diagnostic::{suggestions, Diagnostic, Warnings};
use crate::util::hash::{Digest, Fingerprint};

#[derive(Debug, Error, MietteDiagnostic)]
pub enum DiscoveryError {
    #[error("package `{package}` is not compatible with platform {platform}: {mismatch}")]
    #[diagnostic(code(kis::discover::platform))]
    PlatformIncompatible {
        package: String,
        manifest: PathBuf,
        platform: Platform,
        mismatch: PlatformMismatch,
    },

    #[error("override cycle: {}", chain.join(" -> "))]
    #[diagnostic(code(kis::discover::override_cycle))]
    OverrideCycle { chain: Vec<String> },

    #[error("`{package}` depends on `{dependency}`, which is not part of this configuration")]
    #[diagnostic(code(kis::discover::excluded_dependency))]
    ExcludedDependency {
        package: String,
        dependency: String,
        reason: Exclusion,
    },

    #[error("package `{package}` has no variant compatible with `{variant}`")]
    #[diagnostic(code(kis::discover::no_compatible_variant))]
    NoCompatibleVariant {
        package: String,
        variant: String,
        abi_group: String,
        available: Vec<String>,
    },
}

/// Why a dependency is missing from the selected package set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Dropped by the feature filter
    FeatureExcluded,
    /// Present on disk but not selected
    NotSelected,
    /// No package of that name exists
    NotFound,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::FeatureExcluded => write!(f, "excluded by the active feature set"),
            Exclusion::NotSelected => write!(f, "not selected for this configuration"),
            Exclusion::NotFound => write!(f, "not found in the workspace"),
        }
    }
}

impl DiscoveryError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            DiscoveryError::PlatformIncompatible {
                package,
                manifest,
                platform,
                mismatch,
            } => {
                let hint = match mismatch {
                    PlatformMismatch::MissingRequiredTag { tag, .. } => format!(
                        "add `{}` to the active tags (`platform.tags` or KIS_PLATFORM_TAGS) or drop it from `requires-tags`",
                        tag
                    ),
                    PlatformMismatch::NoAllowedTag { allowed, .. } => format!(
                        "activate one of the tags [{}] or widen the package's `tags`",
                        allowed.join(", ")
                    ),
                    PlatformMismatch::PlatformNotAllowed { platform, .. } => format!(
                        "add `{}` to the package's `platforms`",
                        platform
                    ),
                    PlatformMismatch::ExcludedPlatform { .. } | PlatformMismatch::ExcludedTag { .. } => {
                        "remove the exclusion from the package's `[platform]` table".to_string()
                    }
                };
                Diagnostic::error(format!(
                    "package `{}` cannot be configured for this platform",
                    package
                ))
                .with_code("kis::discover::platform")
                .with_location(manifest)
                .with_context(mismatch.to_string())
                .with_context(format!("current platform: {}", platform))
                .with_suggestion(hint)
                .with_suggestion(suggestions::PLATFORM_DIR)
            }

            DiscoveryError::OverrideCycle { chain } => {
                Diagnostic::error("packages override each other in a cycle")
                    .with_code("kis::discover::override_cycle")
                    .with_context(format!("cycle: {}", chain.join(" -> ")))
                    .with_suggestion("remove one of the `overrides` entries in the cycle")
            }

            DiscoveryError::ExcludedDependency {
                package,
                dependency,
                reason,
            } => {
                let suggestion = match reason {
                    Exclusion::FeatureExcluded => format!(
                        "enable one of the features `{}` requires, or give the dependency a scope that is off",
                        dependency
                    ),
                    Exclusion::NotSelected => format!(
                        "check the platform and override settings that leave `{}` out",
                        dependency
                    ),
                    Exclusion::NotFound => format!(
                        "add a package named `{}` to the workspace, or declare its `url` and `tag`",
                        dependency
                    ),
                };
                Diagnostic::error(format!(
                    "`{}` depends on `{}`, which is not part of this configuration",
                    package, dependency
                ))
                .with_code("kis::discover::excluded_dependency")
                .with_context(format!("`{}` is {}", dependency, reason))
                .with_suggestion(suggestion)
            }

            DiscoveryError::NoCompatibleVariant {
                package,
                variant,
                abi_group,
                available,
            } => {
                let mut diag = Diagnostic::error(format!(
                    "package `{}` cannot be built or imported for variant `{}`",
                    package, variant
                ))
                .with_code("kis::discover::no_compatible_variant")
                .with_context(format!("available variants: {}", available.join(", ")));

                if abi_group == UNKNOWN_GROUP {
                    diag = diag
                        .with_context(format!("`{}` is not a registered variant", variant))
                        .with_suggestion("declare it under `[[custom-variants]]` in one of the packages");
                } else {
                    diag = diag.with_context(format!(
                        "none of them is in the {} ABI group",
                        abi_group
                    ));
                }
                diag.with_suggestion(format!("add `{}` to the package's `variants`", variant))
            }
        }
    }
}

/// Inputs of one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub platform: Platform,
    pub features: BTreeSet<String>,
    pub variant: String,
    pub scopes: EnabledScopes,
}

impl DiscoveryOptions {
    pub fn new(platform: Platform, variant: &str) -> Self {
        DiscoveryOptions {
            platform,
            features: BTreeSet::new(),
            variant: normalize_variant(variant),
            scopes: EnabledScopes::default(),
        }
    }

    pub fn with_features(mut self, features: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scopes(mut self, scopes: EnabledScopes) -> Self {
        self.scopes = scopes;
        self
    }
}

/// What discovery decided, for reporting and for the fingerprint cache.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub feature_excluded: Vec<String>,
    pub overridden: Vec<String>,
    pub direct: Vec<String>,
    pub imported: Vec<String>,
    /// Manifest path to platform-check stamp of every package that passed
    pub platform_checks: BTreeMap<PathBuf, Digest>,
}

/// Stamp of one platform check: the manifest content against the platform.
pub fn platform_check_stamp(pkg: &LoadedPackage, platform: &Platform) -> Digest {
    let mut fp = Fingerprint::with_domain("platform-check");
    fp.update_str(pkg.manifest_digest.as_str())
        .update_str(platform.fingerprint().as_str());
    fp.finish()
}

fn feature_eligible(pkg: &LoadedPackage, features: &BTreeSet<String>) -> bool {
    let required = &pkg.manifest.feature_requirements;
    required.is_empty() || required.iter().any(|f| features.contains(f))
}

/// Filter the resolved package set and record selection and overrides in
/// `state`.
pub fn discover(
    state: &mut WorkspaceState,
    registry: &mut VariantRegistry,
    options: &DiscoveryOptions,
    cache: Option<&dyn ResolutionCache>,
    warnings: &mut Warnings,
) -> Result<DiscoveryReport, DiscoveryError> {
    let mut report = DiscoveryReport::default();

    let mut candidates: Vec<LoadedPackage> = Vec::new();
    for pkg in state.packages() {
        if feature_eligible(pkg, &options.features) {
            candidates.push(pkg.clone());
        } else {
            tracing::debug!(
                "{}: excluded, requires one of features [{}]",
                pkg.name(),
                pkg.manifest
                    .feature_requirements
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            report.feature_excluded.push(pkg.name().to_string());
        }
    }

    for pkg in &candidates {
        let stamp = platform_check_stamp(pkg, &options.platform);
        let cached = cache.is_some_and(|c| c.platform_check_passed(&pkg.manifest_path, &stamp));
        if !cached {
            pkg.manifest
                .platform
                .check(&options.platform)
                .map_err(|mismatch| DiscoveryError::PlatformIncompatible {
                    package: pkg.name().to_string(),
                    manifest: pkg.manifest_path.clone(),
                    platform: options.platform.clone(),
                    mismatch,
                })?;
        }
        report.platform_checks.insert(pkg.manifest_path.clone(), stamp);

        if !pkg.manifest.has_semver_version() {
            warnings.push(
                Diagnostic::warning(format!(
                    "package `{}` has a non-semver version `{}`",
                    pkg.name(),
                    pkg.manifest.version
                ))
                .with_code("kis::manifest::version")
                .with_location(&pkg.manifest_path)
                .with_suggestion("use a MAJOR.MINOR.PATCH version"),
            );
        }
    }

    register_overrides(state, &candidates, warnings);

    let overrides = state.override_map();
    for name in overrides.keys() {
        follow_overrides(name, &overrides).map_err(|chain| DiscoveryError::OverrideCycle { chain })?;
    }

    for pkg in &candidates {
        for custom in &pkg.manifest.custom_variants {
            if let Some(previous) =
                registry.register_custom_variant(&custom.name, &custom.abi_group, custom.description.as_deref())
            {
                warnings.push(
                    Diagnostic::warning(format!(
                        "variant `{}` moved from ABI group {} to {}",
                        custom.name, previous, custom.abi_group
                    ))
                    .with_code("kis::variant::regrouped")
                    .with_location(&pkg.manifest_path)
                    .with_suggestion("give the variant a single ABI group across all packages"),
                );
            }
        }
    }

    if !registry.is_known(&options.variant) {
        warnings.push(
            Diagnostic::warning(format!("unknown variant `{}`", options.variant))
                .with_code("kis::variant::unknown")
                .with_context("it belongs to no ABI group and cannot share artifacts with any other variant")
                .with_suggestion("declare it under `[[custom-variants]]` with an `abi-group`"),
        );
    }

    for pkg in &candidates {
        let name = pkg.name();
        let overridden_by = match follow_overrides(name, &overrides) {
            Ok(final_name) if final_name != name => Some(final_name),
            Ok(_) => None,
            Err(chain) => return Err(DiscoveryError::OverrideCycle { chain }),
        };

        let mode = if overridden_by.is_some() {
            report.overridden.push(name.to_string());
            BuildMode::Direct
        } else {
            let mode = build_mode(pkg, registry, &options.variant)?;
            if mode.is_import() {
                report.imported.push(name.to_string());
            } else {
                report.direct.push(name.to_string());
            }
            mode
        };

        if let Some(by) = &overridden_by {
            tracing::debug!("{}: overridden by {}", name, by);
        }
        state.set_selection(name, Selection { mode, overridden_by });
    }

    check_dependencies(state, &candidates, &overrides, options, &report)?;

    tracing::info!(
        "Discovered {} target(s): {} direct, {} imported, {} overridden, {} excluded by features",
        report.direct.len() + report.imported.len(),
        report.direct.len(),
        report.imported.len(),
        report.overridden.len(),
        report.feature_excluded.len()
    );
    Ok(report)
}

fn register_overrides(state: &mut WorkspaceState, candidates: &[LoadedPackage], warnings: &mut Warnings) {
    for pkg in candidates {
        for overridden in &pkg.manifest.overrides {
            match state.register_override(overridden, pkg.name(), pkg.specificity) {
                OverrideOutcome::Inserted => {
                    tracing::debug!("{} overrides {}", pkg.name(), overridden);
                }
                OverrideOutcome::Replaced { previous } => {
                    tracing::debug!(
                        "{} overrides {} (replaces less specific {})",
                        pkg.name(),
                        overridden,
                        previous
                    );
                }
                OverrideOutcome::Kept { existing } => {
                    tracing::debug!(
                        "{}: override of {} ignored, {} is more specific",
                        pkg.name(),
                        overridden,
                        existing
                    );
                }
                OverrideOutcome::Conflict { previous } => {
                    warnings.push(
                        Diagnostic::warning(format!(
                            "`{}` is overridden by both `{}` and `{}`",
                            overridden,
                            previous,
                            pkg.name()
                        ))
                        .with_code("kis::discover::override_conflict")
                        .with_location(&pkg.manifest_path)
                        .with_context(format!("`{}` wins", pkg.name()))
                        .with_suggestion(suggestions::PLATFORM_DIR),
                    );
                }
            }
        }
    }
}

fn build_mode(
    pkg: &LoadedPackage,
    registry: &VariantRegistry,
    variant: &str,
) -> Result<BuildMode, DiscoveryError> {
    let manifest = &pkg.manifest;
    if manifest.kind == PackageKind::Interface
        || manifest.abi == AbiVariant::AbiInvariant
        || manifest.supports_variant(variant)
    {
        return Ok(BuildMode::Direct);
    }

    let abi_group = registry.abi_group_of(variant).to_string();
    let available = manifest.available_variants();
    match registry.fallback_variant(&abi_group, &available) {
        Some(base_variant) => {
            tracing::debug!(
                "{}: `{}` unsupported, importing `{}` ({})",
                pkg.name(),
                variant,
                base_variant,
                abi_group
            );
            Ok(BuildMode::Import {
                abi_group,
                base_variant,
            })
        }
        None => Err(DiscoveryError::NoCompatibleVariant {
            package: pkg.name().to_string(),
            variant: variant.to_string(),
            abi_group,
            available,
        }),
    }
}

fn check_dependencies(
    state: &WorkspaceState,
    candidates: &[LoadedPackage],
    overrides: &BTreeMap<String, String>,
    options: &DiscoveryOptions,
    report: &DiscoveryReport,
) -> Result<(), DiscoveryError> {
    for pkg in candidates {
        let is_target = state
            .selection(pkg.name())
            .is_some_and(|s| s.overridden_by.is_none());
        if !is_target {
            continue;
        }

        for dep in &pkg.manifest.kis_dependencies {
            if !options.scopes.matches(&dep.scope) {
                continue;
            }
            let resolved = follow_overrides(&dep.name, overrides)
                .map_err(|chain| DiscoveryError::OverrideCycle { chain })?;
            let usable = state
                .selection(&resolved)
                .is_some_and(|s| s.overridden_by.is_none());
            if usable {
                continue;
            }

            let reason = if report.feature_excluded.contains(&resolved) {
                Exclusion::FeatureExcluded
            } else if state.contains(&resolved) {
                Exclusion::NotSelected
            } else {
                Exclusion::NotFound
            };
            return Err(DiscoveryError::ExcludedDependency {
                package: pkg.name().to_string(),
                dependency: resolved,
                reason,
            });
        }
    }
    Ok(())
}
