//! The configure pipeline: resolve, discover, plan imports, link, hand off.
//!
//! Each phase completes before the next starts. Any fatal error ends the run
//! without writing a plan or updating the fingerprint cache. Warnings go to
//! the caller's list as they are found, so they outlive a failed run.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::builder::discovery::{discover, DiscoveryOptions, DiscoveryReport};
use crate::builder::executor::{BuildGraphExecutor, ConfiguredPlan};
use crate::builder::fingerprint::{FingerprintCache, RunStamp};
use crate::builder::import::{plan_imports, ImportedPackage};
use crate::builder::link::defer_workspace_links;
use crate::core::dependency::EnabledScopes;
use crate::core::graph::PackageGraph;
use crate::core::manifest::FileManifestReader;
use crate::core::platform::Platform;
use crate::core::variant::VariantRegistry;
use crate::core::workspace::{WorkspaceLayout, WorkspaceState};
use crate::resolver::resolve::{ResolveOptions, Resolver};
use crate::resolver::scan::{ResolutionCache, Scanner};
use crate::sources::fetch::{FetchGate, Fetcher};
use crate::sources::trust::TrustPolicy;
use crate::util::config::Config;
use crate::util::diagnostic::{Diagnostic, Warnings};
use crate::util::fs::WalkDirProbe;

/// Options for a configure run.
#[derive(Debug, Clone)]
pub struct ConfigureOptions {
    pub root: PathBuf,
    /// Build directory; relative paths are under `root`
    pub build_dir: PathBuf,
    pub trust: TrustPolicy,
    pub platform: Platform,
    pub variant: String,
    pub features: Vec<String>,
    pub scopes: EnabledScopes,
    pub jobs: usize,
    /// Ignore the fingerprint cache
    pub force_full_revalidation: bool,
    /// Re-fetch dependencies whose declared remote changed
    pub force_deps: bool,
    pub progress: bool,
}

impl ConfigureOptions {
    /// Options for `root` from merged configuration.
    pub fn from_config(root: PathBuf, config: &Config) -> Result<Self> {
        Ok(ConfigureOptions {
            build_dir: config.build_dir(),
            trust: config.trust_policy(),
            platform: config.platform(),
            variant: config.variant(),
            features: config.features(),
            scopes: config.scopes()?,
            jobs: config.jobs(),
            force_full_revalidation: false,
            force_deps: false,
            progress: false,
            root,
        })
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(&self.root).with_build_dir(&self.build_dir)
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            tags: self.platform.tags.clone(),
            scopes: self.scopes.clone(),
            jobs: self.jobs,
            force_deps: self.force_deps,
            progress: self.progress,
            ..ResolveOptions::default()
        }
    }

    fn run_stamp(&self) -> RunStamp {
        RunStamp::new(&self.root, &self.platform, &self.variant, &self.features)
    }
}

/// Everything a successful configure run produced.
#[derive(Debug)]
pub struct ConfigureOutcome {
    pub state: WorkspaceState,
    pub registry: VariantRegistry,
    pub discovery: DiscoveryReport,
    pub imports: Vec<ImportedPackage>,
    pub plan: ConfiguredPlan,
}

/// The fingerprint cache for a run, unless revalidation is forced.
fn active_cache(cache: &FingerprintCache, force: bool) -> Option<&dyn ResolutionCache> {
    if force || cache.is_empty() {
        None
    } else {
        Some(cache)
    }
}

/// Resolve only: fetch missing first-party dependencies to a fixed point.
pub fn resolve(
    options: &ConfigureOptions,
    fetcher: &dyn Fetcher,
    warnings: &mut Warnings,
) -> Result<WorkspaceState> {
    let layout = options.layout();
    let cache_path = FingerprintCache::path_in(&layout.state_dir());
    let mut cache = FingerprintCache::load(&cache_path);

    let state = {
        let active = active_cache(&cache, options.force_full_revalidation);
        let scanner = Scanner::new(&WalkDirProbe, &FileManifestReader).with_cache(active);
        let gate = FetchGate::new(&options.trust, fetcher, &WalkDirProbe);
        Resolver::new(scanner, gate, options.resolve_options())
            .with_cache(active)
            .resolve(layout, warnings)?
    };

    cache.record_fetches(&state);
    cache.save(&cache_path)?;
    Ok(state)
}

/// Run the whole configure pipeline and hand the plan to `executor`.
pub fn configure(
    options: &ConfigureOptions,
    fetcher: &dyn Fetcher,
    executor: Option<&dyn BuildGraphExecutor>,
    warnings: &mut Warnings,
) -> Result<ConfigureOutcome> {
    run_pipeline(options, fetcher, executor, warnings, true)
}

/// Fails every fetch; read-only runs work on what is already on disk.
struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn fetch(&self, url: &str, _reference: &str, _destination: &Path) -> Result<()> {
        anyhow::bail!(
            "not fetching {} from a read-only command; run `kis resolve` first",
            url
        )
    }
}

/// The configure pipeline without side effects: nothing is fetched, no plan
/// is written and the fingerprint cache is left untouched.
pub fn preview(options: &ConfigureOptions, warnings: &mut Warnings) -> Result<ConfigureOutcome> {
    run_pipeline(options, &OfflineFetcher, None, warnings, false)
}

fn run_pipeline(
    options: &ConfigureOptions,
    fetcher: &dyn Fetcher,
    executor: Option<&dyn BuildGraphExecutor>,
    warnings: &mut Warnings,
    persist: bool,
) -> Result<ConfigureOutcome> {
    let layout = options.layout();
    let cache_path = FingerprintCache::path_in(&layout.state_dir());
    let mut cache = FingerprintCache::load(&cache_path);

    let run = options.run_stamp();
    if let Some(drift) = cache.drift(&run) {
        warnings.push(drift);
    }

    let active = active_cache(&cache, options.force_full_revalidation);
    if options.force_full_revalidation {
        tracing::info!("Ignoring fingerprint cache, revalidating everything");
    }

    tracing::info!(
        "Configuring {} for {} ({})",
        options.root.display(),
        options.platform,
        options.variant
    );

    let mut state = {
        let scanner = Scanner::new(&WalkDirProbe, &FileManifestReader).with_cache(active);
        let gate = FetchGate::new(&options.trust, fetcher, &WalkDirProbe);
        Resolver::new(scanner, gate, options.resolve_options())
            .with_cache(active)
            .resolve(layout, warnings)?
    };

    let mut registry = VariantRegistry::new();
    let discovery_options = DiscoveryOptions::new(options.platform.clone(), &options.variant)
        .with_features(options.features.iter().cloned())
        .with_scopes(options.scopes.clone());
    let discovery = discover(
        &mut state,
        &mut registry,
        &discovery_options,
        active,
        warnings,
    )?;

    let imports = plan_imports(&state, &registry, &discovery_options.variant, &options.scopes)?;

    warn_direct_cycles(&state, &options.scopes, warnings);

    defer_workspace_links(&mut state, &options.scopes)?;
    let overrides = state.override_map();
    state.links.resolve_all(&overrides, warnings)?;

    let plan = ConfiguredPlan::from_state(&state, &options.platform, &discovery_options.variant, imports.clone())?;
    if let Some(executor) = executor {
        executor.execute(&plan)?;
    }

    if persist {
        cache.record(&state, &discovery.platform_checks, run);
        cache.save(&cache_path)?;
    }

    Ok(ConfigureOutcome {
        state,
        registry,
        discovery,
        imports,
        plan,
    })
}

/// Dependency cycles among directly built targets are legal for the build
/// system but usually a mistake.
fn warn_direct_cycles(state: &WorkspaceState, scopes: &EnabledScopes, warnings: &mut Warnings) {
    let graph = PackageGraph::from_state(state, scopes);
    for cycle in graph.cycles() {
        let all_direct = cycle.iter().all(|name| {
            state
                .selection(name)
                .is_some_and(|s| s.overridden_by.is_none() && !s.mode.is_import())
        });
        if all_direct {
            warnings.push(
                Diagnostic::warning(format!(
                    "dependency cycle between {}",
                    cycle.join(", ")
                ))
                .with_code("kis::graph::cycle")
                .with_suggestion("run `kis tree` to inspect the dependency chain"),
            );
        }
    }
}
