//! The fixed-point resolver.
//!
//! Each pass scans the workspace, collects the scope-enabled first-party
//! dependency names, and fetches the ones not present on disk. Passes repeat
//! until a pass finds nothing missing. All missing dependencies of a pass are
//! trust-checked before any of them is fetched, and the fetches of one pass
//! run in parallel on a bounded pool. A failed fetch lets its siblings finish
//! and then ends resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::core::dependency::{EnabledScopes, RemoteSpec};
use crate::core::workspace::{FetchRecord, WorkspaceLayout, WorkspaceState};
use crate::resolver::errors::ResolveError;
use crate::resolver::scan::{ResolutionCache, Scanner};
use crate::sources::fetch::{FetchError, FetchGate};
use crate::util::diagnostic::{suggestions, Diagnostic, Warnings};
use crate::util::hash::{Digest, Fingerprint};

/// Hard ceiling on resolver passes.
pub const MAX_PASSES: usize = 16;

/// Knobs for one resolve.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Active platform tags, general to specific
    pub tags: Vec<String>,
    pub scopes: EnabledScopes,
    /// Fetch worker count; always at least one
    pub jobs: usize,
    /// Remove and re-fetch packages whose declared remote changed
    pub force_deps: bool,
    pub max_passes: usize,
    pub progress: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            tags: Vec::new(),
            scopes: EnabledScopes::default(),
            jobs: 1,
            force_deps: false,
            max_passes: MAX_PASSES,
            progress: false,
        }
    }
}

/// Digest identifying what a fetched package was fetched from.
pub fn fetch_fingerprint(name: &str, remote: &RemoteSpec) -> Digest {
    let mut fp = Fingerprint::with_domain("fetch");
    fp.update_str(name)
        .update_str(&remote.url)
        .update_str(&remote.tag);
    fp.finish()
}

struct FetchJob {
    name: String,
    remote: RemoteSpec,
    destination: PathBuf,
}

fn warn_remote_conflicts(state: &WorkspaceState, warnings: &mut Warnings) {
    for conflict in state.remote_conflicts() {
        warnings.push(
            Diagnostic::warning(format!(
                "conflicting remote locations for `{}`",
                conflict.name
            ))
            .with_code("kis::resolve::conflicting_remote")
            .with_context(format!(
                "using {} declared by `{}`",
                conflict.kept.spec, conflict.kept.declared_by
            ))
            .with_context(format!(
                "ignoring {} declared by `{}`",
                conflict.ignored.spec, conflict.ignored.declared_by
            ))
            .with_suggestion(format!(
                "declare one `url` and `tag` for `{}`, or drop the location from all but one manifest",
                conflict.name
            )),
        );
    }
}

/// Drives scans and fetch rounds to a fixed point.
pub struct Resolver<'a> {
    scanner: Scanner<'a>,
    gate: FetchGate<'a>,
    cache: Option<&'a dyn ResolutionCache>,
    options: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(scanner: Scanner<'a>, gate: FetchGate<'a>, options: ResolveOptions) -> Self {
        Resolver {
            scanner,
            gate,
            cache: None,
            options,
        }
    }

    /// Cache consulted for fetch fingerprints of already fetched packages.
    pub fn with_cache(mut self, cache: Option<&'a dyn ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Resolve the workspace at `layout` into a fresh [`WorkspaceState`].
    pub fn resolve(
        &self,
        layout: WorkspaceLayout,
        warnings: &mut Warnings,
    ) -> Result<WorkspaceState, ResolveError> {
        let mut state = WorkspaceState::new(layout);
        let mut checked_stale = false;
        let max_passes = self.options.max_passes.max(1);

        for pass in 1..=max_passes {
            let packages = self.scanner.scan(state.layout(), &self.options.tags)?;
            tracing::debug!("pass {}: {} package(s) on disk", pass, packages.len());
            state.set_packages(packages);
            warn_remote_conflicts(&state, warnings);

            if !checked_stale {
                checked_stale = true;
                if self.check_stale_fetches(&state, warnings)? {
                    continue;
                }
            }

            let required = self.required(&state);
            let missing: Vec<&String> = required
                .keys()
                .filter(|name| !state.contains(name))
                .collect();

            if missing.is_empty() {
                tracing::info!(
                    "Resolved {} package(s) in {} pass(es), {} fetched",
                    state.package_count(),
                    pass,
                    state.fetches().len()
                );
                return Ok(state);
            }

            if pass == max_passes {
                return Err(ResolveError::IterationLimit {
                    passes: max_passes,
                    still_missing: missing.into_iter().cloned().collect(),
                });
            }

            // Every missing name must have a trusted remote before anything is cloned.
            let mut jobs = Vec::with_capacity(missing.len());
            for name in missing {
                let declared =
                    state
                        .remote_for(name)
                        .ok_or_else(|| ResolveError::MissingRemoteSpec {
                            name: name.clone(),
                            required_by: required[name].iter().cloned().collect(),
                        })?;
                self.gate
                    .validate(name, &declared.spec, Some(&declared.declared_by))?;
                jobs.push(FetchJob {
                    name: name.clone(),
                    remote: declared.spec.clone(),
                    destination: state.layout().dep_destination(name),
                });
            }

            tracing::debug!("pass {}: fetching {} package(s)", pass, jobs.len());
            let mut first_error = None;
            for result in self.fetch_round(&jobs) {
                match result {
                    Ok(record) => state.record_fetch(record),
                    Err(e) => {
                        tracing::debug!("fetch failed: {}", e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e.into());
            }
        }

        // The last pass always returns.
        Err(ResolveError::IterationLimit {
            passes: max_passes,
            still_missing: Vec::new(),
        })
    }

    /// Scope-enabled first-party dependency names mapped to their consumers.
    fn required(&self, state: &WorkspaceState) -> BTreeMap<String, BTreeSet<String>> {
        let mut required: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for pkg in state.packages() {
            for dep in &pkg.manifest.kis_dependencies {
                if self.options.scopes.matches(&dep.scope) {
                    required
                        .entry(dep.name.clone())
                        .or_default()
                        .insert(pkg.name().to_string());
                }
            }
        }
        required
    }

    /// Compare fetched packages against the remote currently declared for
    /// them. Returns true when packages were removed for re-fetching.
    fn check_stale_fetches(
        &self,
        state: &WorkspaceState,
        warnings: &mut Warnings,
    ) -> Result<bool, ResolveError> {
        let Some(cache) = self.cache else {
            return Ok(false);
        };

        let deps_dir = state.layout().deps_dir();
        let mut stale = Vec::new();
        for pkg in state.packages() {
            if !pkg.dir.starts_with(&deps_dir) {
                continue;
            }
            let Some(declared) = state.remote_for(pkg.name()) else {
                continue;
            };

            let current = fetch_fingerprint(pkg.name(), &declared.spec);
            if cache.fetch_stamp(pkg.name()).as_ref() == Some(&current) {
                continue;
            }

            if self.options.force_deps {
                stale.push((pkg, declared));
            } else {
                warnings.push(
                    Diagnostic::warning(format!(
                        "fetched package `{}` may not match its declared remote",
                        pkg.name()
                    ))
                    .with_code("kis::cache::stale_fetch")
                    .with_location(&pkg.dir)
                    .with_context(format!("declared remote: {}", declared.spec))
                    .with_suggestion(suggestions::FORCE_DEPS),
                );
            }
        }

        // Nothing is removed unless every re-fetch is trusted.
        for (pkg, declared) in &stale {
            self.gate
                .validate(pkg.name(), &declared.spec, Some(&declared.declared_by))?;
        }

        for (pkg, declared) in &stale {
            tracing::info!("Re-fetching {} ({})", pkg.name(), declared.spec);
            crate::util::fs::remove_dir_all_if_exists(&pkg.dir).map_err(|e| ResolveError::Io {
                path: pkg.dir.clone(),
                message: format!("{:#}", e),
            })?;
        }
        let removed = !stale.is_empty();
        Ok(removed)
    }

    fn fetch_round(&self, jobs: &[FetchJob]) -> Vec<Result<FetchRecord, FetchError>> {
        let pb = self.progress_bar(jobs.len());
        let run = || -> Vec<Result<FetchRecord, FetchError>> {
            jobs.par_iter()
                .map(|job| {
                    if let Some(pb) = &pb {
                        pb.set_message(job.name.clone());
                    }
                    let result = self.gate.fetch(&job.name, &job.remote, &job.destination);
                    if let Some(pb) = &pb {
                        pb.inc(1);
                    }
                    result
                })
                .collect()
        };

        let results = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .build()
        {
            Ok(pool) => pool.install(run),
            Err(e) => {
                tracing::warn!("failed to build fetch pool ({}), using the global pool", e);
                run()
            }
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        results
    }

    fn progress_bar(&self, total: usize) -> Option<ProgressBar> {
        if !self.options.progress || total < 2 {
            return None;
        }
        let pb = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} Fetching [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }
}
