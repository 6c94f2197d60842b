//! Persisted fingerprint cache.
//!
//! Fingerprints let a configure run skip repeat manifest parsing, repeat
//! platform checks and repeat fetch-need evaluation. Everything is keyed by
//! content digest, so a changed file is always a miss.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::manifest::PackageManifest;
use crate::core::platform::Platform;
use crate::core::workspace::WorkspaceState;
use crate::resolver::resolve::fetch_fingerprint;
use crate::resolver::scan::ResolutionCache;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::hash::Digest;

/// File name of the cache inside the state directory.
pub const CACHE_FILE: &str = "fingerprints.json";

const CACHE_VERSION: u32 = 1;

/// Cached state of one manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Digest of the manifest file content
    pub digest: Digest,
    pub manifest: PackageManifest,
    /// Stamp of the last platform check that passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_check: Option<Digest>,
}

/// What the previous successful run was configured for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStamp {
    pub root: PathBuf,
    pub platform: String,
    pub tags: Vec<String>,
    pub variant: String,
    pub features: Vec<String>,
}

impl RunStamp {
    pub fn new(root: &Path, platform: &Platform, variant: &str, features: &[String]) -> Self {
        let mut features = features.to_vec();
        features.sort();
        features.dedup();
        RunStamp {
            root: root.to_path_buf(),
            platform: platform.id.clone(),
            tags: platform.tags.clone(),
            variant: variant.to_string(),
            features,
        }
    }
}

/// Fingerprints of manifests, fetches and the last run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintCache {
    version: u32,
    /// Keyed by manifest path
    #[serde(default)]
    manifests: BTreeMap<PathBuf, ManifestEntry>,
    /// Keyed by package name
    #[serde(default)]
    fetches: BTreeMap<String, Digest>,
    #[serde(default)]
    run: Option<RunStamp>,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        FingerprintCache {
            version: CACHE_VERSION,
            manifests: BTreeMap::new(),
            fetches: BTreeMap::new(),
            run: None,
        }
    }
}

impl FingerprintCache {
    /// Path of the cache file under `state_dir`.
    pub fn path_in(state_dir: &Path) -> PathBuf {
        state_dir.join(CACHE_FILE)
    }

    /// Load the cache. A missing, unreadable or outdated cache loads empty.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return FingerprintCache::default();
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str::<FingerprintCache>(&content).map_err(Into::into));

        match loaded {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                tracing::debug!(
                    "ignoring fingerprint cache version {} at {}",
                    cache.version,
                    path.display()
                );
                FingerprintCache::default()
            }
            Err(e) => {
                tracing::warn!(
                    "ignoring unreadable fingerprint cache {}: {}",
                    path.display(),
                    e
                );
                FingerprintCache::default()
            }
        }
    }

    /// Save the cache, creating its directory.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write fingerprint cache {}", path.display()))?;
        Ok(())
    }

    /// Delete the cache file. Returns whether a file was removed.
    pub fn clear(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove fingerprint cache {}", path.display()))?;
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.fetches.is_empty() && self.run.is_none()
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.len()
    }

    pub fn run(&self) -> Option<&RunStamp> {
        self.run.as_ref()
    }

    /// True unless the stored digest for `path` equals `current`.
    pub fn needs_revalidation(&self, path: &Path, current: &Digest) -> bool {
        match self.manifests.get(path) {
            Some(entry) => entry.digest != *current,
            None => true,
        }
    }

    /// A warning listing every difference between the stored run and `current`.
    pub fn drift(&self, current: &RunStamp) -> Option<Diagnostic> {
        let previous = self.run.as_ref()?;

        let mut changes = Vec::new();
        if previous.root != current.root {
            changes.push(format!(
                "workspace root changed from {} to {}",
                previous.root.display(),
                current.root.display()
            ));
        }
        if previous.platform != current.platform || previous.tags != current.tags {
            changes.push(format!(
                "platform changed from {} [{}] to {} [{}]",
                previous.platform,
                previous.tags.join(", "),
                current.platform,
                current.tags.join(", ")
            ));
        }
        if previous.variant != current.variant {
            changes.push(format!(
                "variant changed from `{}` to `{}`",
                previous.variant, current.variant
            ));
        }
        if previous.features != current.features {
            changes.push(format!(
                "features changed from [{}] to [{}]",
                previous.features.join(", "),
                current.features.join(", ")
            ));
        }

        if changes.is_empty() {
            return None;
        }
        let mut diag = Diagnostic::warning("build directory was configured differently before")
            .with_code("kis::cache::stale");
        for change in changes {
            diag = diag.with_context(change);
        }
        Some(diag.with_suggestion(suggestions::CLEAR_CACHE))
    }

    /// Record the state of a successful run.
    ///
    /// `platform_checks` maps manifest paths to the stamps of checks that
    /// passed. Entries for manifests no longer in the workspace are dropped.
    pub fn record(
        &mut self,
        state: &WorkspaceState,
        platform_checks: &BTreeMap<PathBuf, Digest>,
        run: RunStamp,
    ) {
        let mut manifests = BTreeMap::new();
        for pkg in state.packages() {
            manifests.insert(
                pkg.manifest_path.clone(),
                ManifestEntry {
                    digest: pkg.manifest_digest.clone(),
                    manifest: pkg.manifest.clone(),
                    platform_check: platform_checks.get(&pkg.manifest_path).cloned(),
                },
            );
        }
        self.manifests = manifests;
        self.record_fetches(state);
        self.run = Some(run);
    }

    /// Record the remote every fetched package currently corresponds to.
    pub fn record_fetches(&mut self, state: &WorkspaceState) {
        let deps_dir = state.layout().deps_dir();
        let mut fetches = BTreeMap::new();
        for pkg in state.packages().filter(|p| p.dir.starts_with(&deps_dir)) {
            if let Some(declared) = state.remote_for(pkg.name()) {
                fetches.insert(
                    pkg.name().to_string(),
                    fetch_fingerprint(pkg.name(), &declared.spec),
                );
            }
        }
        self.fetches = fetches;
    }
}

impl ResolutionCache for FingerprintCache {
    fn cached_manifest(&self, path: &Path, digest: &Digest) -> Option<PackageManifest> {
        self.manifests
            .get(path)
            .filter(|entry| entry.digest == *digest)
            .map(|entry| entry.manifest.clone())
    }

    fn fetch_stamp(&self, name: &str) -> Option<Digest> {
        self.fetches.get(name).cloned()
    }

    fn platform_check_passed(&self, path: &Path, stamp: &Digest) -> bool {
        self.manifests
            .get(path)
            .and_then(|entry| entry.platform_check.as_ref())
            .is_some_and(|stored| stored == stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::manifest::FileManifestReader;
    use crate::core::workspace::WorkspaceLayout;
    use crate::resolver::scan::Scanner;
    use crate::test_support::{manifest_toml, write_package};
    use crate::util::fs::WalkDirProbe;
    use tempfile::TempDir;

    fn linux() -> Platform {
        Platform::new("linux-x86_64", ["unix", "linux"])
    }

    fn scanned(root: &Path) -> WorkspaceState {
        let layout = WorkspaceLayout::new(root);
        let packages = Scanner::new(&WalkDirProbe, &FileManifestReader)
            .scan(&layout, &[])
            .unwrap();
        let mut state = WorkspaceState::new(layout);
        state.set_packages(packages);
        state
    }

    #[test]
    fn test_fingerprint_cache_roundtrip() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "core", &manifest_toml("core", &[]));
        let state = scanned(tmp.path());
        let pkg = state.package("core").unwrap();

        let mut cache = FingerprintCache::default();
        assert!(cache.needs_revalidation(&pkg.manifest_path, &pkg.manifest_digest));

        let mut checks = BTreeMap::new();
        checks.insert(pkg.manifest_path.clone(), Digest::of_str("check"));
        cache.record(&state, &checks, RunStamp::new(tmp.path(), &linux(), "release", &[]));

        let path = FingerprintCache::path_in(&tmp.path().join("build/.kis"));
        cache.save(&path).unwrap();

        let loaded = FingerprintCache::load(&path);
        assert!(!loaded.needs_revalidation(&pkg.manifest_path, &pkg.manifest_digest));
        assert!(loaded
            .cached_manifest(&pkg.manifest_path, &pkg.manifest_digest)
            .is_some());
        assert!(loaded.platform_check_passed(&pkg.manifest_path, &Digest::of_str("check")));
        assert!(!loaded.platform_check_passed(&pkg.manifest_path, &Digest::of_str("other")));
    }

    #[test]
    fn test_changed_content_is_never_a_hit() {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path(), "core", &manifest_toml("core", &[]));
        let state = scanned(tmp.path());
        let mut cache = FingerprintCache::default();
        cache.record(&state, &BTreeMap::new(), RunStamp::new(tmp.path(), &linux(), "release", &[]));

        let path = &state.package("core").unwrap().manifest_path;
        let changed = Digest::of_str(&manifest_toml("core", &["base"]));
        assert!(cache.needs_revalidation(path, &changed));
        assert!(cache.cached_manifest(path, &changed).is_none());
    }

    #[test]
    fn test_run_drift() {
        let tmp = TempDir::new().unwrap();
        let state = scanned(tmp.path());
        let mut cache = FingerprintCache::default();
        let first = RunStamp::new(tmp.path(), &linux(), "release", &["gpu".to_string()]);
        assert!(cache.drift(&first).is_none());

        cache.record(&state, &BTreeMap::new(), first.clone());
        assert!(cache.drift(&first).is_none());

        let second = RunStamp::new(tmp.path(), &linux(), "debug", &[]);
        let drift = cache.drift(&second).unwrap();
        assert_eq!(drift.code, Some("kis::cache::stale"));
        assert_eq!(drift.context.len(), 2);
        assert!(drift.context[0].contains("variant changed"));
    }

    #[test]
    fn test_corrupt_cache_loads_empty_and_clear() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CACHE_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FingerprintCache::load(&path).is_empty());

        assert!(FingerprintCache::clear(&path).unwrap());
        assert!(!path.exists());
        assert!(!FingerprintCache::clear(&path).unwrap());
    }
}
