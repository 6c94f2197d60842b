//! Workspace scan: enumerate package directories and load their manifests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::core::manifest::{find_manifest, ManifestError, ManifestReader, PackageManifest};
use crate::core::workspace::{LoadedPackage, WorkspaceLayout};
use crate::resolver::errors::ResolveError;
use crate::util::fs::FileSystemProbe;
use crate::util::hash::Digest;

/// Previously validated state a scan or resolve may reuse.
pub trait ResolutionCache: Sync {
    /// The manifest stored for `path`, if its content digest still matches.
    fn cached_manifest(&self, path: &Path, digest: &Digest) -> Option<PackageManifest>;

    /// The fetch fingerprint stored for a fetched package.
    fn fetch_stamp(&self, name: &str) -> Option<Digest>;

    /// Whether the platform checks of the manifest at `path` already passed
    /// for the check stamp `stamp`.
    fn platform_check_passed(&self, _path: &Path, _stamp: &Digest) -> bool {
        false
    }
}

/// Loads every package visible under the active search roots.
pub struct Scanner<'a> {
    probe: &'a dyn FileSystemProbe,
    reader: &'a dyn ManifestReader,
    cache: Option<&'a dyn ResolutionCache>,
}

impl<'a> Scanner<'a> {
    pub fn new(probe: &'a dyn FileSystemProbe, reader: &'a dyn ManifestReader) -> Self {
        Scanner {
            probe,
            reader,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Option<&'a dyn ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn probe(&self) -> &'a dyn FileSystemProbe {
        self.probe
    }

    /// Scan the common root and each `platform/<tag>` root.
    ///
    /// Manifests are parsed in parallel and folded in enumeration order. Two
    /// packages with the same name anywhere in the active roots is fatal.
    pub fn scan(
        &self,
        layout: &WorkspaceLayout,
        tags: &[String],
    ) -> Result<Vec<LoadedPackage>, ResolveError> {
        let mut found: Vec<(PathBuf, usize)> = Vec::new();
        for root in layout.search_roots(tags) {
            let exclude = if root.specificity == 0 {
                layout.common_excludes()
            } else {
                vec![layout.build_dir().to_path_buf()]
            };
            let dirs = self
                .probe
                .package_dirs(&root.path, &exclude)
                .map_err(|e| ResolveError::Io {
                    path: root.path.clone(),
                    message: format!("{:#}", e),
                })?;
            tracing::debug!("{} package(s) under {} root", dirs.len(), root.label);
            found.extend(dirs.into_iter().map(|d| (d, root.specificity)));
        }

        let results: Vec<Result<LoadedPackage, ResolveError>> = found
            .par_iter()
            .map(|(dir, specificity)| self.load(dir, *specificity))
            .collect();

        let mut seen: HashMap<String, PathBuf> = HashMap::new();
        let mut packages = Vec::with_capacity(results.len());
        for result in results {
            let pkg = result?;
            if let Some(first) = seen.get(pkg.name()) {
                return Err(ResolveError::DuplicatePackageName {
                    name: pkg.name().to_string(),
                    first: first.clone(),
                    second: pkg.dir.clone(),
                });
            }
            seen.insert(pkg.name().to_string(), pkg.dir.clone());
            packages.push(pkg);
        }

        Ok(packages)
    }

    fn load(&self, dir: &Path, specificity: usize) -> Result<LoadedPackage, ResolveError> {
        let manifest_path = find_manifest(dir)?.ok_or_else(|| ManifestError::NotFound {
            dir: dir.to_path_buf(),
        })?;
        let manifest_digest = Digest::of_file(&manifest_path).map_err(|e| ResolveError::Io {
            path: manifest_path.clone(),
            message: format!("{:#}", e),
        })?;

        let cached = self
            .cache
            .and_then(|c| c.cached_manifest(&manifest_path, &manifest_digest));
        let from_cache = cached.is_some();
        let manifest = match cached {
            Some(manifest) => {
                tracing::debug!("manifest cache hit: {}", manifest_path.display());
                manifest
            }
            None => self.reader.read(dir)?,
        };

        Ok(LoadedPackage {
            dir: dir.to_path_buf(),
            manifest_path,
            manifest_digest,
            manifest,
            specificity,
            from_cache,
        })
    }
}
