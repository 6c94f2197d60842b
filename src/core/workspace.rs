//! Workspace layout and the per-run workspace state.
//!
//! [`WorkspaceState`] is the single mutable record of one configuration run.
//! The resolver fills in packages and edges, discovery adds the override map
//! and per-package selection, and the linker owns the link table. Nothing in
//! it is shared between runs except through the fingerprint cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::builder::link::LinkTable;
use crate::core::dependency::{DependencyEdge, DependencyKind, RemoteSpec};
use crate::core::manifest::{PackageKind, PackageManifest};
use crate::util::hash::Digest;

/// Directory holding platform-specific search roots.
pub const PLATFORM_DIR: &str = "platform";

/// Directory fetched first-party packages are placed in.
pub const DEPS_DIR: &str = "kis_deps";

/// Default build directory name, relative to the workspace root.
pub const BUILD_DIR: &str = "build";

/// Where packages are searched for and where generated state is written.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
    build_dir: PathBuf,
}

/// One directory packages are discovered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRoot {
    pub path: PathBuf,
    /// `common` or the platform tag this root belongs to
    pub label: String,
    /// Position in the general-to-specific order
    pub specificity: usize,
}

impl WorkspaceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let build_dir = root.join(BUILD_DIR);
        WorkspaceLayout { root, build_dir }
    }

    pub fn with_build_dir(mut self, build_dir: impl Into<PathBuf>) -> Self {
        let build_dir = build_dir.into();
        self.build_dir = if build_dir.is_absolute() {
            build_dir
        } else {
            self.root.join(build_dir)
        };
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn platform_dir(&self) -> PathBuf {
        self.root.join(PLATFORM_DIR)
    }

    pub fn deps_dir(&self) -> PathBuf {
        self.root.join(DEPS_DIR)
    }

    /// Fetch destination of a first-party package.
    pub fn dep_destination(&self, name: &str) -> PathBuf {
        self.deps_dir().join(name)
    }

    /// Directory for persisted tool state inside the build dir.
    pub fn state_dir(&self) -> PathBuf {
        self.build_dir.join(".kis")
    }

    /// Search roots ordered general to specific.
    pub fn search_roots(&self, tags: &[String]) -> Vec<SearchRoot> {
        let mut roots = vec![SearchRoot {
            path: self.root.clone(),
            label: "common".to_string(),
            specificity: 0,
        }];
        for (i, tag) in tags.iter().enumerate() {
            roots.push(SearchRoot {
                path: self.platform_dir().join(tag),
                label: tag.clone(),
                specificity: i + 1,
            });
        }
        roots
    }

    /// Directories the common root scan must skip.
    pub fn common_excludes(&self) -> Vec<PathBuf> {
        vec![self.platform_dir(), self.build_dir.clone()]
    }
}

/// A package found on disk together with its parsed manifest.
#[derive(Debug, Clone)]
pub struct LoadedPackage {
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest_digest: Digest,
    pub manifest: PackageManifest,
    /// Index of the search root it was found under
    pub specificity: usize,
    /// Whether the manifest came from the fingerprint cache
    pub from_cache: bool,
}

impl LoadedPackage {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn kind(&self) -> PackageKind {
        self.manifest.kind
    }
}

/// A remote location and the package whose manifest declared it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredRemote {
    pub spec: RemoteSpec,
    pub declared_by: String,
}

/// A dependency whose remote was declared differently by two packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConflict {
    pub name: String,
    /// The declaration that is used
    pub kept: DeclaredRemote,
    /// A later declaration with another location
    pub ignored: DeclaredRemote,
}

/// A completed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRecord {
    pub name: String,
    pub remote: RemoteSpec,
    pub destination: PathBuf,
}

/// How a selected package participates in the requested variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum BuildMode {
    /// Built from source in the requested variant
    Direct,
    /// Represented by an artifact built in a compatible base variant
    Import {
        abi_group: String,
        base_variant: String,
    },
}

impl BuildMode {
    pub fn is_import(&self) -> bool {
        matches!(self, BuildMode::Import { .. })
    }
}

/// Discovery result for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub mode: BuildMode,
    /// Final package replacing this one, after following override chains
    pub overridden_by: Option<String>,
}

/// An entry of the override map with the specificity it was registered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideEntry {
    pub by: String,
    pub specificity: usize,
}

/// Result of registering an override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideOutcome {
    Inserted,
    /// Replaced a less specific registration
    Replaced { previous: String },
    /// Replaced a registration from the same search root
    Conflict { previous: String },
    /// Ignored in favor of a more specific existing registration
    Kept { existing: String },
}

/// Follow `name` through the override map to the package that finally
/// replaces it. Returns the offending chain when the map has a cycle.
pub fn follow_overrides(
    name: &str,
    overrides: &BTreeMap<String, String>,
) -> Result<String, Vec<String>> {
    let mut chain = vec![name.to_string()];
    let mut current = name;
    while let Some(next) = overrides.get(current) {
        if chain.iter().any(|seen| seen == next) {
            chain.push(next.clone());
            return Err(chain);
        }
        chain.push(next.clone());
        current = next;
    }
    Ok(current.to_string())
}

/// Mutable state of one configuration run.
#[derive(Debug)]
pub struct WorkspaceState {
    layout: WorkspaceLayout,
    packages: BTreeMap<String, LoadedPackage>,
    remotes: BTreeMap<String, DeclaredRemote>,
    remote_conflicts: Vec<RemoteConflict>,
    edges: Vec<DependencyEdge>,
    fetches: Vec<FetchRecord>,
    overrides: BTreeMap<String, OverrideEntry>,
    selection: BTreeMap<String, Selection>,
    /// Deferred and final link records
    pub links: LinkTable,
}

impl WorkspaceState {
    pub fn new(layout: WorkspaceLayout) -> Self {
        WorkspaceState {
            layout,
            packages: BTreeMap::new(),
            remotes: BTreeMap::new(),
            remote_conflicts: Vec::new(),
            edges: Vec::new(),
            fetches: Vec::new(),
            overrides: BTreeMap::new(),
            selection: BTreeMap::new(),
            links: LinkTable::new(),
        }
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// Replace the package set with a fresh scan and re-derive edges and
    /// declared remotes from it. The first declaration of a remote in scan
    /// order is used; differing later ones are kept as conflicts.
    pub fn set_packages(&mut self, packages: Vec<LoadedPackage>) {
        self.packages.clear();
        self.edges.clear();
        self.remotes.clear();
        self.remote_conflicts.clear();

        for pkg in packages {
            let consumer = pkg.manifest.name.clone();
            for dep in &pkg.manifest.kis_dependencies {
                self.edges.push(DependencyEdge {
                    consumer: consumer.clone(),
                    dependency: dep.name.clone(),
                    scope: dep.scope.clone(),
                    kind: DependencyKind::FirstParty,
                    visibility: dep.visibility,
                });
            }
            for (name, remote) in pkg.manifest.remote_declarations() {
                let declared = DeclaredRemote {
                    spec: remote.clone(),
                    declared_by: consumer.clone(),
                };
                match self.remotes.get(name) {
                    None => {
                        self.remotes.insert(name.to_string(), declared);
                    }
                    Some(kept) if kept.spec != declared.spec => {
                        self.remote_conflicts.push(RemoteConflict {
                            name: name.to_string(),
                            kept: kept.clone(),
                            ignored: declared,
                        });
                    }
                    Some(_) => {}
                }
            }
            for dep in &pkg.manifest.third_party_dependencies {
                self.edges.push(DependencyEdge {
                    consumer: consumer.clone(),
                    dependency: dep.name.clone(),
                    scope: dep.scope.clone(),
                    kind: DependencyKind::ThirdParty,
                    visibility: dep.visibility,
                });
            }
            self.packages.insert(consumer, pkg);
        }
    }

    pub fn package(&self, name: &str) -> Option<&LoadedPackage> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Packages ordered by name.
    pub fn packages(&self) -> impl Iterator<Item = &LoadedPackage> {
        self.packages.values()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Every declared edge, scope-unfiltered, in scan order.
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// The first declaration of a remote location for `name`.
    pub fn remote_for(&self, name: &str) -> Option<&DeclaredRemote> {
        self.remotes.get(name)
    }

    /// Remote declarations that disagree with the one in use.
    pub fn remote_conflicts(&self) -> &[RemoteConflict] {
        &self.remote_conflicts
    }

    pub fn record_fetch(&mut self, record: FetchRecord) {
        self.fetches.push(record);
    }

    pub fn fetches(&self) -> &[FetchRecord] {
        &self.fetches
    }

    /// Record `overrideMap[overridden] = by`. A registration from a more
    /// specific search root always beats a less specific one.
    pub fn register_override(
        &mut self,
        overridden: &str,
        by: &str,
        specificity: usize,
    ) -> OverrideOutcome {
        let entry = OverrideEntry {
            by: by.to_string(),
            specificity,
        };
        match self.overrides.get(overridden) {
            None => {
                self.overrides.insert(overridden.to_string(), entry);
                OverrideOutcome::Inserted
            }
            Some(existing) if existing.specificity > specificity => OverrideOutcome::Kept {
                existing: existing.by.clone(),
            },
            Some(existing) => {
                let previous = existing.by.clone();
                let same_root = existing.specificity == specificity;
                self.overrides.insert(overridden.to_string(), entry);
                if same_root {
                    OverrideOutcome::Conflict { previous }
                } else {
                    OverrideOutcome::Replaced { previous }
                }
            }
        }
    }

    /// The override map as plain `overridden -> overriding` pairs.
    pub fn override_map(&self) -> BTreeMap<String, String> {
        self.overrides
            .iter()
            .map(|(k, v)| (k.clone(), v.by.clone()))
            .collect()
    }

    pub fn set_selection(&mut self, name: &str, selection: Selection) {
        self.selection.insert(name.to_string(), selection);
    }

    pub fn selection(&self, name: &str) -> Option<&Selection> {
        self.selection.get(name)
    }

    /// Selected packages that are materialized as targets.
    pub fn targets(&self) -> impl Iterator<Item = (&LoadedPackage, &Selection)> {
        self.selection.iter().filter_map(move |(name, sel)| {
            if sel.overridden_by.is_some() {
                return None;
            }
            self.packages.get(name).map(|pkg| (pkg, sel))
        })
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.selection.contains_key(name)
    }
}
