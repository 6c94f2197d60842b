//! Core data structures for KIS.
//!
//! Manifests, dependency declarations, platform constraints, the variant
//! registry and the per-run workspace state. Nothing here performs network
//! I/O.

pub mod dependency;
pub mod graph;
pub mod manifest;
pub mod platform;
pub mod variant;
pub mod workspace;

pub use dependency::{DependencyScope, EnabledScopes, KisDependency, RemoteSpec, Visibility};
pub use graph::PackageGraph;
pub use manifest::{ManifestError, ManifestReader, PackageKind, PackageManifest};
pub use platform::Platform;
pub use variant::VariantRegistry;
pub use workspace::{WorkspaceLayout, WorkspaceState};
