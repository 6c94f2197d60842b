//! Configuration of the discovered package set into a build graph.
//!
//! Discovery selects packages, the import planner handles variant fallback,
//! the two-phase linker produces final link records and the executor hands
//! the result to an external build system.

pub mod discovery;
pub mod executor;
pub mod fingerprint;
pub mod import;
pub mod link;

pub use discovery::{discover, DiscoveryError, DiscoveryOptions, DiscoveryReport, Exclusion};
pub use executor::{BuildGraphExecutor, ConfiguredPlan, JsonPlanExecutor};
pub use fingerprint::{FingerprintCache, RunStamp};
pub use import::{plan_imports, ImportStatus, ImportedPackage};
pub use link::{defer_workspace_links, LinkError, LinkRecord, LinkTable};
