//! Workspace resolution.
//!
//! Scans the on-disk packages and fetches missing first-party dependencies
//! until the workspace is closed under its dependency declarations.

pub mod errors;
pub mod resolve;
pub mod scan;

pub use errors::ResolveError;
pub use resolve::{fetch_fingerprint, ResolveOptions, Resolver, MAX_PASSES};
pub use scan::{ResolutionCache, Scanner};
