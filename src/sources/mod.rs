//! Remote package sources.
//!
//! The trust policy decides which URLs may be fetched at all; the fetch gate
//! performs atomic fetches through an injected [`Fetcher`].

pub mod fetch;
pub mod git;
pub mod trust;

pub use fetch::{FetchError, FetchGate, Fetcher};
pub use git::GitFetcher;
pub use trust::{is_trusted, TrustPolicy};
