//! KIS - manifest-driven package resolution for the KIS SDK
//!
//! This crate provides the core library functionality for KIS: fetching
//! first-party dependencies to a fixed point, discovering and filtering
//! packages, selecting build variants and computing per-target link plans.

pub mod builder;
pub mod core;
pub mod ops;
pub mod resolver;
pub mod sources;
pub mod util;

/// Test utilities and fixtures for KIS unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides manifest fixtures and an in-memory fetcher.
#[cfg(test)]
pub mod test_support;

pub use core::{
    manifest::PackageManifest, platform::Platform, variant::VariantRegistry,
    workspace::WorkspaceState,
};

pub use builder::{ConfiguredPlan, LinkTable};
pub use util::context::GlobalContext;
