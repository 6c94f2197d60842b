//! Test utilities and mocks for KIS unit tests.
//!
//! [`MockFetcher`] stands in for git: it records every call and materializes
//! a canned manifest at the destination.

pub mod fixtures;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Context, Result};

use crate::sources::fetch::Fetcher;

pub use fixtures::*;

/// One recorded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub url: String,
    pub reference: String,
    pub destination: PathBuf,
}

/// In-memory [`Fetcher`] keyed by URL.
#[derive(Debug, Default)]
pub struct MockFetcher {
    manifests: HashMap<String, String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        MockFetcher::default()
    }

    /// Serve a library named `name` with name-only dependencies at `url`.
    pub fn with_package(self, url: &str, name: &str, deps: &[&str]) -> Self {
        let content = manifest_toml(name, deps);
        self.with_manifest(url, &content)
    }

    /// Serve arbitrary manifest content at `url`.
    pub fn with_manifest(mut self, url: &str, content: &str) -> Self {
        self.manifests.insert(url.to_string(), content.to_string());
        self
    }

    /// Make every fetch of `url` fail.
    pub fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Calls so far, in completion order.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str, reference: &str, destination: &Path) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(FetchCall {
                url: url.to_string(),
                reference: reference.to_string(),
                destination: destination.to_path_buf(),
            });
        }

        if self.failing.contains(url) {
            bail!("connection refused: {}", url);
        }
        let Some(content) = self.manifests.get(url) else {
            bail!("repository not found: {}", url);
        };

        std::fs::create_dir_all(destination)
            .with_context(|| format!("failed to create {}", destination.display()))?;
        std::fs::write(destination.join("kis.toml"), content)
            .with_context(|| format!("failed to write manifest in {}", destination.display()))?;
        Ok(())
    }
}
