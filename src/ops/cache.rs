//! Fingerprint cache maintenance.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Result;

use crate::builder::fingerprint::FingerprintCache;
use crate::core::workspace::WorkspaceLayout;

/// Delete the fingerprint cache of `layout`. Returns whether one existed.
pub fn clear_cache(layout: &WorkspaceLayout) -> Result<bool> {
    let path = FingerprintCache::path_in(&layout.state_dir());
    let removed = FingerprintCache::clear(&path)?;
    if removed {
        tracing::info!("Removed {}", path.display());
    } else {
        tracing::info!("No fingerprint cache at {}", path.display());
    }
    Ok(removed)
}

/// Summary of the stored fingerprints.
pub fn describe_cache(layout: &WorkspaceLayout) -> String {
    let path = FingerprintCache::path_in(&layout.state_dir());
    describe(&path, &FingerprintCache::load(&path))
}

fn describe(path: &Path, cache: &FingerprintCache) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "cache: {}", path.display());
    if cache.is_empty() {
        let _ = writeln!(out, "  (empty)");
        return out;
    }
    let _ = writeln!(out, "  manifests: {}", cache.manifest_count());
    let _ = writeln!(out, "  fetches:   {}", cache.fetch_count());
    if let Some(run) = cache.run() {
        let _ = writeln!(
            out,
            "  last run:  {} [{}] variant `{}` features [{}]",
            run.platform,
            run.tags.join(", "),
            run.variant,
            run.features.join(", ")
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clear_and_describe() {
        let tmp = TempDir::new().unwrap();
        let layout = WorkspaceLayout::new(tmp.path());
        assert!(describe_cache(&layout).contains("(empty)"));
        assert!(!clear_cache(&layout).unwrap());

        let path = FingerprintCache::path_in(&layout.state_dir());
        FingerprintCache::default().save(&path).unwrap();
        assert!(clear_cache(&layout).unwrap());
        assert!(!path.exists());
    }
}
