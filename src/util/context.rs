//! Global context for KIS operations.
//!
//! Provides centralized access to the working directory and configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::config::{global_config_path, load_config, project_config_path, Config};

/// Global context containing paths.
#[derive(Debug, Clone)]
pub struct GlobalContext {
    /// Current working directory
    cwd: PathBuf,
}

impl GlobalContext {
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir().context("failed to get current directory")?;
        Ok(GlobalContext { cwd })
    }

    pub fn with_cwd(cwd: PathBuf) -> Result<Self> {
        let mut ctx = Self::new()?;
        ctx.cwd = cwd;
        Ok(ctx)
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Workspace root: `explicit` resolved against the cwd, or the cwd.
    pub fn workspace_root(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        let root = match explicit {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.cwd.join(path),
            None => self.cwd.clone(),
        };
        if !root.is_dir() {
            anyhow::bail!("workspace root {} is not a directory", root.display());
        }
        Ok(crate::util::fs::normalize_path(&root))
    }

    /// Global and project configuration for `root`, merged.
    pub fn load_config(&self, root: &Path) -> Result<Config> {
        let global = global_config_path();
        load_config(global.as_deref(), &project_config_path(root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_root() {
        let tmp = TempDir::new().unwrap();
        let ctx = GlobalContext::with_cwd(tmp.path().to_path_buf()).unwrap();

        let root = ctx.workspace_root(None).unwrap();
        assert_eq!(root, crate::util::fs::normalize_path(tmp.path()));
        assert!(ctx.workspace_root(Some(Path::new("missing"))).is_err());
    }
}
