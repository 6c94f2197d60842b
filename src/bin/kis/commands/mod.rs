//! Command implementations

pub mod cache;
pub mod completions;
pub mod configure;
pub mod graph;
pub mod linkplan;
pub mod resolve;
pub mod tree;
pub mod variants;

use anyhow::Result;

use kis::ops::ConfigureOptions;
use kis::util::{Config, GlobalContext};

use crate::cli::WorkspaceArgs;

/// Merged configuration and workspace root for a command.
pub fn load(args: &WorkspaceArgs) -> Result<(ConfigureOptions, Config)> {
    let ctx = GlobalContext::new()?;
    let root = ctx.workspace_root(args.root.as_deref())?;

    let mut config = ctx.load_config(&root)?;
    config.merge(args.to_config());

    let options = ConfigureOptions::from_config(root, &config)?;
    Ok((options, config))
}
