//! `kis graph` command

use anyhow::Result;

use kis::ops::inspect::{render_dot, scan_workspace};

use crate::cli::WorkspaceArgs;

pub fn execute(args: WorkspaceArgs) -> Result<()> {
    let (options, _) = super::load(&args)?;
    let state = scan_workspace(options.layout(), &options.platform.tags)?;
    print!("{}", render_dot(&state, &options.scopes));
    Ok(())
}
