//! `kis tree` command

use anyhow::Result;

use kis::ops::inspect::{render_tree, scan_workspace};

use crate::cli::TreeArgs;

pub fn execute(args: TreeArgs) -> Result<()> {
    let (options, _) = super::load(&args.workspace)?;
    let state = scan_workspace(options.layout(), &options.platform.tags)?;

    print!(
        "{}",
        render_tree(&state, &options.scopes, args.package.as_deref())?
    );
    Ok(())
}
