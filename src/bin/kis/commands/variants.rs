//! `kis variants` command

use anyhow::Result;

use kis::ops::inspect::{collect_variants, render_variants, scan_workspace};

use crate::cli::WorkspaceArgs;

pub fn execute(args: WorkspaceArgs) -> Result<()> {
    let (options, _) = super::load(&args)?;
    let state = scan_workspace(options.layout(), &options.platform.tags)?;
    let registry = collect_variants(&state);

    print!("{}", render_variants(&registry));
    if !registry.is_known(&options.variant) {
        println!("\nrequested variant `{}` is not registered", options.variant);
    }
    Ok(())
}
