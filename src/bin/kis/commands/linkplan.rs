//! `kis linkplan` command
//!
//! Works on the packages already on disk: missing dependencies are an error
//! rather than a fetch, and the fingerprint cache is not rewritten.

use anyhow::Result;

use kis::ops::inspect::render_link_plan;
use kis::ops::preview;
use kis::util::diagnostic::emit_warnings;
use kis::util::Warnings;

use crate::cli::LinkplanArgs;

pub fn execute(args: LinkplanArgs, color: bool) -> Result<()> {
    let (options, _) = super::load(&args.workspace)?;

    let mut warnings = Warnings::new();
    let result = preview(&options, &mut warnings);
    emit_warnings(&warnings, color);
    let outcome = result?;

    print!("{}", render_link_plan(&outcome.plan, &args.target)?);
    Ok(())
}
