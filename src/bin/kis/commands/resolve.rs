//! `kis resolve` command

use anyhow::Result;

use kis::ops::resolve;
use kis::sources::GitFetcher;
use kis::util::diagnostic::emit_warnings;
use kis::util::Warnings;

use crate::cli::ConfigureArgs;

pub fn execute(args: ConfigureArgs, color: bool) -> Result<()> {
    let (mut options, config) = super::load(&args.workspace)?;
    options.force_full_revalidation = args.force_full_revalidation;
    options.force_deps = args.force_deps;
    options.progress = color;

    let fetcher = GitFetcher::new().with_timeout(config.git_timeout());
    let mut warnings = Warnings::new();
    let result = resolve(&options, &fetcher, &mut warnings);
    emit_warnings(&warnings, color);
    let state = result?;

    for record in state.fetches() {
        println!("fetched {} ({})", record.name, record.remote);
    }
    Ok(())
}
