//! `kis configure` command

use std::time::Instant;

use anyhow::Result;

use kis::builder::JsonPlanExecutor;
use kis::ops::configure;
use kis::sources::GitFetcher;
use kis::util::diagnostic::emit_warnings;
use kis::util::Warnings;

use crate::cli::ConfigureArgs;

pub fn execute(args: ConfigureArgs, color: bool) -> Result<()> {
    let start = Instant::now();
    let (mut options, config) = super::load(&args.workspace)?;
    options.force_full_revalidation = args.force_full_revalidation;
    options.force_deps = args.force_deps;
    options.progress = color;

    let fetcher = GitFetcher::new().with_timeout(config.git_timeout());
    let executor = JsonPlanExecutor::in_build_dir(options.layout().build_dir());
    let executor: Option<&dyn kis::builder::BuildGraphExecutor> =
        if args.no_plan { None } else { Some(&executor) };

    let mut warnings = Warnings::new();
    let result = configure(&options, &fetcher, executor, &mut warnings);
    emit_warnings(&warnings, color);
    let outcome = result?;

    tracing::info!(
        "Configured {} target(s) ({} imported) in {:.2}s",
        outcome.plan.targets.len(),
        outcome.imports.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
