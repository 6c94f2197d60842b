//! KIS CLI - manifest-driven package resolution for the KIS SDK

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kis::builder::{DiscoveryError, LinkError};
use kis::core::ManifestError;
use kis::resolver::ResolveError;
use kis::sources::FetchError;
use kis::util::diagnostic::{emit, Diagnostic};

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    let color = !cli.no_color && std::io::stderr().is_terminal();

    if let Err(e) = run(cli, color) {
        emit(&to_diagnostic(&e), color);
        std::process::exit(1);
    }
}

/// The structured diagnostic of a known error, or a plain one.
fn to_diagnostic(e: &anyhow::Error) -> Diagnostic {
    if let Some(err) = e.downcast_ref::<ResolveError>() {
        return err.to_diagnostic();
    }
    if let Some(err) = e.downcast_ref::<DiscoveryError>() {
        return err.to_diagnostic();
    }
    if let Some(err) = e.downcast_ref::<LinkError>() {
        return err.to_diagnostic();
    }
    if let Some(err) = e.downcast_ref::<FetchError>() {
        return err.to_diagnostic();
    }
    if let Some(err) = e.downcast_ref::<ManifestError>() {
        return err.to_diagnostic();
    }
    Diagnostic::error(format!("{:#}", e))
}

fn run(cli: Cli, color: bool) -> Result<()> {
    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("kis=debug")
    } else {
        EnvFilter::new("kis=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(color)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Configure(args) => commands::configure::execute(args, color),
        Commands::Resolve(args) => commands::resolve::execute(args, color),
        Commands::Tree(args) => commands::tree::execute(args),
        Commands::Graph(args) => commands::graph::execute(args),
        Commands::Linkplan(args) => commands::linkplan::execute(args, color),
        Commands::Variants(args) => commands::variants::execute(args),
        Commands::Cache(args) => commands::cache::execute(args),
        Commands::Completions(args) => commands::completions::execute(args),
    }
}
