//! CLI definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use kis::util::config::{split_list, Config};

/// KIS - manifest-driven package resolution for the KIS SDK
#[derive(Parser)]
#[command(name = "kis")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve, discover and link the workspace, then write the build plan
    Configure(ConfigureArgs),

    /// Fetch missing first-party dependencies only
    Resolve(ConfigureArgs),

    /// Display the dependency tree
    Tree(TreeArgs),

    /// Print the dependency graph in Graphviz format
    Graph(WorkspaceArgs),

    /// Show the build mode and final links of a target
    Linkplan(LinkplanArgs),

    /// List build variants by ABI group
    Variants(WorkspaceArgs),

    /// Inspect or clear the fingerprint cache
    Cache(CacheArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Workspace selection and configuration overrides shared by commands.
#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace root (defaults to the current directory)
    #[arg(long, env = "KIS_ROOT")]
    pub root: Option<PathBuf>,

    /// Build directory, relative to the workspace root
    #[arg(long, env = "KIS_BUILD_DIR")]
    pub build_dir: Option<PathBuf>,

    /// Trusted URL prefixes (`;` or `,` separated)
    #[arg(long = "trusted-prefixes", env = "KIS_TRUSTED_URL_PREFIXES")]
    pub trusted_prefixes: Option<String>,

    /// Platform identifier
    #[arg(long, env = "KIS_PLATFORM")]
    pub platform: Option<String>,

    /// Active platform tags, general to specific
    #[arg(long, env = "KIS_PLATFORM_TAGS")]
    pub tags: Option<String>,

    /// Active feature flags
    #[arg(long, env = "KIS_FEATURES")]
    pub features: Option<String>,

    /// Requested build variant
    #[arg(long, env = "KIS_VARIANT")]
    pub variant: Option<String>,

    /// Enabled components (main, tests, samples, benchmarks, all)
    #[arg(long, env = "KIS_COMPONENTS")]
    pub components: Option<String>,

    /// Parallel fetch workers (0 = auto)
    #[arg(short, long, env = "KIS_JOBS")]
    pub jobs: Option<usize>,
}

impl WorkspaceArgs {
    /// Command line layer of the configuration.
    pub fn to_config(&self) -> Config {
        let mut config = Config::default();
        config.trust.prefixes = self.trusted_prefixes.as_deref().map(split_list);
        config.platform.id = self.platform.clone();
        config.platform.tags = self.tags.as_deref().map(split_list);
        config.build.features = self.features.as_deref().map(split_list);
        config.build.variant = self.variant.clone();
        config.build.components = self.components.as_deref().map(split_list);
        config.build.jobs = self.jobs;
        config.build.dir = self.build_dir.clone();
        config
    }
}

#[derive(Args)]
pub struct ConfigureArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Ignore the fingerprint cache and revalidate everything
    #[arg(long, env = "KIS_FORCE_FULL_REVALIDATION")]
    pub force_full_revalidation: bool,

    /// Re-fetch dependencies whose declared remote changed
    #[arg(long, env = "KIS_FORCE_DEPS")]
    pub force_deps: bool,

    /// Do not write the build plan
    #[arg(long)]
    pub no_plan: bool,
}

#[derive(Args)]
pub struct TreeArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Package to start from (defaults to every package nothing depends on)
    pub package: Option<String>,
}

#[derive(Args)]
pub struct LinkplanArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Target to show
    pub target: String,
}

#[derive(Args)]
pub struct CacheArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show what the cache holds
    Show,
    /// Delete the cache
    Clear,
}

#[derive(Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
