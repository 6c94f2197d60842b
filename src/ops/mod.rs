//! High-level operations.
//!
//! This module contains the implementation of KIS commands.

pub mod cache;
pub mod configure;
pub mod inspect;

pub use cache::{clear_cache, describe_cache};
pub use configure::{configure, preview, resolve, ConfigureOptions, ConfigureOutcome};
pub use inspect::{
    collect_variants, render_dot, render_link_plan, render_tree, render_variants, scan_workspace,
};
