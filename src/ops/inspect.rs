//! Read-only views of a workspace: dependency tree, DOT graph, variants and
//! per-target link plans.

use std::fmt::Write as _;

use anyhow::Result;

use crate::builder::executor::ConfiguredPlan;
use crate::core::dependency::EnabledScopes;
use crate::core::graph::PackageGraph;
use crate::core::manifest::FileManifestReader;
use crate::core::variant::VariantRegistry;
use crate::core::workspace::{BuildMode, WorkspaceLayout, WorkspaceState};
use crate::resolver::scan::Scanner;
use crate::util::fs::WalkDirProbe;

/// Scan the workspace as it is on disk, without fetching anything.
pub fn scan_workspace(layout: WorkspaceLayout, tags: &[String]) -> Result<WorkspaceState> {
    let packages = Scanner::new(&WalkDirProbe, &FileManifestReader).scan(&layout, tags)?;
    let mut state = WorkspaceState::new(layout);
    state.set_packages(packages);
    Ok(state)
}

/// Dependency tree of `root`, or of every package nothing depends on.
pub fn render_tree(state: &WorkspaceState, scopes: &EnabledScopes, root: Option<&str>) -> Result<String> {
    let graph = PackageGraph::from_state(state, scopes);
    if let Some(root) = root {
        if !graph.contains(root) {
            anyhow::bail!("package `{}` is not in the workspace", root);
        }
        return Ok(graph.render_tree(root));
    }

    let mut roots = graph.roots();
    if roots.is_empty() {
        // every package is on a cycle; fall back to listing all of them
        roots = state.packages().map(|p| p.name()).collect();
    }
    let mut out = String::new();
    for root in roots {
        out.push_str(&graph.render_tree(root));
    }
    Ok(out)
}

/// Graphviz rendering of the first-party dependency graph.
pub fn render_dot(state: &WorkspaceState, scopes: &EnabledScopes) -> String {
    PackageGraph::from_state(state, scopes).to_dot()
}

/// Variant registry with the custom variants every package on disk declares.
pub fn collect_variants(state: &WorkspaceState) -> VariantRegistry {
    let mut registry = VariantRegistry::new();
    for pkg in state.packages() {
        for custom in &pkg.manifest.custom_variants {
            registry.register_custom_variant(
                &custom.name,
                &custom.abi_group,
                custom.description.as_deref(),
            );
        }
    }
    registry
}

/// Listing of ABI groups and their variants.
pub fn render_variants(registry: &VariantRegistry) -> String {
    let mut out = String::new();
    for (group, members) in registry.groups() {
        let _ = writeln!(out, "{}", group);
        for member in members {
            match registry.description(member) {
                Some(description) => {
                    let _ = writeln!(out, "  {:<12} {}", member, description);
                }
                None => {
                    let _ = writeln!(out, "  {}", member);
                }
            }
        }
    }
    out
}

/// Build mode and final link records of one target.
pub fn render_link_plan(plan: &ConfiguredPlan, target: &str) -> Result<String> {
    let Some(planned) = plan.target(target) else {
        anyhow::bail!("`{}` is not a target of this configuration", target);
    };

    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", planned.name, planned.kind);
    match &planned.mode {
        BuildMode::Direct => {
            let _ = writeln!(out, "  mode: direct ({})", plan.variant);
        }
        BuildMode::Import {
            abi_group,
            base_variant,
        } => {
            let _ = writeln!(out, "  mode: import `{}` ({})", base_variant, abi_group);
        }
    }
    if planned.links.is_empty() {
        let _ = writeln!(out, "  links: none");
    } else {
        let _ = writeln!(out, "  links:");
        for link in &planned.links {
            let _ = writeln!(out, "    {} {}", link.visibility, link.dependency);
        }
    }
    Ok(out)
}
