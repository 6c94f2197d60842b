//! Hand-off of the configured build graph to an external executor.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::builder::import::ImportedPackage;
use crate::builder::link::{LinkPhase, LinkRecord};
use crate::core::manifest::PackageKind;
use crate::core::platform::Platform;
use crate::core::workspace::{BuildMode, WorkspaceState};
use crate::util::fs::{glob_files, relative_path, write_string};

/// File name of the JSON plan inside the build directory.
pub const PLAN_FILE: &str = "kis-plan.json";

/// One target as handed to the executor.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTarget {
    pub name: String,
    pub kind: PackageKind,
    pub dir: PathBuf,
    #[serde(flatten)]
    pub mode: BuildMode,
    /// Expanded source files, relative to `dir`
    pub sources: Vec<PathBuf>,
    pub links: Vec<LinkRecord>,
}

/// The complete configured build graph.
#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredPlan {
    pub platform: Platform,
    pub variant: String,
    pub targets: Vec<PlannedTarget>,
    /// Imported packages, dependencies first
    pub imports: Vec<ImportedPackage>,
    /// Names provided outside the workspace
    pub external: Vec<String>,
}

impl ConfiguredPlan {
    /// Assemble the plan from a state whose links are resolved.
    pub fn from_state(
        state: &WorkspaceState,
        platform: &Platform,
        variant: &str,
        imports: Vec<ImportedPackage>,
    ) -> Result<Self> {
        if state.links.phase() != LinkPhase::Resolved {
            anyhow::bail!("cannot build a plan before link resolution");
        }

        let mut targets = Vec::new();
        let mut external = Vec::new();
        for (pkg, selection) in state.targets() {
            let sources = glob_files(&pkg.dir, &pkg.manifest.sources)
                .with_context(|| format!("failed to expand sources of `{}`", pkg.name()))?
                .into_iter()
                .map(|path| relative_path(&pkg.dir, &path))
                .collect();
            let links = state
                .links
                .final_links(pkg.name())
                .map(<[LinkRecord]>::to_vec)
                .unwrap_or_default();
            for link in &links {
                if state.links.is_external(&link.dependency) && !external.contains(&link.dependency) {
                    external.push(link.dependency.clone());
                }
            }

            targets.push(PlannedTarget {
                name: pkg.name().to_string(),
                kind: pkg.kind(),
                dir: pkg.dir.clone(),
                mode: selection.mode.clone(),
                sources,
                links,
            });
        }
        external.sort();

        Ok(ConfiguredPlan {
            platform: platform.clone(),
            variant: variant.to_string(),
            targets,
            imports,
            external,
        })
    }

    pub fn target(&self, name: &str) -> Option<&PlannedTarget> {
        self.targets.iter().find(|t| t.name == name)
    }
}

/// Sink for a configured build graph.
pub trait BuildGraphExecutor {
    fn execute(&self, plan: &ConfiguredPlan) -> Result<()>;
}

/// Writes the plan as JSON for an external build system.
pub struct JsonPlanExecutor {
    path: PathBuf,
}

impl JsonPlanExecutor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonPlanExecutor { path: path.into() }
    }

    /// Executor writing `kis-plan.json` into `build_dir`.
    pub fn in_build_dir(build_dir: &Path) -> Self {
        Self::new(build_dir.join(PLAN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BuildGraphExecutor for JsonPlanExecutor {
    fn execute(&self, plan: &ConfiguredPlan) -> Result<()> {
        let content = serde_json::to_string_pretty(plan)?;
        write_string(&self.path, &content)?;
        tracing::info!(
            "Wrote {} target(s) to {}",
            plan.targets.len(),
            self.path.display()
        );
        Ok(())
    }
}
