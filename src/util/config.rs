//! Configuration file support for KIS.
//!
//! Settings are layered, later layers winning:
//! - Global: `~/.kis/config.toml`
//! - Project: `<root>/.kis/config.toml`
//! - Command line flags and `KIS_*` environment variables
//!
//! List-valued environment variables accept `;` or `,` as separators.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::dependency::{DependencyScope, EnabledScopes};
use crate::core::platform::Platform;
use crate::core::variant::normalize_variant;
use crate::core::workspace::BUILD_DIR;
use crate::sources::git::DEFAULT_TIMEOUT;
use crate::sources::trust::TrustPolicy;

/// Upper bound for automatically chosen fetch workers.
pub const MAX_AUTO_JOBS: usize = 8;

/// KIS configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub trust: TrustConfig,
    pub platform: PlatformConfig,
    pub build: BuildConfig,
    pub net: NetConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    /// URL prefixes first-party dependencies may be fetched from
    pub prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformConfig {
    /// Platform id, e.g. `linux-x86_64`; defaults to the host
    pub id: Option<String>,
    /// Active tags, general to specific; defaults to the host's
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub variant: Option<String>,
    pub features: Option<Vec<String>>,
    /// Enabled components (`main`, `tests`, ...)
    pub components: Option<Vec<String>>,
    /// Fetch workers, 0 = auto
    pub jobs: Option<usize>,
    /// Build directory, relative to the workspace root
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct NetConfig {
    /// Git fetch timeout in seconds
    pub git_timeout: Option<u64>,
}

/// Split a `;`- or `,`-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([';', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Worker count for `jobs`, where 0 means available parallelism capped at
/// [`MAX_AUTO_JOBS`].
pub fn effective_jobs(jobs: usize) -> usize {
    if jobs > 0 {
        return jobs;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_AUTO_JOBS)
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Load a config file, or the default if it doesn't exist.
    ///
    /// A file that exists but does not parse is an error; silently ignoring
    /// it could drop trust prefixes.
    pub fn load_if_exists(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Merge another config on top of this one. Set values in `other` win.
    pub fn merge(&mut self, other: Config) {
        if other.trust.prefixes.is_some() {
            self.trust.prefixes = other.trust.prefixes;
        }

        if other.platform.id.is_some() {
            self.platform.id = other.platform.id;
        }
        if other.platform.tags.is_some() {
            self.platform.tags = other.platform.tags;
        }

        if other.build.variant.is_some() {
            self.build.variant = other.build.variant;
        }
        if other.build.features.is_some() {
            self.build.features = other.build.features;
        }
        if other.build.components.is_some() {
            self.build.components = other.build.components;
        }
        if other.build.jobs.is_some() {
            self.build.jobs = other.build.jobs;
        }
        if other.build.dir.is_some() {
            self.build.dir = other.build.dir;
        }

        if other.net.git_timeout.is_some() {
            self.net.git_timeout = other.net.git_timeout;
        }
    }

    pub fn trust_policy(&self) -> TrustPolicy {
        TrustPolicy::new(self.trust.prefixes.clone().unwrap_or_default())
    }

    /// The configured platform, filling unset parts from the host.
    pub fn platform(&self) -> Platform {
        let host = Platform::host();
        let id = self.platform.id.clone().unwrap_or(host.id);
        let tags = self.platform.tags.clone().unwrap_or(host.tags);
        Platform::new(id, tags)
    }

    pub fn variant(&self) -> String {
        normalize_variant(self.build.variant.as_deref().unwrap_or(""))
    }

    pub fn features(&self) -> Vec<String> {
        self.build.features.clone().unwrap_or_default()
    }

    pub fn scopes(&self) -> Result<EnabledScopes> {
        let Some(components) = &self.build.components else {
            return Ok(EnabledScopes::default());
        };
        let scopes = components
            .iter()
            .map(|c| c.parse::<DependencyScope>().map_err(anyhow::Error::msg))
            .collect::<Result<Vec<_>>>()
            .context("invalid `build.components`")?;
        Ok(EnabledScopes::new(scopes))
    }

    pub fn jobs(&self) -> usize {
        effective_jobs(self.build.jobs.unwrap_or(0))
    }

    pub fn build_dir(&self) -> PathBuf {
        self.build
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(BUILD_DIR))
    }

    pub fn git_timeout(&self) -> Duration {
        self.net
            .git_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Load and merge the global and project configuration files.
pub fn load_config(global_path: Option<&Path>, project_path: &Path) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_path {
        config.merge(Config::load_if_exists(global_path)?);
    }

    // Project config overrides global
    config.merge(Config::load_if_exists(project_path)?);

    Ok(config)
}

/// Global config directory (`~/.kis/`).
pub fn global_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".kis"))
}

pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("config.toml"))
}

pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".kis").join("config.toml")
}
