//! The fetch gate.
//!
//! Every clone goes through [`FetchGate`], which checks the trust policy,
//! refuses to touch an existing destination, and clones into a staging
//! directory that is renamed into place only once the checkout is complete.
//! A failed fetch leaves nothing behind at the destination.

use std::path::{Path, PathBuf};

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::dependency::RemoteSpec;
use crate::core::workspace::FetchRecord;
use crate::sources::trust::TrustPolicy;
use crate::util::diagnostic::{suggestions, Diagnostic};
use crate::util::fs::FileSystemProbe;

/// Clones a repository at a fixed ref.
///
/// `destination` does not exist when this is called. Implementations must
/// populate it completely or return an error; retries are their business.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, url: &str, reference: &str, destination: &Path) -> anyhow::Result<()>;
}

/// Errors raised while validating or performing a fetch.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum FetchError {
    #[error("untrusted fetch URL `{url}` for `{name}`")]
    #[diagnostic(code(kis::fetch::trust_violation))]
    TrustViolation {
        name: String,
        url: String,
        declared_by: Option<String>,
        prefixes: Vec<String>,
    },

    #[error("failed to fetch `{name}` from {url} at `{reference}`: {message}")]
    #[diagnostic(code(kis::fetch::transport))]
    Transport {
        name: String,
        url: String,
        reference: String,
        message: String,
    },

    #[error("fetch destination {} for `{name}` already exists", destination.display())]
    #[diagnostic(code(kis::fetch::destination_collision))]
    DestinationCollision {
        name: String,
        destination: PathBuf,
        reason: String,
    },

    #[error("failed to stage fetch of `{name}` into {}", destination.display())]
    #[diagnostic(code(kis::fetch::staging))]
    Staging {
        name: String,
        destination: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            FetchError::TrustViolation {
                name,
                url,
                declared_by,
                prefixes,
            } => {
                let mut diag = Diagnostic::error(format!("untrusted fetch URL for `{}`", name))
                    .with_code("kis::fetch::trust_violation")
                    .with_context(format!("url: {}", url));
                if let Some(by) = declared_by {
                    diag = diag.with_context(format!("remote declared by `{}`", by));
                }
                diag = if prefixes.is_empty() {
                    diag.with_context("no trusted URL prefixes are configured")
                } else {
                    diag.with_context(format!("trusted prefixes: {}", prefixes.join(", ")))
                };
                diag.with_suggestion(suggestions::TRUSTED_PREFIXES)
            }
            FetchError::Transport {
                name,
                url,
                reference,
                message,
            } => Diagnostic::error(format!("failed to fetch `{}`", name))
                .with_code("kis::fetch::transport")
                .with_context(format!("url: {}", url))
                .with_context(format!("ref: {}", reference))
                .with_context(message.clone())
                .with_suggestion(suggestions::FETCH_FAILED),
            FetchError::DestinationCollision {
                name,
                destination,
                reason,
            } => Diagnostic::error(format!("cannot fetch `{}` into an existing directory", name))
                .with_code("kis::fetch::destination_collision")
                .with_location(destination)
                .with_context(reason.clone())
                .with_suggestion(format!(
                    "remove {} or make it contain the `{}` package",
                    destination.display(),
                    name
                )),
            FetchError::Staging {
                name,
                destination,
                source,
            } => Diagnostic::error(format!("failed to place fetched `{}`", name))
                .with_code("kis::fetch::staging")
                .with_location(destination)
                .with_context(source.to_string())
                .with_suggestion("check that the workspace is writable"),
        }
    }
}

/// Trust check plus atomic fetch.
pub struct FetchGate<'a> {
    trust: &'a TrustPolicy,
    fetcher: &'a dyn Fetcher,
    probe: &'a dyn FileSystemProbe,
}

impl<'a> FetchGate<'a> {
    pub fn new(
        trust: &'a TrustPolicy,
        fetcher: &'a dyn Fetcher,
        probe: &'a dyn FileSystemProbe,
    ) -> Self {
        FetchGate {
            trust,
            fetcher,
            probe,
        }
    }

    /// Fail with `TrustViolation` unless `remote.url` is trusted.
    pub fn validate(
        &self,
        name: &str,
        remote: &RemoteSpec,
        declared_by: Option<&str>,
    ) -> Result<(), FetchError> {
        if self.trust.is_trusted(&remote.url) {
            return Ok(());
        }
        tracing::debug!("rejected untrusted url {} for `{}`", remote.url, name);
        Err(FetchError::TrustViolation {
            name: name.to_string(),
            url: remote.url.clone(),
            declared_by: declared_by.map(str::to_string),
            prefixes: self.trust.prefixes().to_vec(),
        })
    }

    /// Fetch `name` at `remote` into `destination`.
    pub fn fetch(
        &self,
        name: &str,
        remote: &RemoteSpec,
        destination: &Path,
    ) -> Result<FetchRecord, FetchError> {
        self.validate(name, remote, None)?;

        if destination.exists() {
            return Err(FetchError::DestinationCollision {
                name: name.to_string(),
                destination: destination.to_path_buf(),
                reason: if self.probe.is_package_dir(destination) {
                    format!("the directory holds a package other than `{}`", name)
                } else {
                    "the directory is not a package".to_string()
                },
            });
        }

        let staging_err = |source| FetchError::Staging {
            name: name.to_string(),
            destination: destination.to_path_buf(),
            source,
        };

        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(staging_err)?;

        let staging = tempfile::Builder::new()
            .prefix(".kis-fetch-")
            .tempdir_in(parent)
            .map_err(staging_err)?;
        let checkout = staging.path().join(name);

        tracing::info!("Fetching {} ({} @ {})", name, remote.url, remote.tag);
        self.fetcher
            .fetch(&remote.url, &remote.tag, &checkout)
            .map_err(|e| FetchError::Transport {
                name: name.to_string(),
                url: remote.url.clone(),
                reference: remote.tag.clone(),
                message: format!("{:#}", e),
            })?;

        if !self.probe.is_package_dir(&checkout) {
            return Err(FetchError::Transport {
                name: name.to_string(),
                url: remote.url.clone(),
                reference: remote.tag.clone(),
                message: "the fetched tree has no kis.toml or kis.package.json at its root"
                    .to_string(),
            });
        }

        std::fs::rename(&checkout, destination).map_err(staging_err)?;
        tracing::debug!("placed `{}` at {}", name, destination.display());

        Ok(FetchRecord {
            name: name.to_string(),
            remote: remote.clone(),
            destination: destination.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockFetcher;
    use crate::util::fs::WalkDirProbe;
    use tempfile::TempDir;

    fn remote(url: &str) -> RemoteSpec {
        RemoteSpec {
            url: url.to_string(),
            tag: "v1".to_string(),
        }
    }

    #[test]
    fn test_untrusted_fetch_never_reaches_fetcher() {
        let tmp = TempDir::new().unwrap();
        let trust = TrustPolicy::new(["https://github.com/other/"]);
        let fetcher = MockFetcher::new();
        let gate = FetchGate::new(&trust, &fetcher, &WalkDirProbe);

        let err = gate
            .fetch(
                "m",
                &remote("https://github.com/org/m.git"),
                &tmp.path().join("kis_deps/m"),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::TrustViolation { .. }));
        assert!(fetcher.calls().is_empty());
        assert!(!tmp.path().join("kis_deps/m").exists());
    }

    #[test]
    fn test_successful_fetch_is_renamed_into_place() {
        let tmp = TempDir::new().unwrap();
        let trust = TrustPolicy::new(["https://github.com/org/"]);
        let fetcher = MockFetcher::new().with_package("https://github.com/org/m.git", "m", &[]);
        let gate = FetchGate::new(&trust, &fetcher, &WalkDirProbe);
        let dest = tmp.path().join("kis_deps/m");

        let record = gate
            .fetch("m", &remote("https://github.com/org/m.git"), &dest)
            .unwrap();
        assert_eq!(record.destination, dest);
        assert!(dest.join("kis.toml").is_file());

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path().join("kis_deps"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("m")]);
    }

    #[test]
    fn test_failed_fetch_leaves_no_destination() {
        let tmp = TempDir::new().unwrap();
        let trust = TrustPolicy::new(["https://github.com/org/"]);
        let fetcher = MockFetcher::new().failing("https://github.com/org/m.git");
        let gate = FetchGate::new(&trust, &fetcher, &WalkDirProbe);
        let dest = tmp.path().join("kis_deps/m");

        let err = gate
            .fetch("m", &remote("https://github.com/org/m.git"), &dest)
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(tmp.path().join("kis_deps")).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_destination_is_a_collision() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("kis_deps/m");
        std::fs::create_dir_all(&dest).unwrap();

        let trust = TrustPolicy::new(["https://github.com/org/"]);
        let fetcher = MockFetcher::new();
        let gate = FetchGate::new(&trust, &fetcher, &WalkDirProbe);

        let err = gate
            .fetch("m", &remote("https://github.com/org/m.git"), &dest)
            .unwrap_err();
        assert!(matches!(err, FetchError::DestinationCollision { .. }));
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    fn test_trust_violation_diagnostic_names_prefixes() {
        let err = FetchError::TrustViolation {
            name: "m".into(),
            url: "https://x/m.git".into(),
            declared_by: Some("core".into()),
            prefixes: vec!["https://y/".into()],
        };
        let text = err.to_diagnostic().format(false);
        assert!(text.contains("trusted prefixes: https://y/"));
        assert!(text.contains("declared by `core`"));
        assert!(text.contains("help:"));
    }
}
