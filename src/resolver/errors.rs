//! Resolution error types and diagnostics.

use std::path::PathBuf;

use miette::Diagnostic as MietteDiagnostic;
use thiserror::Error;

use crate::core::manifest::ManifestError;
use crate::sources::fetch::FetchError;
use crate::util::diagnostic::Diagnostic;

/// Error during workspace resolution.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Fetch(#[from] FetchError),

    #[error("dependency `{name}` is required but no package supplies its remote location")]
    #[diagnostic(code(kis::resolve::missing_remote_spec))]
    MissingRemoteSpec {
        name: String,
        required_by: Vec<String>,
    },

    #[error("package name `{name}` is defined more than once")]
    #[diagnostic(code(kis::resolve::duplicate_package))]
    DuplicatePackageName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("resolution did not converge after {passes} passes")]
    #[diagnostic(code(kis::resolve::iteration_limit))]
    IterationLimit {
        passes: usize,
        still_missing: Vec<String>,
    },

    #[error("filesystem error at {}: {message}", path.display())]
    #[diagnostic(code(kis::resolve::io))]
    Io { path: PathBuf, message: String },
}

impl ResolveError {
    /// Convert to a user-friendly diagnostic.
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ResolveError::Manifest(e) => e.to_diagnostic(),
            ResolveError::Fetch(e) => e.to_diagnostic(),

            ResolveError::MissingRemoteSpec { name, required_by } => {
                let mut diag = Diagnostic::error(format!(
                    "dependency `{}` is required but no package supplies its remote location",
                    name
                ))
                .with_code("kis::resolve::missing_remote_spec");

                if !required_by.is_empty() {
                    diag = diag.with_context(format!("required by: {}", required_by.join(", ")));
                }

                diag.with_suggestion(format!(
                    "add `url` and `tag` to one `[[dependencies]]` entry named `{}`",
                    name
                ))
                .with_suggestion(format!("or place the `{}` package in the workspace", name))
            }

            ResolveError::DuplicatePackageName {
                name,
                first,
                second,
            } => Diagnostic::error(format!("package name `{}` is defined more than once", name))
                .with_code("kis::resolve::duplicate_package")
                .with_context(format!("first: {}", first.display()))
                .with_context(format!("second: {}", second.display()))
                .with_suggestion(
                    "rename one of them, or give the platform-specific one its own name and list the common one in its `overrides`",
                ),

            ResolveError::IterationLimit {
                passes,
                still_missing,
            } => {
                let mut diag = Diagnostic::error(format!(
                    "resolution did not converge after {} passes",
                    passes
                ))
                .with_code("kis::resolve::iteration_limit");

                if !still_missing.is_empty() {
                    diag = diag.with_context(format!("still missing: {}", still_missing.join(", ")));
                }

                diag.with_context(
                    "remote locations declared by fetched packages keep introducing new dependencies",
                )
                .with_suggestion("check the `url`/`tag` declarations for conflicting or circular remotes")
            }

            ResolveError::Io { path, message } => {
                Diagnostic::error(format!("filesystem error at {}", path.display()))
                    .with_code("kis::resolve::io")
                    .with_context(message.clone())
                    .with_suggestion("check that the workspace is readable and writable")
            }
        }
    }
}
