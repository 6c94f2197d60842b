//! User-facing diagnostics.
//!
//! Every fatal condition is rendered as an actionable message: a title, the
//! cause (context lines) and at least one remediation hint. Warnings use the
//! same shape but are collected into [`Warnings`] and flushed once at the end
//! of a run.

use std::fmt;
use std::path::PathBuf;

/// Common remediation hints.
pub mod suggestions {
    pub const TRUSTED_PREFIXES: &str =
        "add the URL prefix to `trust.prefixes` in .kis/config.toml or KIS_TRUSTED_URL_PREFIXES";

    pub const FETCH_FAILED: &str =
        "check your network connection and that the tag exists, then re-run `kis configure`";

    pub const PLATFORM_DIR: &str =
        "move platform-specific packages under `platform/<tag>/` so they are only discovered where they apply";

    pub const CLEAR_CACHE: &str = "run `kis cache clear` to discard cached fingerprints";

    pub const FORCE_DEPS: &str =
        "re-run with `--force-deps` to re-fetch dependencies whose remote changed";
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message with cause and remediation hints.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Stable code, e.g. `kis::resolve::trust_violation`
    pub code: Option<&'static str>,
    /// Title line
    pub message: String,
    pub severity: Severity,
    /// Cause lines
    pub context: Vec<String>,
    /// Remediation hints
    pub suggestions: Vec<String>,
    /// Related file, usually a manifest
    pub location: Option<PathBuf>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_severity(Severity::Warning, message)
    }

    fn with_severity(severity: Severity, message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            message: message.into(),
            severity,
            context: Vec::new(),
            suggestions: Vec::new(),
            location: None,
        }
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context.push(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = Some(path.into());
        self
    }

    /// Format the diagnostic for terminal output.
    pub fn format(&self, color: bool) -> String {
        let mut output = String::new();

        let severity = if color {
            match self.severity {
                Severity::Error => "\x1b[1;31merror\x1b[0m",
                Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
            }
        } else {
            match self.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
            }
        };

        match self.code {
            Some(code) => output.push_str(&format!("{}[{}]: {}\n", severity, code, self.message)),
            None => output.push_str(&format!("{}: {}\n", severity, self.message)),
        }

        if let Some(ref path) = self.location {
            output.push_str(&format!("  --> {}\n", path.display()));
        }

        for ctx in &self.context {
            output.push_str(&format!("  = {}\n", ctx));
        }

        for suggestion in &self.suggestions {
            let help = if color {
                "\x1b[1;32mhelp\x1b[0m"
            } else {
                "help"
            };
            output.push_str(&format!("  {}: {}\n", help, suggestion));
        }

        output
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format(false))
    }
}

/// Ordered collection of warnings for the end-of-run summary.
#[derive(Debug, Clone, Default)]
pub struct Warnings {
    items: Vec<Diagnostic>,
}

impl Warnings {
    pub fn new() -> Self {
        Warnings::default()
    }

    /// Record a warning. Exact duplicates are folded.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::debug!("deferred warning: {}", diagnostic.message);
        let duplicate = self
            .items
            .iter()
            .any(|d| d.code == diagnostic.code && d.message == diagnostic.message);
        if !duplicate {
            self.items.push(diagnostic);
        }
    }

    pub fn extend(&mut self, other: Warnings) {
        for item in other.items {
            self.push(item);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Whether a warning with the given code was recorded.
    pub fn contains_code(&self, code: &str) -> bool {
        self.items.iter().any(|d| d.code == Some(code))
    }

    /// Render every warning followed by a one-line tally.
    pub fn format_summary(&self, color: bool) -> String {
        if self.items.is_empty() {
            return String::new();
        }

        let mut output = String::new();
        for item in &self.items {
            output.push_str(&item.format(color));
        }
        output.push_str(&format!(
            "{} warning{} emitted\n",
            self.items.len(),
            if self.items.len() == 1 { "" } else { "s" }
        ));
        output
    }
}

/// Print a diagnostic to stderr.
pub fn emit(diagnostic: &Diagnostic, color: bool) {
    eprint!("{}", diagnostic.format(color));
}

/// Flush the warning summary to stderr.
pub fn emit_warnings(warnings: &Warnings, color: bool) {
    eprint!("{}", warnings.format_summary(color));
}
