//! Package manifest schema and parsing.
//!
//! A package is a directory holding `kis.toml` (canonical) or
//! `kis.package.json` (alias). Both files use the same field names. Parsing is
//! a pure function of the file content: nothing in a manifest is executed.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use miette::Diagnostic as MietteDiagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::dependency::{
    DependencyScope, KisDependency, RemoteSpec, ThirdPartyDependency, Visibility,
};
use crate::core::platform::PlatformConstraints;
use crate::core::variant::{normalize_variant, DEBUG_VARIANT, RELEASE_VARIANT};
use crate::util::diagnostic::Diagnostic;
use crate::util::hash::{Digest, Fingerprint};

/// Canonical manifest file name.
pub const MANIFEST_NAME: &str = "kis.toml";

/// JSON manifest file name.
pub const MANIFEST_ALIAS: &str = "kis.package.json";

/// What a package produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Compiled library
    #[serde(alias = "lib", alias = "static", alias = "shared")]
    Library,
    /// Header-only / usage-requirements-only package
    #[serde(alias = "header-only", alias = "headers")]
    Interface,
    /// Executable
    #[serde(alias = "exe", alias = "bin")]
    Executable,
}

impl Default for PackageKind {
    fn default() -> Self {
        PackageKind::Library
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageKind::Library => write!(f, "library"),
            PackageKind::Interface => write!(f, "interface"),
            PackageKind::Executable => write!(f, "executable"),
        }
    }
}

/// Whether a package's binary ABI depends on the build variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbiVariant {
    /// One binary per build variant
    PerConfig,
    /// A single binary usable by every variant
    AbiInvariant,
}

impl Default for AbiVariant {
    fn default() -> Self {
        AbiVariant::PerConfig
    }
}

/// A custom build variant contributed to the global registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CustomVariant {
    pub name: String,
    pub abi_group: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A parsed package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub kind: PackageKind,
    pub platform: PlatformConstraints,
    pub abi: AbiVariant,
    /// Declared variants, normalized; release and debug are implicit
    pub supported_variants: BTreeSet<String>,
    /// Empty means unconditionally eligible
    pub feature_requirements: BTreeSet<String>,
    /// Packages this one replaces when both are discovered
    pub overrides: BTreeSet<String>,
    pub kis_dependencies: Vec<KisDependency>,
    pub third_party_dependencies: Vec<ThirdPartyDependency>,
    pub custom_variants: Vec<CustomVariant>,
    /// Source globs, opaque to resolution
    pub sources: Vec<String>,
}

impl PackageManifest {
    /// A minimal manifest, mostly useful for tests and generated packages.
    pub fn new(name: impl Into<String>, version: impl Into<String>, kind: PackageKind) -> Self {
        PackageManifest {
            name: name.into(),
            version: version.into(),
            kind,
            platform: PlatformConstraints::default(),
            abi: AbiVariant::PerConfig,
            supported_variants: BTreeSet::new(),
            feature_requirements: BTreeSet::new(),
            overrides: BTreeSet::new(),
            kis_dependencies: Vec::new(),
            third_party_dependencies: Vec::new(),
            custom_variants: Vec::new(),
            sources: Vec::new(),
        }
    }

    /// Whether the package builds natively under `variant`.
    pub fn supports_variant(&self, variant: &str) -> bool {
        let variant = normalize_variant(variant);
        variant == RELEASE_VARIANT
            || variant == DEBUG_VARIANT
            || self.supported_variants.contains(&variant)
    }

    /// Every variant the package can be built in, implicit ones included.
    pub fn available_variants(&self) -> Vec<String> {
        let mut variants = vec![RELEASE_VARIANT.to_string(), DEBUG_VARIANT.to_string()];
        for v in &self.supported_variants {
            if !variants.contains(v) {
                variants.push(v.clone());
            }
        }
        variants
    }

    /// Whether the version string is strict semver.
    pub fn has_semver_version(&self) -> bool {
        semver::Version::parse(&self.version).is_ok()
    }

    /// First-party dependencies that carry a remote location.
    pub fn remote_declarations(&self) -> impl Iterator<Item = (&str, &RemoteSpec)> {
        self.kis_dependencies
            .iter()
            .filter_map(|d| d.remote.as_ref().map(|r| (d.name.as_str(), r)))
    }

    /// Deterministic digest of every declared field.
    pub fn fingerprint(&self) -> Digest {
        let mut fp = Fingerprint::with_domain("manifest");
        fp.update_str(&self.name)
            .update_str(&self.version)
            .update_str(&self.kind.to_string())
            .update_str(match self.abi {
                AbiVariant::PerConfig => "per-config",
                AbiVariant::AbiInvariant => "abi-invariant",
            });

        let p = &self.platform;
        fp.update_opt(p.platforms.as_ref().map(|v| v.join("\u{1f}")).as_deref())
            .update_set(p.exclude_platforms.iter().map(String::as_str))
            .update_opt(p.tags.as_ref().map(|v| v.join("\u{1f}")).as_deref())
            .update_set(p.exclude_tags.iter().map(String::as_str))
            .update_set(p.requires_tags.iter().map(String::as_str));

        fp.update_set(self.supported_variants.iter().map(String::as_str))
            .update_set(self.feature_requirements.iter().map(String::as_str))
            .update_set(self.overrides.iter().map(String::as_str));

        fp.update_str("deps");
        for dep in &self.kis_dependencies {
            fp.update_str(&dep.name)
                .update_opt(dep.remote.as_ref().map(|r| r.url.as_str()))
                .update_opt(dep.remote.as_ref().map(|r| r.tag.as_str()))
                .update_set(scope_strs(&dep.scope).iter().map(String::as_str))
                .update_opt(dep.visibility.map(|v| v.to_string()).as_deref());
        }

        fp.update_str("third-party");
        for dep in &self.third_party_dependencies {
            fp.update_str(&dep.name)
                .update_opt(dep.fetch.as_deref())
                .update_set(scope_strs(&dep.scope).iter().map(String::as_str))
                .update_opt(dep.visibility.map(|v| v.to_string()).as_deref());
        }

        fp.update_str("custom-variants");
        for cv in &self.custom_variants {
            fp.update_str(&cv.name)
                .update_str(&cv.abi_group)
                .update_opt(cv.description.as_deref());
        }

        fp.update_list(self.sources.iter().map(String::as_str));
        fp.finish()
    }
}

fn scope_strs(scopes: &[DependencyScope]) -> Vec<String> {
    scopes.iter().map(|s| s.to_string()).collect()
}

/// Errors produced while locating or parsing a manifest.
#[derive(Debug, Error, MietteDiagnostic)]
pub enum ManifestError {
    #[error("failed to read manifest {}", path.display())]
    #[diagnostic(code(kis::manifest::io))]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed manifest {}: {message}", path.display())]
    #[diagnostic(code(kis::manifest::syntax))]
    Syntax { path: PathBuf, message: String },

    #[error("invalid field `{field}` in {}: expected {expected}", path.display())]
    #[diagnostic(code(kis::manifest::invalid_field))]
    InvalidField {
        path: PathBuf,
        field: String,
        expected: String,
        found: String,
    },

    #[error("both {} and {} exist in {}", MANIFEST_NAME, MANIFEST_ALIAS, dir.display())]
    #[diagnostic(code(kis::manifest::ambiguous))]
    Ambiguous { dir: PathBuf },

    #[error("no {} or {} found in {}", MANIFEST_NAME, MANIFEST_ALIAS, dir.display())]
    #[diagnostic(code(kis::manifest::not_found))]
    NotFound { dir: PathBuf },
}

impl ManifestError {
    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            ManifestError::Read { path, source } => {
                Diagnostic::error(format!("failed to read manifest: {}", source))
                    .with_code("kis::manifest::io")
                    .with_location(path)
                    .with_suggestion("check the file permissions")
            }
            ManifestError::Syntax { path, message } => {
                Diagnostic::error("malformed package manifest")
                    .with_code("kis::manifest::syntax")
                    .with_location(path)
                    .with_context(message.clone())
                    .with_suggestion("fix the manifest so it matches the documented schema")
            }
            ManifestError::InvalidField {
                path,
                field,
                expected,
                found,
            } => Diagnostic::error(format!("invalid value for `{}`", field))
                .with_code("kis::manifest::invalid_field")
                .with_location(path)
                .with_context(format!("expected {}", expected))
                .with_context(format!("found {}", found))
                .with_suggestion(format!("correct the `{}` field", field)),
            ManifestError::Ambiguous { dir } => {
                Diagnostic::error("ambiguous package manifest")
                    .with_code("kis::manifest::ambiguous")
                    .with_location(dir)
                    .with_context(format!(
                        "both {} and {} are present",
                        MANIFEST_NAME, MANIFEST_ALIAS
                    ))
                    .with_suggestion("delete one of the two manifest files")
            }
            ManifestError::NotFound { dir } => Diagnostic::error("no package manifest found")
                .with_code("kis::manifest::not_found")
                .with_location(dir)
                .with_suggestion(format!("create {} in the package directory", MANIFEST_NAME)),
        }
    }
}

/// Locate the manifest file of a package directory.
///
/// Returns `Ok(None)` when the directory is not a package.
pub fn find_manifest(dir: &Path) -> Result<Option<PathBuf>, ManifestError> {
    let primary = dir.join(MANIFEST_NAME);
    let alias = dir.join(MANIFEST_ALIAS);

    match (primary.is_file(), alias.is_file()) {
        (true, true) => Err(ManifestError::Ambiguous {
            dir: dir.to_path_buf(),
        }),
        (true, false) => Ok(Some(primary)),
        (false, true) => Ok(Some(alias)),
        (false, false) => Ok(None),
    }
}

/// Reads a package directory into a manifest record.
pub trait ManifestReader: Send + Sync {
    /// Parse the manifest of the package rooted at `package_dir`.
    fn read(&self, package_dir: &Path) -> Result<PackageManifest, ManifestError>;
}

/// The file-based reader for `kis.toml` / `kis.package.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileManifestReader;

impl ManifestReader for FileManifestReader {
    fn read(&self, package_dir: &Path) -> Result<PackageManifest, ManifestError> {
        let path = find_manifest(package_dir)?.ok_or_else(|| ManifestError::NotFound {
            dir: package_dir.to_path_buf(),
        })?;
        let content = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        parse(&content, &path)
    }
}

/// Parse manifest content. The format is chosen from the file extension.
pub fn parse(content: &str, path: &Path) -> Result<PackageManifest, ManifestError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let raw: RawManifest = if is_json {
        serde_json::from_str(content).map_err(|e| ManifestError::Syntax {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        toml::from_str(content).map_err(|e| ManifestError::Syntax {
            path: path.to_path_buf(),
            message: e.to_string().trim_end().to_string(),
        })?
    };

    raw.into_manifest(path)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawManifest {
    package: RawPackage,

    #[serde(default)]
    platform: PlatformConstraints,

    #[serde(default)]
    dependencies: Vec<RawKisDependency>,

    #[serde(default)]
    third_party: Vec<RawThirdPartyDependency>,

    #[serde(default)]
    custom_variants: Vec<CustomVariant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct RawPackage {
    name: String,
    version: String,
    #[serde(default)]
    kind: PackageKind,
    #[serde(default)]
    abi: AbiVariant,
    #[serde(default)]
    variants: Vec<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    overrides: Vec<String>,
    #[serde(default)]
    sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawKisDependency {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    scope: Vec<DependencyScope>,
    #[serde(default)]
    visibility: Option<Visibility>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThirdPartyDependency {
    name: String,
    #[serde(default)]
    fetch: Option<String>,
    #[serde(default)]
    scope: Vec<DependencyScope>,
    #[serde(default)]
    visibility: Option<Visibility>,
}

impl RawManifest {
    fn into_manifest(self, path: &Path) -> Result<PackageManifest, ManifestError> {
        let invalid = |field: &str, expected: &str, found: String| ManifestError::InvalidField {
            path: path.to_path_buf(),
            field: field.to_string(),
            expected: expected.to_string(),
            found,
        };

        let pkg = self.package;
        let name = pkg.name.trim().to_string();
        if !is_valid_name(&name) {
            return Err(invalid(
                "package.name",
                "a non-empty name without whitespace or path separators",
                format!("`{}`", pkg.name),
            ));
        }

        if pkg.version.trim().is_empty() {
            return Err(invalid(
                "package.version",
                "a semver-like version string",
                "an empty string".to_string(),
            ));
        }

        let overrides: BTreeSet<String> = pkg.overrides.iter().map(|o| o.trim().to_string()).collect();
        if overrides.contains(&name) {
            return Err(invalid(
                "package.overrides",
                "names of other packages",
                format!("`{}` overriding itself", name),
            ));
        }
        if let Some(bad) = overrides.iter().find(|o| !is_valid_name(o)) {
            return Err(invalid(
                "package.overrides",
                "package names",
                format!("`{}`", bad),
            ));
        }

        let mut kis_dependencies = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies {
            if !is_valid_name(&dep.name) {
                return Err(invalid(
                    "dependencies.name",
                    "a package name",
                    format!("`{}`", dep.name),
                ));
            }
            if kis_dependencies
                .iter()
                .any(|d: &KisDependency| d.name == dep.name)
            {
                return Err(invalid(
                    "dependencies",
                    "each dependency listed once",
                    format!("`{}` listed twice", dep.name),
                ));
            }
            let remote = match (dep.url, dep.tag) {
                (Some(url), Some(tag)) if !url.trim().is_empty() && !tag.trim().is_empty() => {
                    Some(RemoteSpec {
                        url: url.trim().to_string(),
                        tag: tag.trim().to_string(),
                    })
                }
                (None, None) => None,
                (url, tag) => {
                    return Err(invalid(
                        "dependencies.url",
                        "`url` and `tag` both set or both absent",
                        format!(
                            "url = {:?}, tag = {:?} for `{}`",
                            url.unwrap_or_default(),
                            tag.unwrap_or_default(),
                            dep.name
                        ),
                    ))
                }
            };
            kis_dependencies.push(KisDependency {
                name: dep.name,
                remote,
                scope: dep.scope,
                visibility: dep.visibility,
            });
        }

        let mut third_party_dependencies = Vec::with_capacity(self.third_party.len());
        for dep in self.third_party {
            if dep.name.trim().is_empty() {
                return Err(invalid(
                    "third-party.name",
                    "a non-empty name",
                    "an empty string".to_string(),
                ));
            }
            third_party_dependencies.push(ThirdPartyDependency {
                name: dep.name,
                fetch: dep.fetch,
                scope: dep.scope,
                visibility: dep.visibility,
            });
        }

        for cv in &self.custom_variants {
            if cv.name.trim().is_empty() || cv.abi_group.trim().is_empty() {
                return Err(invalid(
                    "custom-variants",
                    "a non-empty `name` and `abi-group`",
                    format!("name = {:?}, abi-group = {:?}", cv.name, cv.abi_group),
                ));
            }
        }

        Ok(PackageManifest {
            name,
            version: pkg.version.trim().to_string(),
            kind: pkg.kind,
            platform: self.platform,
            abi: pkg.abi,
            supported_variants: pkg.variants.iter().map(|v| normalize_variant(v)).collect(),
            feature_requirements: pkg
                .features
                .into_iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            overrides,
            kis_dependencies,
            third_party_dependencies,
            custom_variants: self.custom_variants,
            sources: pkg.sources,
        })
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toml_path() -> PathBuf {
        PathBuf::from("pkgs/app/kis.toml")
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let content = r#"
[package]
name = "core"
version = "1.2.0"
"#;
        let manifest = parse(content, &toml_path()).unwrap();
        assert_eq!(manifest.name, "core");
        assert_eq!(manifest.kind, PackageKind::Library);
        assert_eq!(manifest.abi, AbiVariant::PerConfig);
        assert!(manifest.kis_dependencies.is_empty());
        assert_eq!(manifest.platform, PlatformConstraints::default());
        assert!(manifest.has_semver_version());
    }

    #[test]
    fn test_parse_full_manifest() {
        let content = r#"
[package]
name = "gpu_lib"
version = "0.3"
kind = "library"
abi = "per-config"
variants = ["release", "debug", "Profiling"]
features = ["gpu"]
overrides = ["cpu_lib"]
sources = ["src/**/*.cpp"]

[platform]
tags = ["linux", "windows"]
requires-tags = ["x86_64"]

[[dependencies]]
name = "core"

[[dependencies]]
name = "missing_lib"
url = "https://github.com/org/m.git"
tag = "v1"
scope = ["main", "tests"]
visibility = "public"

[[third-party]]
name = "zlib"
fetch = "https://zlib.net/zlib-1.3.1.tar.gz"

[[custom-variants]]
name = "tsan"
abi-group = "DEBUG"
description = "thread sanitizer"
"#;
        let manifest = parse(content, &toml_path()).unwrap();
        assert!(!manifest.has_semver_version());
        assert!(manifest.supported_variants.contains("profiling"));
        assert!(manifest.overrides.contains("cpu_lib"));
        assert_eq!(manifest.kis_dependencies.len(), 2);
        assert_eq!(
            manifest.kis_dependencies[1].remote,
            Some(RemoteSpec {
                url: "https://github.com/org/m.git".into(),
                tag: "v1".into()
            })
        );
        assert_eq!(
            manifest.kis_dependencies[1].visibility,
            Some(Visibility::Public)
        );
        assert_eq!(manifest.third_party_dependencies[0].name, "zlib");
        assert_eq!(manifest.custom_variants[0].abi_group, "DEBUG");
        assert_eq!(manifest.platform.requires_tags, vec!["x86_64"]);

        let remotes: Vec<_> = manifest.remote_declarations().map(|(n, _)| n).collect();
        assert_eq!(remotes, vec!["missing_lib"]);
    }

    #[test]
    fn test_parse_json_manifest() {
        let content = r#"{
  "package": { "name": "app", "version": "1.0.0", "kind": "executable" },
  "dependencies": [ { "name": "core" } ],
  "third-party": [ { "name": "fmt", "scope": ["tests"] } ]
}"#;
        let manifest = parse(content, Path::new("app/kis.package.json")).unwrap();
        assert_eq!(manifest.kind, PackageKind::Executable);
        assert_eq!(manifest.kis_dependencies[0].name, "core");
        assert_eq!(
            manifest.third_party_dependencies[0].scope,
            vec![DependencyScope::Tests]
        );
    }

    #[test]
    fn test_self_override_is_rejected() {
        let content = r#"
[package]
name = "core"
version = "1.0.0"
overrides = ["core"]
"#;
        let err = parse(content, &toml_path()).unwrap_err();
        match err {
            ManifestError::InvalidField { field, .. } => assert_eq!(field, "package.overrides"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_url_without_tag_is_rejected() {
        let content = r#"
[package]
name = "app"
version = "1.0.0"

[[dependencies]]
name = "net"
url = "https://github.com/org/net.git"
"#;
        let err = parse(content, &toml_path()).unwrap_err();
        assert!(err.to_string().contains("dependencies.url"));
    }

    #[test]
    fn test_invalid_kind_reports_expected_values() {
        let content = r#"
[package]
name = "app"
version = "1.0.0"
kind = "plugin"
"#;
        let err = parse(content, &toml_path()).unwrap_err();
        let diag = err.to_diagnostic().format(false);
        assert!(diag.contains("malformed package manifest"));
        assert!(diag.contains("plugin"));
    }

    #[test]
    fn test_missing_name_is_a_syntax_error() {
        let content = r#"
[package]
version = "1.0.0"
"#;
        let err = parse(content, &toml_path()).unwrap_err();
        assert!(matches!(err, ManifestError::Syntax { .. }));
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_implicit_variants() {
        let manifest = PackageManifest::new("core", "1.0.0", PackageKind::Library);
        assert!(manifest.supports_variant("release"));
        assert!(manifest.supports_variant("debug"));
        assert!(manifest.supports_variant(""));
        assert!(!manifest.supports_variant("profiling"));
        assert_eq!(manifest.available_variants(), vec!["release", "debug"]);
    }

    #[test]
    fn test_fingerprint_tracks_declared_fields() {
        let a = PackageManifest::new("core", "1.0.0", PackageKind::Library);
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.kis_dependencies.push(KisDependency::new("base"));
        assert_ne!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.feature_requirements.insert("gpu".into());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_find_manifest_ambiguous() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_NAME), "").unwrap();
        std::fs::write(tmp.path().join(MANIFEST_ALIAS), "{}").unwrap();

        assert!(matches!(
            find_manifest(tmp.path()),
            Err(ManifestError::Ambiguous { .. })
        ));
    }

    #[test]
    fn test_file_reader() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(MANIFEST_NAME),
            "[package]\nname = \"core\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();

        let manifest = FileManifestReader.read(tmp.path()).unwrap();
        assert_eq!(manifest.name, "core");

        let empty = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            FileManifestReader.read(empty.path()),
            Err(ManifestError::NotFound { .. })
        ));
    }
}
