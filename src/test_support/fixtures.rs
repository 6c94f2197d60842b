//! Workspace fixtures for tests.

use std::fs;
use std::path::{Path, PathBuf};

/// Write `content` as `<root>/<rel>/kis.toml` and return the package directory.
pub fn write_package(root: &Path, rel: &str, content: &str) -> PathBuf {
    let dir = if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    };
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("kis.toml"), content).unwrap();
    dir
}

/// Minimal library manifest with name-only first-party dependencies.
pub fn manifest_toml(name: &str, deps: &[&str]) -> String {
    PackageFixture::new(name).deps(deps).to_toml()
}

/// Builder for manifest text.
#[derive(Debug, Clone)]
pub struct PackageFixture {
    name: String,
    kind: String,
    abi: Option<String>,
    variants: Vec<String>,
    features: Vec<String>,
    overrides: Vec<String>,
    sources: Vec<String>,
    platform: Vec<(String, Vec<String>)>,
    deps: Vec<(String, Option<String>)>,
    third_party: Vec<String>,
    custom_variants: Vec<(String, String)>,
}

fn list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{}\"", s)).collect();
    format!("[{}]", quoted.join(", "))
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl PackageFixture {
    pub fn new(name: &str) -> Self {
        PackageFixture {
            name: name.to_string(),
            kind: "library".to_string(),
            abi: None,
            variants: Vec::new(),
            features: Vec::new(),
            overrides: Vec::new(),
            sources: Vec::new(),
            platform: Vec::new(),
            deps: Vec::new(),
            third_party: Vec::new(),
            custom_variants: Vec::new(),
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_string();
        self
    }

    pub fn abi_invariant(mut self) -> Self {
        self.abi = Some("abi-invariant".to_string());
        self
    }

    pub fn variants(mut self, variants: &[&str]) -> Self {
        self.variants = owned(variants);
        self
    }

    pub fn features(mut self, features: &[&str]) -> Self {
        self.features = owned(features);
        self
    }

    pub fn overrides(mut self, overrides: &[&str]) -> Self {
        self.overrides = owned(overrides);
        self
    }

    pub fn sources(mut self, sources: &[&str]) -> Self {
        self.sources = owned(sources);
        self
    }

    /// Add a `[platform]` key such as `requires-tags`.
    pub fn platform(mut self, key: &str, values: &[&str]) -> Self {
        self.platform.push((key.to_string(), owned(values)));
        self
    }

    pub fn deps(mut self, deps: &[&str]) -> Self {
        for dep in deps {
            self.deps.push((dep.to_string(), None));
        }
        self
    }

    pub fn dep_with_visibility(mut self, dep: &str, visibility: &str) -> Self {
        self.deps.push((dep.to_string(), Some(visibility.to_string())));
        self
    }

    pub fn third_party(mut self, names: &[&str]) -> Self {
        self.third_party.extend(owned(names));
        self
    }

    pub fn custom_variant(mut self, name: &str, group: &str) -> Self {
        self.custom_variants
            .push((name.to_string(), group.to_string()));
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = format!(
            "[package]\nname = \"{}\"\nversion = \"1.0.0\"\nkind = \"{}\"\n",
            self.name, self.kind
        );
        if let Some(abi) = &self.abi {
            out.push_str(&format!("abi = \"{}\"\n", abi));
        }
        for (key, values) in [
            ("variants", &self.variants),
            ("features", &self.features),
            ("overrides", &self.overrides),
            ("sources", &self.sources),
        ] {
            if !values.is_empty() {
                out.push_str(&format!("{} = {}\n", key, list(values)));
            }
        }
        if !self.platform.is_empty() {
            out.push_str("\n[platform]\n");
            for (key, values) in &self.platform {
                out.push_str(&format!("{} = {}\n", key, list(values)));
            }
        }
        for (dep, visibility) in &self.deps {
            out.push_str(&format!("\n[[dependencies]]\nname = \"{}\"\n", dep));
            if let Some(v) = visibility {
                out.push_str(&format!("visibility = \"{}\"\n", v));
            }
        }
        for name in &self.third_party {
            out.push_str(&format!("\n[[third-party]]\nname = \"{}\"\n", name));
        }
        for (name, group) in &self.custom_variants {
            out.push_str(&format!(
                "\n[[custom-variants]]\nname = \"{}\"\nabi-group = \"{}\"\n",
                name, group
            ));
        }
        out
    }

    /// Write the manifest under `<root>/<rel>`.
    pub fn write(&self, root: &Path, rel: &str) -> PathBuf {
        write_package(root, rel, &self.to_toml())
    }
}
