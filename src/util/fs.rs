//! Filesystem utilities and the package enumeration probe.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use walkdir::WalkDir;

use crate::core::manifest::{MANIFEST_ALIAS, MANIFEST_NAME};

/// Directory listing used for package discovery.
///
/// Implementations only look at names and file types. Manifest contents are
/// read through [`crate::core::manifest::ManifestReader`].
pub trait FileSystemProbe: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;

    /// Whether `dir` holds a package manifest.
    fn is_package_dir(&self, dir: &Path) -> bool;

    /// Package directories under `root`, in a stable order.
    ///
    /// Directories in `exclude` are skipped entirely, as are hidden directories
    /// and `target/`. The walk does not descend into a package directory other
    /// than `root` itself.
    fn package_dirs(&self, root: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>>;
}

/// [`FileSystemProbe`] backed by `walkdir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkDirProbe;

impl FileSystemProbe for WalkDirProbe {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_package_dir(&self, dir: &Path) -> bool {
        dir.join(MANIFEST_NAME).is_file() || dir.join(MANIFEST_ALIAS).is_file()
    }

    fn package_dirs(&self, root: &Path, exclude: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        if !root.is_dir() {
            return Ok(dirs);
        }

        let mut it = WalkDir::new(root).sort_by_file_name().into_iter();
        while let Some(entry) = it.next() {
            let entry =
                entry.with_context(|| format!("failed to scan directory: {}", root.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            if entry.depth() > 0 {
                let name = entry.file_name().to_string_lossy();
                if name.starts_with('.') || name == "target" || exclude.iter().any(|e| e == path)
                {
                    it.skip_current_dir();
                    continue;
                }
            }

            if self.is_package_dir(path) {
                dirs.push(path.to_path_buf());
                if entry.depth() > 0 {
                    it.skip_current_dir();
                }
            }
        }

        Ok(dirs)
    }
}

/// Remove a directory and all its contents, if it exists.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Write a string to a file, creating parent directories if needed.
pub fn write_string(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write file: {}", path.display()))
}

/// Files matching glob patterns relative to `base`, sorted.
pub fn glob_files(base: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();

    for pattern in patterns {
        let full_pattern = base.join(pattern);
        let pattern_str = full_pattern.to_string_lossy();

        for entry in
            glob(&pattern_str).with_context(|| format!("invalid glob pattern: {}", pattern))?
        {
            match entry {
                Ok(path) if path.is_file() => results.push(path),
                Ok(_) => {}
                Err(e) => tracing::warn!("glob error: {}", e),
            }
        }
    }

    results.sort();
    results.dedup();
    Ok(results)
}

/// Canonicalize a path, falling back to the path itself.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Relative path from `base` to `path`.
pub fn relative_path(base: &Path, path: &Path) -> PathBuf {
    pathdiff::diff_paths(path, base).unwrap_or_else(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_package(dir: &Path, file: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(file), "").unwrap();
    }

    #[test]
    fn test_glob_files() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.c"), "int main() {}").unwrap();
        fs::write(src.join("util.c"), "void util() {}").unwrap();
        fs::write(src.join("readme.txt"), "readme").unwrap();

        let files = glob_files(tmp.path(), &["src/**/*.c".to_string()]).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_package_dirs_are_sorted_and_skip_nested() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_package(&root.join("libs/core"), MANIFEST_NAME);
        make_package(&root.join("app"), MANIFEST_ALIAS);
        make_package(&root.join("libs/core/vendor/inner"), MANIFEST_NAME);
        make_package(&root.join(".hidden/pkg"), MANIFEST_NAME);
        make_package(&root.join("target/pkg"), MANIFEST_NAME);
        make_package(&root.join("platform/linux/io"), MANIFEST_NAME);

        let dirs = WalkDirProbe
            .package_dirs(root, &[root.join("platform")])
            .unwrap();
        assert_eq!(dirs, vec![root.join("app"), root.join("libs/core")]);
    }

    #[test]
    fn test_root_package_does_not_stop_the_walk() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        make_package(root, MANIFEST_NAME);
        make_package(&root.join("core"), MANIFEST_NAME);

        let dirs = WalkDirProbe.package_dirs(root, &[]).unwrap();
        assert_eq!(dirs, vec![root.to_path_buf(), root.join("core")]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let dirs = WalkDirProbe
            .package_dirs(&tmp.path().join("platform/linux"), &[])
            .unwrap();
        assert!(dirs.is_empty());
    }
}
