//! Maps the argument of an `import` statement to a file on disk.

use std::path::{Path, PathBuf};

use crate::trace::Trace;


#[derive(Debug, PartialEq, Clone)]
pub struct Package {
    pub name: String,
    pub root: PathBuf,
    /// Directory holding the package sources, relative to `root`.
    pub source_dir: Option<String>,
}

/// Looks up installed packages by name.
pub trait PackageResolver {
    fn resolve_package(&self, name: &str) -> Option<Package>;
}

/// Knows no packages, so every bare import falls back to the working
/// directory.
pub struct NoPackages;

impl PackageResolver for NoPackages {
    fn resolve_package(&self, _name: &str) -> Option<Package> {
        None
    }
}

fn with_source_extension(path: &str) -> String {
    if Path::new(path).extension().is_some() {
        path.to_string()
    } else {
        format!("{}.cffc", path)
    }
}

pub fn is_explicit(path: &str) -> bool {
    path.starts_with("./") || path.starts_with("../") || path.starts_with('/')
}

/// `pkg/inner/file` resolves inside package `pkg`. A bare `pkg` resolves
/// to the file named after the package.
pub fn resolve_import_path(
    path: &str,
    working_dir: &Path,
    resolver: &dyn PackageResolver,
    trace: &mut dyn Trace,
) -> PathBuf {
    if is_explicit(path) {
        return working_dir.join(path);
    }

    let (name, rest) = match path.split_once('/') {
        Some((name, rest)) => (name, rest),
        None => (path, path),
    };

    match resolver.resolve_package(name) {
        Some(Package { name, root, source_dir }) => {
            let source_dir = source_dir.unwrap_or_else(|| {
                trace.event(&format!(
                    "package `{}` has no configured source directory, using src/", name));
                "src".to_string()
            });
            root.join(source_dir).join(with_source_extension(rest))
        }
        None => working_dir.join(with_source_extension(path)),
    }
}
