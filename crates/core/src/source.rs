//! Source provider abstraction for filesystem-independent parsing.
//!
//! The [`SourceProvider`] trait abstracts import lookup and file reading so
//! the registry can be driven from an in-memory corpus in tests. The
//! default [`Filesystem`] searches the current directory, the system
//! import directory, then each user include directory, in that order.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// File I/O as seen by the registry.
pub trait SourceProvider {
    /// Find a file by bare name on the search path. Only regular files
    /// match.
    fn locate(&self, name: &str) -> Option<PathBuf>;

    /// Read the source text behind a located (or caller-supplied) path.
    fn read_source(&self, path: &Path) -> std::io::Result<String>;
}

/// Search-path backed provider.
pub struct Filesystem {
    paths: Vec<PathBuf>,
}

impl Filesystem {
    /// Build the search path: current directory, system root, user include
    /// directories. Empty entries are dropped and trailing slashes
    /// stripped.
    pub fn new(sysroot: &str, user: &[String]) -> Self {
        let mut raw = Vec::with_capacity(user.len() + 2);
        raw.push(".".to_owned());
        raw.push(sysroot.to_owned());
        raw.extend(user.iter().cloned());

        let paths = raw
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|mut p| {
                while p.len() > 1 && p.ends_with('/') {
                    p.pop();
                }
                PathBuf::from(p)
            })
            .collect();

        Filesystem { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl SourceProvider for Filesystem {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        for path in &self.paths {
            let candidate = path.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn read_source(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path)
    }
}

/// In-memory provider for tests: file name to source text.
pub struct InMemoryProvider {
    files: HashMap<String, String>,
}

impl InMemoryProvider {
    pub fn new(files: HashMap<String, String>) -> Self {
        InMemoryProvider { files }
    }

    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        InMemoryProvider {
            files: pairs
                .iter()
                .map(|(name, text)| ((*name).to_owned(), (*text).to_owned()))
                .collect(),
        }
    }
}

impl SourceProvider for InMemoryProvider {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        self.files.contains_key(name).then(|| PathBuf::from(name))
    }

    fn read_source(&self, path: &Path) -> std::io::Result<String> {
        let key = path.to_string_lossy();
        self.files.get(key.as_ref()).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("file not found in memory: {}", key),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_normalisation() {
        let fs = Filesystem::new(
            "/usr/include/nyx/",
            &["".to_owned(), "extra/dir//".to_owned()],
        );
        let paths: Vec<String> = fs
            .paths()
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(paths, vec![".", "/usr/include/nyx", "extra/dir"]);
    }

    #[test]
    fn locate_finds_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.nyx");
        std::fs::write(&path, "@namespace t\n").unwrap();
        let fs = Filesystem::new(
            dir.path().to_str().unwrap(),
            &[],
        );
        assert_eq!(fs.locate("probe.nyx"), Some(path));
        assert_eq!(fs.locate("absent.nyx"), None);
    }

    #[test]
    fn locate_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub.nyx")).unwrap();
        let fs = Filesystem::new(dir.path().to_str().unwrap(), &[]);
        assert_eq!(fs.locate("sub.nyx"), None);
    }

    #[test]
    fn in_memory_round_trip() {
        let provider = InMemoryProvider::from_pairs(&[("a.nyx", "@namespace a\n")]);
        let path = provider.locate("a.nyx").unwrap();
        assert_eq!(provider.read_source(&path).unwrap(), "@namespace a\n");
        assert!(provider.locate("b.nyx").is_none());
        assert!(provider.read_source(Path::new("b.nyx")).is_err());
    }
}
