//! Image discovery under a root directory.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// Walks a directory tree for image files.
#[derive(Debug, Clone)]
pub struct ImageSource {
    root: PathBuf,
}

impl ImageSource {
    const IMAGE_SUFFIXES: [&'static str; 4] = ["png", "jpeg", "jpg", "bmp"];

    /// The root is made absolute when possible; a missing root yields no paths.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree from scratch, yielding image files in file-name order.
    ///
    /// Hidden entries are skipped (hidden directories are not descended into)
    /// and unreadable entries are logged and skipped.
    pub fn paths(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|p| Self::is_image(p))
    }

    /// Whether the path carries a recognized image extension (case-insensitive).
    pub fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .is_some_and(|e| Self::IMAGE_SUFFIXES.contains(&e.as_str()))
    }
}

#[cfg(not(windows))]
fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_hidden(entry: &DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;

    entry
        .metadata()
        .map(|m| m.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    fn names(source: &ImageSource) -> Vec<String> {
        source
            .paths()
            .map(|p| {
                p.strip_prefix(source.root())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_is_image() {
        assert!(ImageSource::is_image(Path::new("a.jpg")));
        assert!(ImageSource::is_image(Path::new("a.JPEG")));
        assert!(ImageSource::is_image(Path::new("dir/a.Png")));
        assert!(ImageSource::is_image(Path::new("a.bmp")));
        assert!(!ImageSource::is_image(Path::new("a.gif")));
        assert!(!ImageSource::is_image(Path::new("a.txt")));
        assert!(!ImageSource::is_image(Path::new("jpg")));
    }

    #[test]
    fn test_paths_recurse_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("b.jpg"));
        touch(&root.join("a.png"));
        touch(&root.join("notes.txt"));
        touch(&root.join("nested/deeper/c.BMP"));
        touch(&root.join("nested/d.jpeg"));

        let source = ImageSource::new(root);
        assert_eq!(
            names(&source),
            vec!["a.png", "b.jpg", "nested/d.jpeg", "nested/deeper/c.BMP"]
        );
    }

    #[cfg(not(windows))]
    #[test]
    fn test_paths_skip_hidden_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("visible.jpg"));
        touch(&root.join(".hidden.jpg"));
        touch(&root.join(".cache/inside.jpg"));

        let source = ImageSource::new(root);
        assert_eq!(names(&source), vec!["visible.jpg"]);
    }

    #[test]
    fn test_paths_are_absolute_and_restartable() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("x.jpg"));

        let source = ImageSource::new(dir.path());
        let first: Vec<_> = source.paths().collect();
        let second: Vec<_> = source.paths().collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let source = ImageSource::new("/nonexistent/facefind/photos");
        assert_eq!(source.paths().count(), 0);
    }
}
