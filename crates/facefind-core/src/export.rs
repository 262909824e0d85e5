//! Copying matched source images out of the corpus.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{FaceIndex, MatchResult};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("cannot create destination {}: {source}", path.display())]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Copy every source image with a match at or above `min_similarity` into `dest`.
///
/// Each image is copied once, under its original file name. When two matched
/// images share a file name the first one wins and the other is logged.
/// Per-file failures are logged and skipped. Returns the number of files copied.
pub fn copy_matched_images(
    matches: &[MatchResult],
    index: &FaceIndex,
    min_similarity: f32,
    dest: &Path,
) -> Result<usize, ExportError> {
    std::fs::create_dir_all(dest).map_err(|source| ExportError::Destination {
        path: dest.to_path_buf(),
        source,
    })?;

    let mut handled: HashSet<&str> = HashSet::new();
    let mut names: HashSet<&str> = HashSet::new();
    let mut copied = 0;

    for m in matches.iter().filter(|m| m.similarity >= min_similarity) {
        if !handled.insert(m.image_hash.as_str()) {
            continue;
        }
        let Some(record) = index.get(&m.image_hash) else {
            tracing::warn!(image = %m.image_hash, "matched image missing from index");
            continue;
        };
        if !names.insert(record.file_name.as_str()) {
            tracing::warn!(
                path = %record.path.display(),
                name = %record.file_name,
                "destination name already taken by another matched image, not copied"
            );
            continue;
        }

        let target = dest.join(&record.file_name);
        match std::fs::copy(&record.path, &target) {
            Ok(_) => {
                tracing::debug!(from = %record.path.display(), to = %target.display(), "copied");
                copied += 1;
            }
            Err(e) => tracing::warn!(
                from = %record.path.display(),
                to = %target.display(),
                error = %e,
                "copy failed"
            ),
        }
    }

    tracing::info!(copied, dest = %dest.display(), "copied matched images");
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{thumbnail_name, Embedding, FaceEntry, ImageRecord};

    fn record(dir: &Path, hash: &str, name: &str, write: bool) -> ImageRecord {
        let path = dir.join(name);
        if write {
            std::fs::write(&path, hash.as_bytes()).unwrap();
        }
        ImageRecord {
            hash: hash.into(),
            file_name: name.into(),
            path,
            metadata: None,
            faces: vec![FaceEntry {
                hash: format!("face-{hash}"),
                embedding: Embedding::new(vec![1.0]),
                sequence: 1,
                thumbnail: PathBuf::from(thumbnail_name(hash, 1)),
            }],
        }
    }

    fn hit(record: &ImageRecord, similarity: f32) -> MatchResult {
        MatchResult {
            image_hash: record.hash.clone(),
            file_name: record.file_name.clone(),
            embedding: Embedding::new(vec![1.0]),
            similarity,
            distance: 1.0 - similarity,
            thumbnail: thumbnail_name(&record.hash, 1),
            query_face: 0,
        }
    }

    #[test]
    fn test_copy_filters_and_deduplicates() {
        let corpus = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let a = record(corpus.path(), "aaa", "a.jpg", true);
        let b = record(corpus.path(), "bbb", "b.jpg", true);
        let matches = vec![hit(&a, 0.9), hit(&a, 0.95), hit(&b, 0.3)];
        let index: FaceIndex = vec![a, b].into_iter().collect();

        let copied = copy_matched_images(&matches, &index, 0.5, dest.path()).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(std::fs::read(dest.path().join("a.jpg")).unwrap(), b"aaa");
        assert!(!dest.path().join("b.jpg").exists());
    }

    #[test]
    fn test_copy_name_collision_keeps_first_image() {
        let corpus = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(corpus.path().join("2023")).unwrap();
        std::fs::create_dir_all(corpus.path().join("2024")).unwrap();
        let older = record(&corpus.path().join("2023"), "old", "IMG_0001.jpg", true);
        let newer = record(&corpus.path().join("2024"), "new", "IMG_0001.jpg", true);
        let matches = vec![hit(&older, 0.9), hit(&newer, 0.8), hit(&older, 0.7)];
        let index: FaceIndex = vec![older, newer].into_iter().collect();

        let copied = copy_matched_images(&matches, &index, 0.5, dest.path()).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(std::fs::read(dest.path().join("IMG_0001.jpg")).unwrap(), b"old");
    }

    #[test]
    fn test_copy_threshold_is_inclusive() {
        let corpus = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let a = record(corpus.path(), "aaa", "a.jpg", true);
        let matches = vec![hit(&a, 0.5)];
        let index: FaceIndex = vec![a].into_iter().collect();

        assert_eq!(copy_matched_images(&matches, &index, 0.5, dest.path()).unwrap(), 1);
    }

    #[test]
    fn test_copy_skips_missing_sources() {
        let corpus = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let gone = record(corpus.path(), "ggg", "gone.jpg", false);
        let kept = record(corpus.path(), "kkk", "kept.jpg", true);
        let matches = vec![hit(&gone, 0.9), hit(&kept, 0.9)];
        let index: FaceIndex = vec![gone, kept].into_iter().collect();

        let copied = copy_matched_images(&matches, &index, 0.5, dest.path()).unwrap();
        assert_eq!(copied, 1);
        assert!(dest.path().join("kept.jpg").exists());
    }

    #[test]
    fn test_copy_creates_destination() {
        let corpus = tempfile::tempdir().unwrap();
        let dest = corpus.path().join("out/matches");
        let a = record(corpus.path(), "aaa", "a.jpg", true);
        let matches = vec![hit(&a, 1.0)];
        let index: FaceIndex = vec![a].into_iter().collect();

        assert_eq!(copy_matched_images(&matches, &index, 0.0, &dest).unwrap(), 1);
        assert!(dest.join("a.jpg").exists());
    }
}
