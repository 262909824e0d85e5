//! Content-addressed identity registries for one index-build run.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::types::{content_hash, Embedding};

/// A set of seen content hashes with an atomic check-and-insert.
///
/// Identities are never removed once registered.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    seen: Mutex<HashSet<String>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash `bytes` and mark the digest as seen.
    ///
    /// Returns the digest and whether this call was the one that inserted it.
    pub fn register(&self, bytes: &[u8]) -> (String, bool) {
        let hash = content_hash(bytes);
        let inserted = self.register_hash(&hash);
        (hash, inserted)
    }

    /// Mark an already computed digest as seen.
    pub fn register_hash(&self, hash: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(hash) {
            false
        } else {
            seen.insert(hash.to_string())
        }
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(hash)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whole-image and per-face registries, locked independently.
#[derive(Debug, Default)]
pub struct Deduplicator {
    images: IdentityRegistry,
    faces: IdentityRegistry,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register raw image file bytes.
    pub fn register_image(&self, bytes: &[u8]) -> (String, bool) {
        self.images.register(bytes)
    }

    /// Register a face by the raw bytes of its embedding.
    pub fn register_face(&self, embedding: &Embedding) -> (String, bool) {
        self.faces.register(&embedding.to_bytes())
    }

    pub fn images(&self) -> &IdentityRegistry {
        &self.images
    }

    pub fn faces(&self) -> &IdentityRegistry {
        &self.faces
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_register_reports_first_insert_only() {
        let registry = IdentityRegistry::new();
        let (h1, new1) = registry.register(b"photo");
        let (h2, new2) = registry.register(b"photo");
        assert!(new1);
        assert!(!new2);
        assert_eq!(h1, h2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_image_and_face_sets_are_disjoint() {
        let dedup = Deduplicator::new();
        let embedding = Embedding::new(vec![0.5, 0.25]);
        let bytes = embedding.to_bytes();

        let (_, image_new) = dedup.register_image(&bytes);
        let (_, face_new) = dedup.register_face(&embedding);
        assert!(image_new);
        assert!(face_new, "a face must not collide with an image of equal bytes");
    }

    #[test]
    fn test_face_identity_tracks_embedding_bits() {
        let dedup = Deduplicator::new();
        let (_, a) = dedup.register_face(&Embedding::new(vec![1.0, 2.0]));
        let (_, b) = dedup.register_face(&Embedding::new(vec![1.0, 2.0]));
        let (_, c) = dedup.register_face(&Embedding::new(vec![1.0, 2.000001]));
        assert!(a);
        assert!(!b);
        assert!(c);
    }

    #[test]
    fn test_concurrent_register_inserts_once() {
        let registry = Arc::new(IdentityRegistry::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    for i in 0..200u32 {
                        let (_, inserted) = registry.register(&i.to_le_bytes());
                        if inserted {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 200);
        assert_eq!(registry.len(), 200);
    }
}
