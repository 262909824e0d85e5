use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metadata::CaptureMetadata;

/// Axis-aligned face box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Facial keypoints reported by the detector, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoints {
    pub left_eye: (f32, f32),
    pub right_eye: (f32, f32),
    pub nose: Option<(f32, f32)>,
    pub mouth_left: Option<(f32, f32)>,
    pub mouth_right: Option<(f32, f32)>,
}

impl Keypoints {
    /// Keypoints carrying only the two eyes.
    pub fn eyes(left_eye: (f32, f32), right_eye: (f32, f32)) -> Self {
        Self {
            left_eye,
            right_eye,
            nose: None,
            mouth_left: None,
            mouth_right: None,
        }
    }
}

/// One face found by a [`FaceDetector`](crate::FaceDetector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub bbox: FaceBox,
    pub keypoints: Keypoints,
}

/// Face embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding, when known.
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw little-endian bytes of the vector; the input to the face identity hash.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Zero-norm vectors compare as 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            (dot / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    /// Cosine distance, `1 - similarity`, in [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// A deduplicated face stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEntry {
    /// SHA-256 hex digest of the embedding bytes.
    pub hash: String,
    pub embedding: Embedding,
    /// 1-based position among the kept faces of the parent image.
    pub sequence: usize,
    /// Saved canonical face thumbnail.
    pub thumbnail: PathBuf,
}

/// A unique image that contained at least one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// SHA-256 hex digest of the raw file bytes.
    pub hash: String,
    pub file_name: String,
    pub path: PathBuf,
    pub metadata: Option<CaptureMetadata>,
    pub faces: Vec<FaceEntry>,
}

/// Face index produced by one build run, keyed by image hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceIndex {
    records: HashMap<String, ImageRecord>,
}

impl FaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, returning `false` (and leaving the index untouched)
    /// when its identity is already present.
    pub fn insert(&mut self, record: ImageRecord) -> bool {
        if self.records.contains_key(&record.hash) {
            return false;
        }
        self.records.insert(record.hash.clone(), record);
        true
    }

    pub fn get(&self, hash: &str) -> Option<&ImageRecord> {
        self.records.get(hash)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.values()
    }

    /// Every stored face paired with its parent image.
    pub fn faces(&self) -> impl Iterator<Item = (&ImageRecord, &FaceEntry)> {
        self.records
            .values()
            .flat_map(|record| record.faces.iter().map(move |face| (record, face)))
    }

    pub fn face_count(&self) -> usize {
        self.records.values().map(|r| r.faces.len()).sum()
    }
}

impl FromIterator<ImageRecord> for FaceIndex {
    fn from_iter<I: IntoIterator<Item = ImageRecord>>(iter: I) -> Self {
        let mut index = FaceIndex::new();
        for record in iter {
            index.insert(record);
        }
        index
    }
}

/// A stored face whose distance to a query face fell under the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub image_hash: String,
    pub file_name: String,
    pub embedding: Embedding,
    /// `1 - cosine_distance`, clamped to [0, 1].
    pub similarity: f32,
    pub distance: f32,
    /// Thumbnail file name, `{image_hash}_{sequence}.png`.
    pub thumbnail: String,
    /// Which detected face of the query image produced this match.
    pub query_face: usize,
}

/// SHA-256 hex digest used for image and face identities.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// File name of the persisted canonical face thumbnail.
pub fn thumbnail_name(image_hash: &str, sequence: usize) -> String {
    format!("{image_hash}_{sequence}.png")
}
