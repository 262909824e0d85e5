//! facefind-core: face indexing and matching engine.
//!
//! Walks an image folder, detects and aligns faces, embeds them into
//! fixed-length vectors, deduplicates repeated images and faces by content
//! hash, and matches a query face against the resulting index.

pub mod alignment;
pub mod context;
pub mod dedup;
pub mod detector;
pub mod export;
pub mod index;
pub mod matcher;
pub mod metadata;
pub mod pipeline;
pub mod recognizer;
pub mod source;
pub mod types;

use std::path::PathBuf;

pub use context::{ModelContext, Serialized};
pub use dedup::{Deduplicator, IdentityRegistry};
pub use detector::FaceDetector;
pub use export::copy_matched_images;
pub use index::{
    BuildConfig, BuildEvent, BuildObserver, BuildOutcome, BuildState, IndexBuilder, IndexError,
};
pub use matcher::{MatchEngine, MatchError, DEFAULT_MATCH_THRESHOLD};
pub use metadata::CaptureMetadata;
pub use recognizer::Embedder;
pub use source::ImageSource;
pub use types::{
    Embedding, FaceBox, FaceEntry, FaceIndex, FaceRegion, ImageRecord, Keypoints, MatchResult,
};

/// Default location of the ONNX model files: `$XDG_DATA_HOME/facefind/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facefind")
        .join("models")
}
