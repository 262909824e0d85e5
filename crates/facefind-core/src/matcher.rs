//! Query matching against a built [`FaceIndex`].

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::context::ModelContext;
use crate::detector::DetectorError;
use crate::pipeline;
use crate::recognizer::EmbedderError;
use crate::types::{thumbnail_name, Embedding, FaceIndex, MatchResult};

/// Cosine distance under which a stored face matches a query face.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.75;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("cannot read query image {}: {source}", path.display())]
    QueryRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode query image {}: {source}", path.display())]
    QueryDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("face detection failed on query: {0}")]
    Detection(#[from] DetectorError),
    #[error("embedding failed on query: {0}")]
    Embedding(#[from] EmbedderError),
}

/// Compares one probe embedding against every face of an index.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, index: &FaceIndex, threshold: f32) -> Vec<MatchResult>;
}

/// Accepts every stored face whose cosine distance to the probe is below the threshold.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, index: &FaceIndex, threshold: f32) -> Vec<MatchResult> {
        if probe.is_empty() {
            return Vec::new();
        }

        index
            .faces()
            .filter(|(_, face)| !face.embedding.is_empty())
            .filter_map(|(record, face)| {
                let distance = probe.cosine_distance(&face.embedding);
                (distance < threshold).then(|| MatchResult {
                    image_hash: record.hash.clone(),
                    file_name: record.file_name.clone(),
                    embedding: face.embedding.clone(),
                    similarity: (1.0 - distance).clamp(0.0, 1.0),
                    distance,
                    thumbnail: thumbnail_name(&record.hash, face.sequence),
                    query_face: 0,
                })
            })
            .collect()
    }
}

/// Runs the face pipeline on a query image and matches each face against an index.
pub struct MatchEngine {
    ctx: ModelContext,
}

impl MatchEngine {
    pub fn new(ctx: ModelContext) -> Self {
        Self { ctx }
    }

    /// Match every confident face of the image at `query` against `index`.
    ///
    /// Results carry no particular order.
    pub fn find_matches(
        &self,
        query: &Path,
        index: &FaceIndex,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let bytes = std::fs::read(query).map_err(|source| MatchError::QueryRead {
            path: query.to_path_buf(),
            source,
        })?;
        let image = image::load_from_memory(&bytes)
            .map_err(|source| MatchError::QueryDecode {
                path: query.to_path_buf(),
                source,
            })?
            .to_rgb8();

        let matches = self.find_matches_in(&image, index, threshold)?;
        tracing::info!(
            query = %query.display(),
            matches = matches.len(),
            threshold,
            "query matched"
        );
        Ok(matches)
    }

    /// Like [`find_matches`](Self::find_matches) on an already decoded image.
    pub fn find_matches_in(
        &self,
        image: &RgbImage,
        index: &FaceIndex,
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let regions = self.ctx.detector().detect(image)?;
        if regions.is_empty() {
            tracing::debug!("no faces in query image");
            return Ok(Vec::new());
        }

        let mut matches = Vec::new();
        for (n, region) in pipeline::confident_regions(&regions).enumerate() {
            let canonical = match pipeline::canonical_face(image, region) {
                Ok(canonical) => canonical,
                Err(e) => {
                    tracing::warn!(face = n, error = %e, "skipping degenerate query face");
                    continue;
                }
            };
            let embedding = self.ctx.embedder().embed(&canonical)?;

            matches.extend(
                CosineMatcher
                    .compare(&embedding, index, threshold)
                    .into_iter()
                    .map(|m| MatchResult { query_face: n, ..m }),
            );
        }
        Ok(matches)
    }
}
