//! Per-image and per-face processing steps shared by indexing and matching.

use std::fmt;
use std::path::PathBuf;

use image::{imageops, RgbImage};
use thiserror::Error;

use crate::alignment::{self, NormalizeError, CANONICAL_SIZE};
use crate::context::ModelContext;
use crate::detector::DetectorError;
use crate::recognizer::EmbedderError;
use crate::types::{Embedding, FaceBox, FaceRegion};

/// Detections below this confidence never become faces.
pub const CONFIDENCE_FLOOR: f32 = 0.9;

/// Where in the pipeline a unit of work failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Decode,
    Detection,
    Normalization,
    Embedding,
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "read",
            Stage::Decode => "decode",
            Stage::Detection => "detection",
            Stage::Normalization => "normalization",
            Stage::Embedding => "embedding",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Failure of one image or one face. Logged and skipped by the index builder.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read image: {0}")]
    Read(#[from] std::io::Error),
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("face normalization failed: {0}")]
    Normalization(#[from] NormalizeError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),
    #[error("cannot write face thumbnail {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        source: image::ImageError,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Read(_) => Stage::Read,
            PipelineError::Decode(_) => Stage::Decode,
            PipelineError::Detection(_) => Stage::Detection,
            PipelineError::Normalization(_) => Stage::Normalization,
            PipelineError::Embedding(_) => Stage::Embedding,
            PipelineError::Persist { .. } => Stage::Persist,
        }
    }
}

/// A face ready for deduplication: its canonical crop and embedding.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub canonical: RgbImage,
    pub embedding: Embedding,
}

pub fn decode(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Regions that clear [`CONFIDENCE_FLOOR`], in detector order.
pub fn confident_regions(regions: &[FaceRegion]) -> impl Iterator<Item = &FaceRegion> {
    regions.iter().filter(|r| r.confidence >= CONFIDENCE_FLOOR)
}

/// Cut a face box out of the image, clamping it to the image bounds.
pub fn crop_region(image: &RgbImage, bbox: &FaceBox) -> Result<RgbImage, NormalizeError> {
    let (width, height) = image.dimensions();
    let clamp_x = |v: f32| (v.round() as i64).clamp(0, width as i64) as u32;
    let clamp_y = |v: f32| (v.round() as i64).clamp(0, height as i64) as u32;

    let left = clamp_x(bbox.left);
    let top = clamp_y(bbox.top);
    let right = clamp_x(bbox.left + bbox.width);
    let bottom = clamp_y(bbox.top + bbox.height);

    let crop_w = right.saturating_sub(left);
    let crop_h = bottom.saturating_sub(top);
    if crop_w == 0 || crop_h == 0 {
        return Err(NormalizeError::Degenerate {
            width: crop_w,
            height: crop_h,
        });
    }

    Ok(imageops::crop_imm(image, left, top, crop_w, crop_h).to_image())
}

/// Crop, align by the eye keypoints and resize to the canonical input size.
pub fn canonical_face(image: &RgbImage, region: &FaceRegion) -> Result<RgbImage, NormalizeError> {
    let crop = crop_region(image, &region.bbox)?;
    let aligned = alignment::align(&crop, region.keypoints.left_eye, region.keypoints.right_eye)?;
    alignment::resize_preserving_aspect(&aligned, CANONICAL_SIZE)
}

/// Run normalization and embedding for one detected face.
pub fn embed_region(
    ctx: &ModelContext,
    image: &RgbImage,
    region: &FaceRegion,
) -> Result<FaceSample, PipelineError> {
    let canonical = canonical_face(image, region)?;
    let embedding = ctx.embedder().embed(&canonical)?;
    Ok(FaceSample {
        canonical,
        embedding,
    })
}
