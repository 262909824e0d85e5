//! Face embedding: the [`Embedder`] capability and an ONNX Runtime implementation.
//!
//! The default model is an ArcFace-style network (w600k_r50, 512-dim output,
//! 112x112 RGB input). Canonical 224x224 faces are downscaled to the model's
//! input size before inference.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::Embedding;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // ArcFace uses symmetric normalization
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Maps a canonical face image to a fixed-length vector.
///
/// Must be deterministic: identical input yields a bit-identical vector,
/// which is what makes embedding-hash deduplication work. Shared across
/// workers like [`FaceDetector`](crate::FaceDetector).
pub trait Embedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError>;
}

/// Embedding model settings.
#[derive(Debug, Clone)]
pub struct OnnxEmbedderConfig {
    pub input_size: u32,
    pub mean: f32,
    pub std: f32,
    pub dimension: usize,
    pub model_version: String,
    /// L2-normalize the raw output.
    pub normalize: bool,
}

impl Default for OnnxEmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: ARCFACE_INPUT_SIZE,
            mean: ARCFACE_MEAN,
            std: ARCFACE_STD,
            dimension: ARCFACE_EMBEDDING_DIM,
            model_version: ARCFACE_MODEL_VERSION.to_string(),
            normalize: true,
        }
    }
}

pub struct OnnxEmbedder {
    session: Mutex<Session>,
    config: OnnxEmbedderConfig,
}

impl OnnxEmbedder {
    /// Load an ArcFace-compatible ONNX model with default settings.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        Self::load_with(model_path, OnnxEmbedderConfig::default())
    }

    pub fn load_with(model_path: &Path, config: OnnxEmbedderConfig) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            input_size = config.input_size,
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    /// Resize to the model input and convert to a normalized NCHW tensor.
    fn preprocess(face: &RgbImage, config: &OnnxEmbedderConfig) -> Array4<f32> {
        let size = config.input_size;
        let resized;
        let face = if face.dimensions() == (size, size) {
            face
        } else {
            resized = imageops::resize(face, size, size, FilterType::Triangle);
            &resized
        };

        let size = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - config.mean) / config.std;
            }
        }
        tensor
    }
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let input = Self::preprocess(face, &self.config);

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        drop(outputs);
        drop(session);

        if raw.len() != self.config.dimension {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {}-dim embedding, got {}",
                self.config.dimension,
                raw.len()
            )));
        }

        let values = if self.config.normalize { l2_normalize(raw) } else { raw };

        Ok(Embedding {
            values,
            model_version: Some(self.config.model_version.clone()),
        })
    }
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
