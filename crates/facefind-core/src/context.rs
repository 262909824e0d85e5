//! Process-wide model ownership.
//!
//! A [`ModelContext`] is built once at startup and handed to the index
//! builder and match engine; workers share it read-only.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbImage;
use thiserror::Error;

use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::recognizer::{Embedder, EmbedderError, OnnxEmbedder};
use crate::types::{Embedding, FaceRegion};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Detector and embedder shared by every pipeline worker.
#[derive(Clone)]
pub struct ModelContext {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn Embedder>,
}

impl ModelContext {
    pub fn new(detector: impl FaceDetector + 'static, embedder: impl Embedder + 'static) -> Self {
        Self {
            detector: Arc::new(detector),
            embedder: Arc::new(embedder),
        }
    }

    /// Load the SCRFD detector and ONNX embedder. Fails fast if either model is missing.
    pub fn load_onnx(detector_model: &Path, embedder_model: &Path) -> Result<Self, ContextError> {
        let detector = ScrfdDetector::load(detector_model)?;
        let embedder = OnnxEmbedder::load(embedder_model)?;
        tracing::info!(
            detector = %detector_model.display(),
            embedder = %embedder_model.display(),
            "models loaded"
        );
        Ok(Self::new(detector, embedder))
    }

    pub fn detector(&self) -> &dyn FaceDetector {
        self.detector.as_ref()
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }
}

/// Admits one caller at a time into a model whose inference is not reentrant.
pub struct Serialized<T> {
    inner: T,
    gate: Mutex<()>,
}

impl<T> Serialized<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: FaceDetector> FaceDetector for Serialized<T> {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.detect(image)
    }
}

impl<T: Embedder> Embedder for Serialized<T> {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.inner.embed(face)
    }
}
