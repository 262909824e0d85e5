//! Deterministic stand-ins for the ONNX models plus fixture helpers.
//!
//! `FakeDetector` splits the image into a left and a right half and reports
//! one face per half whose center pixel is not white. `FakeEmbedder` maps a
//! canonical face to its center pixel scaled to [0, 1], so a face's embedding
//! is its fill color.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use facefind_core::detector::DetectorError;
use facefind_core::recognizer::EmbedderError;
use facefind_core::{
    BuildEvent, BuildState, Embedder, Embedding, FaceBox, FaceDetector, FaceRegion, Keypoints,
    ModelContext,
};
use image::{Rgb, RgbImage};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const RED: Rgb<u8> = Rgb([220, 20, 20]);
pub const GREEN: Rgb<u8> = Rgb([20, 220, 20]);
pub const BLUE: Rgb<u8> = Rgb([20, 20, 220]);

/// Call accounting shared with a test after the detector moves into a context.
#[derive(Default)]
pub struct DetectorStats {
    pub calls: AtomicUsize,
    inside: AtomicUsize,
    pub peak: AtomicUsize,
}

pub struct FakeDetector {
    confidence: f32,
    stats: Arc<DetectorStats>,
    dwell: Duration,
    reject: Option<Rgb<u8>>,
}

impl FakeDetector {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence,
            stats: Arc::default(),
            dwell: Duration::ZERO,
            reject: None,
        }
    }

    /// Fail on images whose left half is filled with `color`.
    pub fn rejecting(mut self, color: Rgb<u8>) -> Self {
        self.reject = Some(color);
        self
    }

    /// Share call counters and hold each call open for `dwell`.
    pub fn with_stats(mut self, stats: Arc<DetectorStats>, dwell: Duration) -> Self {
        self.stats = stats;
        self.dwell = dwell;
        self
    }
}

impl FaceDetector for FakeDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let (width, height) = image.dimensions();
        let half = width / 2;
        if self.reject == Some(*image.get_pixel(half / 2, height / 2)) {
            return Err(DetectorError::InferenceFailed("rejected test image".into()));
        }

        let now = self.stats.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        if !self.dwell.is_zero() {
            std::thread::sleep(self.dwell);
        }

        let mut regions = Vec::new();
        for x0 in [0, half] {
            if *image.get_pixel(x0 + half / 2, height / 2) == WHITE {
                continue;
            }
            let (left, top) = ((x0 + half / 4) as f32, (height / 4) as f32);
            let (w, h) = ((half / 2) as f32, (height / 2) as f32);
            regions.push(FaceRegion {
                confidence: self.confidence,
                bbox: FaceBox {
                    left,
                    top,
                    width: w,
                    height: h,
                },
                keypoints: Keypoints::eyes(
                    (left + w * 0.3, top + h * 0.4),
                    (left + w * 0.7, top + h * 0.4),
                ),
            });
        }

        self.stats.inside.fetch_sub(1, Ordering::SeqCst);
        self.stats.calls.fetch_add(1, Ordering::SeqCst);
        Ok(regions)
    }
}

pub struct FakeEmbedder;

impl Embedder for FakeEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let (w, h) = face.dimensions();
        let Rgb([r, g, b]) = *face.get_pixel(w / 2, h / 2);
        Ok(Embedding::new(vec![
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
        ]))
    }
}

/// `FakeEmbedder` that fails on faces filled with `reject`.
pub struct RejectingEmbedder {
    pub reject: Rgb<u8>,
}

impl Embedder for RejectingEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
        let (w, h) = face.dimensions();
        if *face.get_pixel(w / 2, h / 2) == self.reject {
            return Err(EmbedderError::InferenceFailed("rejected test face".into()));
        }
        FakeEmbedder.embed(face)
    }
}

pub fn context(confidence: f32) -> ModelContext {
    ModelContext::new(FakeDetector::new(confidence), FakeEmbedder)
}

/// A two-half image; a white half carries no face.
pub fn portrait(left: Rgb<u8>, right: Rgb<u8>, width: u32) -> RgbImage {
    let height = width / 2;
    RgbImage::from_fn(width, height, |x, _| if x < width / 2 { left } else { right })
}

pub fn write_png(dir: &Path, name: &str, image: &RgbImage) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image.save(&path).unwrap();
    path
}

/// Collects every event a build emits.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<BuildEvent>>,
}

impl Recorder {
    pub fn record(&self) -> impl Fn(BuildEvent) + Send + Sync + '_ {
        move |event| self.events.lock().unwrap().push(event)
    }

    pub fn progress(&self) -> Vec<f32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<BuildState> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

pub fn never() -> impl Fn() -> bool + Sync {
    || false
}
