//! Index building: enumerate, detect, normalize, embed and deduplicate faces
//! across a fixed-size worker pool.
//!
//! The orchestrator thread feeds batches of image paths into a bounded queue
//! drained by `workers` pool threads. Cancellation is polled before each batch
//! is queued and before each image is decoded; queued batches drain, so a
//! cancelled run holds a subset of what a full run would produce.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver};
use image::RgbImage;
use thiserror::Error;

use crate::context::ModelContext;
use crate::dedup::Deduplicator;
use crate::metadata::CaptureMetadata;
use crate::pipeline::{self, PipelineError, Stage};
use crate::source::ImageSource;
use crate::types::{content_hash, thumbnail_name, FaceEntry, FaceIndex, FaceRegion, ImageRecord};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_BATCH_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid build configuration: {0}")]
    InvalidConfig(String),
    #[error("cannot create output directory {}: {source}", path.display())]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Lifecycle of one build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Enumerating,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl BuildState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildState::Completed | BuildState::Cancelled | BuildState::Failed)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Notifications emitted while a build runs.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    StateChanged(BuildState),
    /// Paths found during enumeration.
    Enumerated { total: usize },
    /// Percentage of images attempted so far, in [0, 100].
    Progress(f32),
    /// A new image record entered the index.
    ImageIndexed {
        hash: String,
        file_name: String,
        faces: usize,
    },
    /// An image was abandoned before it could be indexed.
    Skipped {
        path: PathBuf,
        stage: Stage,
        reason: String,
    },
}

/// Receives [`BuildEvent`]s; called from worker threads.
pub trait BuildObserver: Send + Sync {
    fn on_event(&self, event: BuildEvent);
}

impl<F> BuildObserver for F
where
    F: Fn(BuildEvent) + Send + Sync,
{
    fn on_event(&self, event: BuildEvent) {
        self(event)
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub workers: usize,
    pub batch_size: usize,
    /// Directory receiving the canonical face thumbnails.
    pub output_dir: PathBuf,
}

impl BuildConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            output_dir: output_dir.into(),
        }
    }

    fn validate(&self) -> Result<(), IndexError> {
        if self.workers == 0 {
            return Err(IndexError::InvalidConfig("workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexError::InvalidConfig("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Terminal result of a build run that did not fail.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// `Completed` or `Cancelled`.
    pub state: BuildState,
    pub index: FaceIndex,
    /// Images found during enumeration.
    pub total: usize,
    /// Images attempted before the run ended.
    pub attempted: usize,
}

pub struct IndexBuilder {
    ctx: ModelContext,
    config: BuildConfig,
    state: Mutex<BuildState>,
}

impl IndexBuilder {
    pub fn new(ctx: ModelContext, config: BuildConfig) -> Self {
        Self {
            ctx,
            config,
            state: Mutex::new(BuildState::Idle),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// State of the most recent run.
    pub fn state(&self) -> BuildState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: BuildState, observer: &dyn BuildObserver) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        tracing::debug!(state = %next, "build state");
        observer.on_event(BuildEvent::StateChanged(next));
    }

    /// Index every image under `root` with fresh identity registries.
    ///
    /// Blocks until the run completes, is cancelled or fails.
    pub fn build_index(
        &self,
        root: &Path,
        observer: &dyn BuildObserver,
        cancel: &(dyn Fn() -> bool + Sync),
    ) -> Result<BuildOutcome, IndexError> {
        self.build_index_with(root, &Deduplicator::new(), observer, cancel)
    }

    /// Like [`build_index`](Self::build_index) but against caller-owned
    /// registries, so identities seen by earlier runs are skipped.
    pub fn build_index_with(
        &self,
        root: &Path,
        dedup: &Deduplicator,
        observer: &dyn BuildObserver,
        cancel: &(dyn Fn() -> bool + Sync),
    ) -> Result<BuildOutcome, IndexError> {
        self.transition(BuildState::Idle, observer);
        let result = self.run(root, dedup, observer, cancel);
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    state = %outcome.state,
                    images = outcome.index.len(),
                    faces = outcome.index.face_count(),
                    attempted = outcome.attempted,
                    total = outcome.total,
                    "index build finished"
                );
                self.transition(outcome.state, observer);
            }
            Err(e) => {
                tracing::error!(error = %e, root = %root.display(), "index build failed");
                self.transition(BuildState::Failed, observer);
            }
        }
        result
    }

    fn run(
        &self,
        root: &Path,
        dedup: &Deduplicator,
        observer: &dyn BuildObserver,
        cancel: &(dyn Fn() -> bool + Sync),
    ) -> Result<BuildOutcome, IndexError> {
        self.config.validate()?;

        self.transition(BuildState::Enumerating, observer);
        let source = ImageSource::new(root);
        let paths: Vec<PathBuf> = source.paths().collect();
        let total = paths.len();
        tracing::info!(root = %source.root().display(), total, "enumerated images");
        observer.on_event(BuildEvent::Enumerated { total });

        self.transition(BuildState::Processing, observer);
        std::fs::create_dir_all(&self.config.output_dir).map_err(|source| IndexError::OutputDir {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("facefind-worker-{i}"))
            .build()?;

        let run = Run {
            ctx: &self.ctx,
            dedup,
            output_dir: &self.config.output_dir,
            observer,
            cancel,
            total,
            cancelled: AtomicBool::new(false),
            completed: Mutex::new(0),
            records: Mutex::new(HashMap::new()),
        };

        if total == 0 {
            if !run.poll_cancel() {
                observer.on_event(BuildEvent::Progress(100.0));
            }
        } else {
            let (tx, rx) = bounded::<Vec<PathBuf>>(self.config.workers);
            let run = &run;

            pool.in_place_scope(|scope| {
                for _ in 0..self.config.workers {
                    let rx = rx.clone();
                    scope.spawn(move |_| run.drain(rx));
                }
                drop(rx);

                for (n, batch) in paths.chunks(self.config.batch_size).enumerate() {
                    if run.poll_cancel() {
                        tracing::info!(submitted = n, "cancellation observed, no further batches");
                        break;
                    }
                    if tx.send(batch.to_vec()).is_err() {
                        break;
                    }
                }
                drop(tx);
            });
        }

        let state = if run.cancelled.load(Ordering::SeqCst) {
            BuildState::Cancelled
        } else {
            BuildState::Completed
        };
        let attempted = *run.completed.lock().unwrap_or_else(PoisonError::into_inner);
        let records = run.records.into_inner().unwrap_or_else(PoisonError::into_inner);

        Ok(BuildOutcome {
            state,
            index: records.into_values().collect(),
            total,
            attempted,
        })
    }
}

/// State shared by the workers of one run.
struct Run<'a> {
    ctx: &'a ModelContext,
    dedup: &'a Deduplicator,
    output_dir: &'a Path,
    observer: &'a dyn BuildObserver,
    cancel: &'a (dyn Fn() -> bool + Sync),
    total: usize,
    cancelled: AtomicBool,
    completed: Mutex<usize>,
    records: Mutex<HashMap<String, ImageRecord>>,
}

impl Run<'_> {
    /// Check the caller's flag, latching the first observation.
    fn poll_cancel(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        if (self.cancel)() {
            self.cancelled.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn drain(&self, rx: Receiver<Vec<PathBuf>>) {
        for batch in rx.iter() {
            for path in batch {
                if self.poll_cancel() {
                    break;
                }
                self.process(&path);
                self.image_attempted();
            }
        }
    }

    fn image_attempted(&self) {
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        *completed += 1;
        let progress = *completed as f32 / self.total as f32 * 100.0;
        self.observer.on_event(BuildEvent::Progress(progress));
    }

    fn skip(&self, path: &Path, err: &PipelineError) {
        tracing::warn!(path = %path.display(), stage = %err.stage(), error = %err, "skipping image");
        self.observer.on_event(BuildEvent::Skipped {
            path: path.to_path_buf(),
            stage: err.stage(),
            reason: err.to_string(),
        });
    }

    fn process(&self, path: &Path) {
        match self.index_image(path) {
            Ok(Some(record)) => {
                let event = BuildEvent::ImageIndexed {
                    hash: record.hash.clone(),
                    file_name: record.file_name.clone(),
                    faces: record.faces.len(),
                };
                self.records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(record.hash.clone(), record);
                self.observer.on_event(event);
            }
            Ok(None) => {}
            Err(err) => self.skip(path, &err),
        }
    }

    /// Returns `None` when the image has no faces or was already indexed.
    fn index_image(&self, path: &Path) -> Result<Option<ImageRecord>, PipelineError> {
        let bytes = std::fs::read(path)?;
        let image = pipeline::decode(&bytes)?;

        let regions = self.ctx.detector().detect(&image)?;
        tracing::debug!(path = %path.display(), faces = regions.len(), "detected faces");
        if regions.is_empty() {
            return Ok(None);
        }

        let (hash, is_new) = self.dedup.register_image(&bytes);
        if !is_new {
            tracing::debug!(path = %path.display(), hash, "duplicate image");
            return Ok(None);
        }

        let mut record = ImageRecord {
            hash,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: path.to_path_buf(),
            metadata: CaptureMetadata::from_bytes(&bytes),
            faces: Vec::new(),
        };

        for region in pipeline::confident_regions(&regions) {
            match self.index_face(&image, region, &record) {
                Ok(Some(face)) => record.faces.push(face),
                Ok(None) => {}
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    stage = %err.stage(),
                    confidence = region.confidence,
                    error = %err,
                    "skipping face"
                ),
            }
        }

        Ok(Some(record))
    }

    /// Returns `None` when an identical embedding is already indexed.
    ///
    /// The face identity is claimed only after its thumbnail is written, so a
    /// failed write leaves the face free for a later image to index.
    fn index_face(
        &self,
        image: &RgbImage,
        region: &FaceRegion,
        record: &ImageRecord,
    ) -> Result<Option<FaceEntry>, PipelineError> {
        let sample = pipeline::embed_region(self.ctx, image, region)?;

        let hash = content_hash(&sample.embedding.to_bytes());
        if self.dedup.faces().contains(&hash) {
            tracing::debug!(image = %record.hash, face = %hash, "duplicate face");
            return Ok(None);
        }

        let sequence = record.faces.len() + 1;
        let thumbnail = self.output_dir.join(thumbnail_name(&record.hash, sequence));
        sample
            .canonical
            .save(&thumbnail)
            .map_err(|source| PipelineError::Persist {
                path: thumbnail.clone(),
                source,
            })?;

        if !self.dedup.faces().register_hash(&hash) {
            tracing::debug!(image = %record.hash, face = %hash, "duplicate face, claimed concurrently");
            if let Err(e) = std::fs::remove_file(&thumbnail) {
                tracing::warn!(path = %thumbnail.display(), error = %e, "cannot remove thumbnail");
            }
            return Ok(None);
        }

        Ok(Some(FaceEntry {
            hash,
            embedding: sample.embedding,
            sequence,
            thumbnail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = BuildConfig::new("/tmp/faces");
        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_workers_and_batches() {
        let mut config = BuildConfig::new("/tmp/faces");
        config.workers = 0;
        assert!(matches!(config.validate(), Err(IndexError::InvalidConfig(_))));

        let mut config = BuildConfig::new("/tmp/faces");
        config.batch_size = 0;
        assert!(matches!(config.validate(), Err(IndexError::InvalidConfig(_))));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BuildState::Idle.is_terminal());
        assert!(!BuildState::Enumerating.is_terminal());
        assert!(!BuildState::Processing.is_terminal());
        assert!(BuildState::Completed.is_terminal());
        assert!(BuildState::Cancelled.is_terminal());
        assert!(BuildState::Failed.is_terminal());
    }
}
