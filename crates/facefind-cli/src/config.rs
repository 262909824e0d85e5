//! Layered configuration for the `facefind` binary.
//!
//! Lowest to highest priority: built-in defaults, a TOML file (`--config` or
//! `$XDG_CONFIG_HOME/facefind/config.toml`), `FACEFIND_*` environment
//! variables, then command-line flags (applied by the caller).

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use facefind_core::index::{DEFAULT_BATCH_SIZE, DEFAULT_WORKERS};
use facefind_core::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;

const DETECTOR_MODEL: &str = "det_10g.onnx";
const EMBEDDER_MODEL: &str = "w600k_r50.onnx";

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub models: ModelsConfig,
    pub index: IndexConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    pub dir: Option<PathBuf>,
    /// Detector model path; defaults to `det_10g.onnx` in `dir`.
    pub detector: Option<PathBuf>,
    /// Embedder model path; defaults to `w600k_r50.onnx` in `dir`.
    pub embedder: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    pub workers: Option<usize>,
    pub batch_size: Option<usize>,
    /// Where face thumbnails are written.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub threshold: Option<f32>,
    pub min_similarity: Option<f32>,
}

impl FileConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

/// Resolved settings after all layers are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub model_dir: PathBuf,
    pub detector_model: Option<PathBuf>,
    pub embedder_model: Option<PathBuf>,
    pub workers: usize,
    pub batch_size: usize,
    pub output_dir: PathBuf,
    pub threshold: f32,
    pub min_similarity: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_dir: facefind_core::default_model_dir(),
            detector_model: None,
            embedder_model: None,
            workers: DEFAULT_WORKERS,
            batch_size: DEFAULT_BATCH_SIZE,
            output_dir: default_output_dir(),
            threshold: DEFAULT_MATCH_THRESHOLD,
            min_similarity: 0.0,
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then the process environment.
    ///
    /// An explicit `--config` path must exist; the XDG file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(FileConfig::load(path)?),
            None => match xdg_config_path() {
                Some(path) if path.exists() => {
                    tracing::info!(path = %path.display(), "loading config");
                    Some(FileConfig::load(&path)?)
                }
                _ => None,
            },
        };

        let mut settings = Self::default();
        if let Some(file) = file {
            settings.apply_file(file);
        }
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        let FileConfig {
            models,
            index,
            search,
        } = file;
        set(&mut self.model_dir, models.dir);
        self.detector_model = models.detector.or(self.detector_model.take());
        self.embedder_model = models.embedder.or(self.embedder_model.take());
        set(&mut self.workers, index.workers);
        set(&mut self.batch_size, index.batch_size);
        set(&mut self.output_dir, index.output_dir);
        set(&mut self.threshold, search.threshold);
        set(&mut self.min_similarity, search.min_similarity);
    }

    /// Apply `FACEFIND_*` overrides; unparsable values are ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        set(&mut self.model_dir, var("FACEFIND_MODEL_DIR").map(PathBuf::from));
        if let Some(path) = var("FACEFIND_DETECTOR_MODEL") {
            self.detector_model = Some(PathBuf::from(path));
        }
        if let Some(path) = var("FACEFIND_EMBEDDER_MODEL") {
            self.embedder_model = Some(PathBuf::from(path));
        }
        set(&mut self.workers, parse_var(&var, "FACEFIND_WORKERS"));
        set(&mut self.batch_size, parse_var(&var, "FACEFIND_BATCH_SIZE"));
        set(&mut self.output_dir, var("FACEFIND_OUTPUT_DIR").map(PathBuf::from));
        set(&mut self.threshold, parse_var(&var, "FACEFIND_THRESHOLD"));
        set(&mut self.min_similarity, parse_var(&var, "FACEFIND_MIN_SIMILARITY"));
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if !(self.threshold > 0.0 && self.threshold <= 2.0) {
            bail!("threshold must be in (0, 2], got {}", self.threshold);
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            bail!("min similarity must be in [0, 1], got {}", self.min_similarity);
        }
        Ok(())
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.detector_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(DETECTOR_MODEL))
    }

    pub fn embedder_model_path(&self) -> PathBuf {
        self.embedder_model
            .clone()
            .unwrap_or_else(|| self.model_dir.join(EMBEDDER_MODEL))
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn parse_var<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(fallback)))
}

fn xdg_config_path() -> Option<PathBuf> {
    xdg_dir("XDG_CONFIG_HOME", ".config").map(|d| d.join("facefind").join("config.toml"))
}

fn default_output_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("facefind")
        .join("faces")
}
