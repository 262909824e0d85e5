use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facefind_core::{
    copy_matched_images, BuildConfig, BuildOutcome, BuildState, IndexBuilder, MatchEngine,
    ModelContext,
};
use tracing_subscriber::EnvFilter;

mod config;
mod output;

use config::Settings;
use output::BuildProgress;

#[derive(Parser)]
#[command(name = "facefind", version, about = "Find photos of a person by face")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facefind/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every face in a photo folder
    Index {
        /// Folder to scan recursively
        root: PathBuf,
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Index a photo folder, then list photos containing the query's faces
    Search {
        /// Folder to scan recursively
        root: PathBuf,
        /// Photo of the person to look for
        query: PathBuf,
        #[command(flatten)]
        build: BuildArgs,
        /// Cosine distance under which a face matches
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Copy matching photos into this folder
        #[arg(long)]
        copy_to: Option<PathBuf>,
        /// Minimum similarity for --copy-to
        #[arg(long)]
        min_similarity: Option<f32>,
    },
}

#[derive(Args)]
struct BuildArgs {
    /// Where face thumbnails are written
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,
    /// Images per queued batch
    #[arg(long)]
    batch_size: Option<usize>,
    /// Print JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl BuildArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(output) = &self.output {
            settings.output_dir = output.clone();
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            settings.batch_size = batch_size;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Index { root, build } => {
            build.apply(&mut settings);
            settings.validate()?;

            let ctx = load_models(&settings)?;
            let outcome = run_build(ctx, &settings, root, build.json).await?;
            output::print_build(&outcome, build.json)?;
        }
        Commands::Search {
            root,
            query,
            build,
            threshold,
            copy_to,
            min_similarity,
        } => {
            build.apply(&mut settings);
            if let Some(threshold) = threshold {
                settings.threshold = threshold;
            }
            if let Some(min_similarity) = min_similarity {
                settings.min_similarity = min_similarity;
            }
            settings.validate()?;

            let ctx = load_models(&settings)?;
            let outcome = run_build(ctx.clone(), &settings, root, build.json).await?;
            if outcome.state == BuildState::Cancelled {
                output::print_build(&outcome, false)?;
                return Ok(());
            }

            let engine = MatchEngine::new(ctx);
            let mut matches = engine
                .find_matches(&query, &outcome.index, settings.threshold)
                .with_context(|| format!("cannot search with {}", query.display()))?;
            output::sort_matches(&mut matches);
            output::print_matches(&matches, &outcome.index, build.json)?;

            if let Some(dest) = copy_to {
                let copied =
                    copy_matched_images(&matches, &outcome.index, settings.min_similarity, &dest)?;
                eprintln!("Copied {copied} photo(s) to {}", dest.display());
            }
        }
    }

    Ok(())
}

fn load_models(settings: &Settings) -> Result<ModelContext> {
    let detector = settings.detector_model_path();
    let embedder = settings.embedder_model_path();
    ModelContext::load_onnx(&detector, &embedder).with_context(|| {
        format!(
            "cannot load models (detector {}, embedder {})",
            detector.display(),
            embedder.display()
        )
    })
}

/// Run a blocking index build; Ctrl-C requests cancellation and waits for the drain.
async fn run_build(
    ctx: ModelContext,
    settings: &Settings,
    root: PathBuf,
    quiet: bool,
) -> Result<BuildOutcome> {
    let mut config = BuildConfig::new(&settings.output_dir);
    config.workers = settings.workers;
    config.batch_size = settings.batch_size;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    let mut handle = tokio::task::spawn_blocking(move || {
        let progress = BuildProgress::new(quiet);
        let builder = IndexBuilder::new(ctx, config);
        let outcome = builder.build_index(&root, &progress, &|| flag.load(Ordering::SeqCst));
        progress.finish();
        outcome
    });

    let outcome = tokio::select! {
        joined = &mut handle => joined?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupt received, finishing queued work");
            cancel.store(true, Ordering::SeqCst);
            handle.await?
        }
    };
    Ok(outcome?)
}
