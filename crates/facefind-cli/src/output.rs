//! Terminal reporting: progress bar, summaries and JSON output.

use facefind_core::{BuildEvent, BuildObserver, BuildOutcome, FaceIndex, MatchResult};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

/// Draws build progress; skipped images are printed above the bar.
pub struct BuildProgress {
    bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl BuildObserver for BuildProgress {
    fn on_event(&self, event: BuildEvent) {
        match event {
            BuildEvent::StateChanged(state) => self.bar.set_message(state.to_string()),
            BuildEvent::Enumerated { total } => self.bar.set_length(total as u64),
            BuildEvent::Progress(percent) => {
                let len = self.bar.length().unwrap_or(0);
                self.bar
                    .set_position((percent as f64 / 100.0 * len as f64).round() as u64);
            }
            BuildEvent::ImageIndexed { .. } => {}
            BuildEvent::Skipped {
                path,
                stage,
                reason,
            } => self
                .bar
                .println(format!("skipped {} ({stage}): {reason}", path.display())),
        }
    }
}

pub fn print_build(outcome: &BuildOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.index)?);
        return Ok(());
    }

    println!(
        "{}: {} images, {} faces ({} of {} files processed)",
        outcome.state,
        outcome.index.len(),
        outcome.index.face_count(),
        outcome.attempted,
        outcome.total
    );
    Ok(())
}

#[derive(Serialize)]
struct MatchView<'a> {
    #[serde(flatten)]
    result: &'a MatchResult,
    path: Option<String>,
    metadata: Option<serde_json::Value>,
}

/// Highest similarity first.
pub fn sort_matches(matches: &mut [MatchResult]) {
    matches.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.file_name.cmp(&b.file_name))
    });
}

pub fn print_matches(matches: &[MatchResult], index: &FaceIndex, json: bool) -> anyhow::Result<()> {
    if json {
        let views: Vec<MatchView> = matches
            .iter()
            .map(|m| {
                let record = index.get(&m.image_hash);
                MatchView {
                    result: m,
                    path: record.map(|r| r.path.display().to_string()),
                    metadata: record
                        .and_then(|r| r.metadata.as_ref())
                        .map(|meta| meta.to_presentation()),
                }
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("No matching faces.");
        return Ok(());
    }
    for m in matches {
        println!(
            "{:>6.1}%  {}  (face {}, thumbnail {})",
            m.similarity * 100.0,
            m.file_name,
            m.query_face + 1,
            m.thumbnail
        );
    }
    Ok(())
}
