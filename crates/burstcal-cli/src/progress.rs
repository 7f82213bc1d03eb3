use std::time::Duration;

use burstcal_core::pipeline::{PipelineStage, ProgressReporter};
use indicatif::{ProgressBar, ProgressStyle};

/// Drives one `indicatif` bar: a counted bar for stages with a known item
/// count, a spinner otherwise.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, profile: &str, stage: PipelineStage, total_items: Option<usize>) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        match total_items {
            Some(total) => {
                self.bar.disable_steady_tick();
                self.bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg:32} [{bar:40}] {pos}/{len}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                self.bar.set_length(total as u64);
            }
            None => {
                self.bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                self.bar.enable_steady_tick(Duration::from_millis(120));
            }
        }
        self.bar.set_position(0);
        self.bar.set_message(format!("{profile}: {stage}"));
    }

    fn advance(&self, items_done: usize) {
        self.bar.set_position(items_done as u64);
    }

    fn finish_stage(&self) {
        self.bar.disable_steady_tick();
    }
}
