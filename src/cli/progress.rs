//! Progress display for repairs
//!
//! Wraps an `indicatif` bar fed by the repair observer callback.

use indicatif::{ProgressBar, ProgressStyle};

use crate::app::RepairProgress;
use crate::errors::{AppError, Result};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar over the items of one repair run
#[derive(Clone)]
pub struct RepairProgressBar {
    bar: ProgressBar,
}

impl RepairProgressBar {
    /// Creates a bar for `total` items; hidden in quiet mode
    pub fn new(total: usize, label: &str, quiet: bool) -> Result<Self> {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total as u64)
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template(BAR_TEMPLATE)
                .map_err(|e| AppError::generic(format!("Progress bar template error: {}", e)))?
                .progress_chars("##-"),
        );
        bar.set_message(label.to_string());
        Ok(Self { bar })
    }

    /// Records one finished item
    pub fn observe(&self, progress: RepairProgress<'_>) {
        self.bar.set_position(progress.done as u64);
        if !progress.succeeded {
            self.bar.println(format!("❌ Failed: {}", progress.item));
        }
    }

    pub fn finish(&self, failures: usize) {
        if failures == 0 {
            self.bar.finish_with_message("done");
        } else {
            self.bar
                .abandon_with_message(format!("{} failed", failures));
        }
    }
}
