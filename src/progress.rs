//! Progress indicators for plugsync.
//!
//! Re-exports the pintui spinner helpers and bridges engine job batches onto
//! an indicatif bar.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use plugkit::{JobResult, Progress};
use std::sync::{Mutex, PoisonError};

pub use pintui::progress::{finish_success, spinner};

const BAR_TEMPLATE: &str = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

fn job_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Shows one bar per job batch.
pub struct BatchProgress {
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl BatchProgress {
    pub fn new(hidden: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            hidden,
        }
    }
}

impl Progress for BatchProgress {
    fn on_batch_start(&self, total: usize) {
        if self.hidden || total == 0 {
            return;
        }
        let pb = job_bar(total as u64);
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(pb);
    }

    fn on_job_complete(&self, result: &JobResult) {
        let guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pb) = guard.as_ref() {
            let symbol = if result.is_success() {
                "✓".green()
            } else {
                "✗".red()
            };
            pb.set_message(format!("{} {} {}", symbol, result.job.phase, result.job.module));
            pb.inc(1);
        }
    }

    fn on_batch_complete(&self) {
        if let Some(pb) = self
            .bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pb.finish_and_clear();
        }
    }
}
