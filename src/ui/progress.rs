//! Flush progress display with CI fallback

use super::context::UiContext;
use crate::cache::flush::{FlushProgress, ProgressHook};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

/// Spinner tracking the dirty block count while a cache drains.
///
/// Shows an indicatif spinner in interactive mode and one line per poll
/// otherwise.
pub struct FlushProgressBar {
    bar: Option<ProgressBar>,
    label: String,
}

impl FlushProgressBar {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new_spinner();
            let style = ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} Flushing {prefix}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            None
        };
        Self {
            bar,
            label: label.to_string(),
        }
    }

    /// Progress hook that feeds this display
    pub fn hook(&self) -> ProgressHook {
        let bar = self.bar.clone();
        let label = self.label.clone();
        Arc::new(move |progress: &FlushProgress| match &bar {
            Some(bar) => bar.set_message(dirty_message(progress)),
            None => println!("  {}: {}", label, dirty_message(progress)),
        })
    }

    /// Finish and clear the spinner
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn dirty_message(progress: &FlushProgress) -> String {
    let noun = if progress.dirty == 1 { "block" } else { "blocks" };
    format!("{} dirty {} (poll {})", progress.dirty, noun, progress.polls)
}
