use std::io::Read;
use std::time::Duration;

use crossterm::style::Stylize;
use indicatif::{ProgressBar, ProgressBarIter, ProgressDrawTarget, ProgressStyle};

/// A simple spinner for long-running stages.
pub struct Spinner {
    bar: ProgressBar,
    quiet: bool,
}

impl Spinner {
    pub fn new(message: impl Into<String>) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.dim} {msg} {bytes:.dim}") {
            bar.set_style(style);
        }
        bar.set_message(message.into());
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar, quiet: false }
    }

    /// A spinner that never draws, for JSON output and tests.
    pub fn hidden() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_draw_target(ProgressDrawTarget::hidden());
        Self { bar, quiet: true }
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    /// Count bytes pulled through `reader` on the spinner.
    pub fn wrap_read<R: Read>(&self, reader: R) -> ProgressBarIter<R> {
        self.bar.set_position(0);
        self.bar.wrap_read(reader)
    }

    /// Clear the spinner and print a `✔ message` line to stderr.
    pub fn finish(self, message: impl Into<String>) {
        self.bar.finish_and_clear();
        if !self.quiet {
            eprintln!("{} {}", "✔".green(), message.into());
        }
    }

    pub fn clear(self) {
        self.bar.finish_and_clear();
    }
}

/// Spinner unless output is machine-readable.
pub fn spinner(message: impl Into<String>, quiet: bool) -> Spinner {
    if quiet { Spinner::hidden() } else { Spinner::new(message) }
}
