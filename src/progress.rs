use std::time::Duration;

use console::Term;
use indicatif::{ProgressBar, ProgressStyle};

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Spinner on stderr for one step. Without a terminal on stderr nothing animates
/// and [`finish_spinner`] prints a single status line instead.
pub fn stage_spinner(message: &str) -> ProgressBar {
    spinner(Term::stderr().is_term(), message)
}

fn spinner(animated: bool, message: &str) -> ProgressBar {
    let pb = if animated {
        ProgressBar::new_spinner()
    } else {
        ProgressBar::hidden()
    };
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(TICKS));
    }
    pb.set_message(message.to_string());
    if animated {
        pb.enable_steady_tick(Duration::from_millis(80));
    }
    pb
}

pub fn finish_spinner(pb: &ProgressBar, success: bool) {
    let line = status_line(&pb.message(), success);
    if pb.is_hidden() {
        eprintln!("{line}");
        pb.finish();
    } else {
        pb.finish_with_message(line);
    }
}

fn status_line(message: &str, success: bool) -> String {
    let mark = if success { "✓" } else { "✗" };
    format!("{mark} {message}")
}
