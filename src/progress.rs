use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Bar counting processed image pairs.
pub fn pair_bar(total: usize, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pair(s) eta {eta} {msg}",
        )
        .expect("valid pair bar template")
        .progress_chars("##-"),
    );
    pb.set_prefix(label.to_string());
    pb
}

/// Spinner for a single blocking remote call.
pub fn spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {elapsed} {msg}")
            .expect("valid spinner template"),
    );
    pb.set_prefix(label.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
