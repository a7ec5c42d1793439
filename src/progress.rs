//
// progress.rs
// Dicom-Volume-Tools-rs
//
// Progress bars for the long-running directory commands.
//
// Thales Matheus Mendonça Santos - November 2025

use indicatif::{ProgressBar, ProgressStyle};

/// Bar with `len` steps; hidden when `visible` is false (tests, quiet runs).
pub fn bar(len: u64, visible: bool, message: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{percent}% [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message.to_string());
    pb
}
