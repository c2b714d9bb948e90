//! Hashing progress display.

use indicatif::{ProgressBar, ProgressStyle};
use piecework_files::ProgressFn;
use std::sync::Arc;
use std::time::Duration;

/// Progress bar fed by worker threads as pieces complete
pub struct HashProgress {
    bar: ProgressBar,
}

impl HashProgress {
    /// Create a progress bar over `total_bytes`
    #[must_use]
    pub fn new(total_bytes: u64, label: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        match ProgressStyle::default_bar().template(
            "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        ) {
            Ok(style) => bar.set_style(style.progress_chars("#>-")),
            Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
        }

        bar.set_message(format!("Hashing: {label}"));

        Self { bar }
    }

    /// Hidden bar, for `--quiet` and non-interactive output
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Callback that advances the bar by each hashed piece
    #[must_use]
    pub fn callback(&self) -> ProgressFn {
        let bar = self.bar.clone();
        Arc::new(move |bytes| bar.inc(bytes))
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

/// Format bytes in human-readable format
///
/// ```text
/// format_bytes(1024)        == "1.00 KB"
/// format_bytes(1024 * 1024) == "1.00 MB"
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a run's throughput
#[must_use]
pub fn format_speed(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}

/// Format duration in human-readable format
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
