//! Shared progress and logging helpers to keep progress bars pinned.

use crate::batch::{BatchObserver, BatchOutcome, StepReport};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

/// Steps are reported as fractions; the bar counts in thousandths
const BAR_LENGTH: u64 = 1000;

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

pub fn add_progress_bar(len: u64) -> ProgressBar {
    multi_progress().add(ProgressBar::new(len))
}

/// Progress bar driven by batch step reports
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    pub fn new(label: &str) -> Self {
        let bar = add_progress_bar(BAR_LENGTH);
        if let Ok(style) =
            ProgressStyle::with_template("{prefix:>12} [{bar:40}] {percent:>3}% {wide_msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(label.to_string());
        Self { bar }
    }
}

impl BatchObserver for ProgressObserver {
    fn on_step(&mut self, report: &StepReport) {
        self.bar
            .set_position((report.progress * BAR_LENGTH as f64).round() as u64);
        self.bar.set_message(report.message.clone());
    }

    fn on_finish(&mut self, outcome: &BatchOutcome) {
        if outcome.success {
            self.bar.finish_with_message(outcome.summary.clone());
        } else {
            self.bar.abandon_with_message(outcome.summary.clone());
        }
    }
}

#[derive(Default, Clone)]
pub struct LogWriterFactory;

pub struct LogWriter {
    buffer: String,
}

impl LogWriter {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    fn print_line(line: &str) {
        let _ = multi_progress().println(line.to_string());
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        Self::print_line(self.buffer.trim_end_matches('\n').trim_end_matches('\r'));
        self.buffer.clear();
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));

        while let Some(idx) = self.buffer.find('\n') {
            Self::print_line(self.buffer[..idx].trim_end_matches('\r'));
            self.buffer.drain(..idx + 1);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer();
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_tracks_fraction() {
        let mut observer = ProgressObserver::new("regenerate");
        observer.on_step(&StepReport::working(0.25, "chunk 1"));
        assert_eq!(observer.bar.position(), 250);
        observer.on_finish(&BatchOutcome {
            success: true,
            steps: 4,
            summary: "done".to_string(),
        });
        assert!(observer.bar.is_finished());
    }
}
