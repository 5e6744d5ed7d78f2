//! Progress reporter implementations
//!
//! The mirror engine reports through the [`MirrorObserver`] trait. Three
//! reporters are provided:
//! - [`LineReporter`]: plain line-oriented text, suitable for logs and non-TTY output
//! - [`ProgressReporter`]: indicatif bars for interactive terminals
//! - [`NullObserver`]: discards everything (quiet mode)

use crate::core::{MirrorPhase, MirrorReport};
use crate::storage::ObjectRef;
use crate::sync::TransferResult;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Receives events from a mirror run.
///
/// Every method has an empty default so reporters implement only what they
/// display. Observers never influence the run.
pub trait MirrorObserver: Send + Sync {
    /// The run entered a new phase
    fn on_phase(&self, _phase: MirrorPhase) {}

    /// An object was listed from the source and is about to be transferred
    fn on_object_discovered(&self, _object: &ObjectRef) {}

    /// Cumulative bytes written for the object currently being transferred
    fn on_bytes_written(&self, _name: &str, _written: u64, _total: Option<u64>) {}

    /// An object finished transferring
    fn on_transfer_complete(&self, _result: &TransferResult) {}

    /// A destination file was found with no source counterpart
    fn on_orphan(&self, _name: &str) {}

    /// An orphan was deleted
    fn on_deleted(&self, _name: &str) {}

    /// The run completed
    fn on_finish(&self, _report: &MirrorReport) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl MirrorObserver for NullObserver {}

/// Line-oriented text reporter
pub struct LineReporter<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
}

impl LineReporter {
    /// Reporter writing to stdout
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> LineReporter<W> {
    /// Reporter writing to `out`
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Take back the writer
    pub fn into_inner(self) -> W {
        self.out
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn line(&self, text: std::fmt::Arguments<'_>) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Progress output is best effort
        let _ = writeln!(out, "{}", text);
    }
}

impl<W: Write + Send> MirrorObserver for LineReporter<W> {
    fn on_phase(&self, phase: MirrorPhase) {
        match phase {
            MirrorPhase::EnumerateSource => self.line(format_args!("Listing source objects:")),
            MirrorPhase::EnumerateDestination => {
                self.line(format_args!("Listing destination share:"))
            }
            _ => {}
        }
    }

    fn on_object_discovered(&self, object: &ObjectRef) {
        self.line(format_args!("  - {}", object.name));
    }

    fn on_bytes_written(&self, _name: &str, written: u64, total: Option<u64>) {
        match total {
            Some(total) => self.line(format_args!("    Uploaded {} of {} bytes.", written, total)),
            None => self.line(format_args!("    Uploaded {} bytes.", written)),
        }
    }

    fn on_orphan(&self, name: &str) {
        self.line(format_args!(
            "File in share and not in source container to be deleted: {}",
            name
        ));
    }

    fn on_finish(&self, report: &MirrorReport) {
        self.line(format_args!(
            "Mirrored {} objects, deleted {} files.",
            report.objects_transferred,
            report.deleted.len()
        ));
    }
}

/// Progress bars for interactive terminals
pub struct ProgressReporter {
    /// Multi-progress container
    multi: MultiProgress,
    /// Phase and current object
    status: ProgressBar,
    /// Objects transferred out of objects discovered
    objects_bar: ProgressBar,
    /// Bytes of the object being transferred
    bytes_bar: ProgressBar,
    /// Start time
    start_time: Instant,
    /// Bytes transferred over the run
    bytes_total: AtomicU64,
    /// Orphans deleted
    deleted: AtomicU64,
}

fn style(template: &str, fallback: ProgressStyle) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .map(|s| s.progress_chars("=> "))
        .unwrap_or(fallback)
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let status = multi.add(ProgressBar::new_spinner());
        status.set_style(style("{spinner:.cyan} {msg}", ProgressStyle::default_spinner()));
        status.enable_steady_tick(Duration::from_millis(120));

        let objects_bar = multi.add(ProgressBar::new(0));
        objects_bar.set_style(style(
            "{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} objects",
            ProgressStyle::default_bar(),
        ));
        objects_bar.set_prefix("Objects");

        let bytes_bar = multi.add(ProgressBar::new(0));
        bytes_bar.set_style(style(
            "{prefix:.bold.dim} [{bar:40.green/white}] {bytes}/{total_bytes} ({bytes_per_sec})",
            ProgressStyle::default_bar(),
        ));
        bytes_bar.set_prefix("Data   ");

        Self {
            multi,
            status,
            objects_bar,
            bytes_bar,
            start_time: Instant::now(),
            bytes_total: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
        }
    }

    /// Create a reporter that draws nothing
    pub fn hidden() -> Self {
        let reporter = Self::new();
        reporter.multi.set_draw_target(ProgressDrawTarget::hidden());
        reporter.status.disable_steady_tick();
        reporter
    }

    /// Objects transferred so far
    pub fn objects_transferred(&self) -> u64 {
        self.objects_bar.position()
    }

    /// Bytes transferred so far
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_total.load(Ordering::Relaxed)
    }

    /// Orphans deleted so far
    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn set_current(&self, name: &str) {
        // Truncate long names
        let len = name.chars().count();
        let display = if len > 60 {
            let tail: String = name.chars().skip(len - 57).collect();
            format!("...{}", tail)
        } else {
            name.to_string()
        };
        self.status.set_message(display);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorObserver for ProgressReporter {
    fn on_phase(&self, phase: MirrorPhase) {
        self.status.set_message(phase.to_string());
    }

    fn on_object_discovered(&self, object: &ObjectRef) {
        self.objects_bar.inc_length(1);
        self.bytes_bar.reset();
        self.bytes_bar.set_length(object.size.unwrap_or(0));
        self.set_current(&object.name);
    }

    fn on_bytes_written(&self, _name: &str, written: u64, total: Option<u64>) {
        if let Some(total) = total {
            self.bytes_bar.set_length(total);
        }
        self.bytes_bar.set_position(written);
    }

    fn on_transfer_complete(&self, result: &TransferResult) {
        self.bytes_total.fetch_add(result.bytes, Ordering::Relaxed);
        self.objects_bar.inc(1);
    }

    fn on_deleted(&self, name: &str) {
        let deleted = self.deleted.fetch_add(1, Ordering::Relaxed) + 1;
        self.status
            .set_message(format!("prune: deleted {} ({} so far)", name, deleted));
    }

    fn on_finish(&self, report: &MirrorReport) {
        self.status.finish_with_message(format!(
            "✓ Mirrored {} objects, deleted {} files",
            report.objects_transferred,
            report.deleted.len()
        ));
        self.objects_bar.finish();
        self.bytes_bar.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_reporter_output() {
        let reporter = LineReporter::new(Vec::new());
        reporter.on_phase(MirrorPhase::EnumerateSource);
        reporter.on_object_discovered(&ObjectRef::new("a.txt"));
        reporter.on_bytes_written("a.txt", 5, Some(5));
        reporter.on_orphan("c.txt");

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        assert_eq!(
            text,
            "Listing source objects:\n  - a.txt\n    Uploaded 5 of 5 bytes.\n\
             File in share and not in source container to be deleted: c.txt\n"
        );
    }

    #[test]
    fn test_progress_reporter_counts() {
        let reporter = ProgressReporter::hidden();

        reporter.on_object_discovered(&ObjectRef::new("a.txt").sized(Some(10)));
        reporter.on_bytes_written("a.txt", 10, Some(10));
        reporter.on_transfer_complete(&TransferResult {
            name: "a.txt".into(),
            bytes: 10,
        });
        reporter.on_deleted("old.txt");

        assert_eq!(reporter.objects_transferred(), 1);
        assert_eq!(reporter.bytes_transferred(), 10);
        assert_eq!(reporter.deleted(), 1);
    }

    #[test]
    fn test_null_observer_is_silent() {
        let observer: &dyn MirrorObserver = &NullObserver;
        observer.on_orphan("x");
        observer.on_deleted("x");
    }
}
