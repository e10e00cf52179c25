//! Progress sinks receiving status updates from the stream controller

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{CanonicalStatus, StatusSnapshot};

/// Extra information passed along with a progress update.
#[derive(Debug, Clone, Copy)]
pub struct ProgressContext<'a> {
    pub snapshot: &'a StatusSnapshot,
    pub file_name: Option<&'a str>,
    pub target_size: Option<u64>,
}

/// Destination for progress updates.
///
/// `update` must tolerate repeated identical calls and `is_cancelled` must be
/// cheap and free of side effects, since both are called at poll cadence.
pub trait ProgressSink: Send + Sync {
    fn open(&self, heading: &str);
    fn close(&self);
    fn is_cancelled(&self) -> bool;
    fn update(&self, percent: f64, context: &ProgressContext<'_>);
}

/// Headless sink that ignores every update.
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn open(&self, _heading: &str) {}

    fn close(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }

    fn update(&self, _percent: f64, _context: &ProgressContext<'_>) {}
}

/// Sink that reports progress through `tracing`.
///
/// Only logs when the rounded percentage or the phase changes.
#[derive(Debug, Default)]
pub struct LoggingSink {
    heading: Mutex<Option<String>>,
    last: Mutex<Option<(u32, CanonicalStatus)>>,
    cancelled: AtomicBool,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the sink cancelled; the controller observes it on its next poll.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

impl ProgressSink for LoggingSink {
    fn open(&self, heading: &str) {
        *self.heading.lock() = Some(heading.to_string());
        *self.last.lock() = None;
        tracing::info!("{}", heading);
    }

    fn close(&self) {
        if self.heading.lock().take().is_some() {
            tracing::debug!("Progress closed");
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn update(&self, percent: f64, context: &ProgressContext<'_>) {
        let key = (percent.clamp(0.0, 100.0) as u32, context.snapshot.phase);
        {
            let mut last = self.last.lock();
            if *last == Some(key) {
                return;
            }
            *last = Some(key);
        }

        let snapshot = context.snapshot;
        tracing::info!(
            "{} {:>3}% | down {} | up {} | peers {} seeds {} | {}",
            snapshot.phase,
            key.0,
            human_rate(snapshot.download_rate_bps),
            human_rate(snapshot.upload_rate_bps),
            snapshot.peers,
            snapshot.seeds,
            context
                .file_name
                .or(snapshot.name.as_deref())
                .unwrap_or("-"),
        );
    }
}

/// Keeps a sink open for a scope and closes it on drop.
pub struct SinkGuard<'a> {
    sink: &'a dyn ProgressSink,
    is_open: bool,
}

impl<'a> SinkGuard<'a> {
    /// Wraps a sink without opening it.
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            is_open: false,
        }
    }

    /// Wraps and immediately opens a sink.
    pub fn opened(sink: &'a dyn ProgressSink, heading: &str) -> Self {
        let mut guard = Self::new(sink);
        guard.open(heading);
        guard
    }

    pub fn open(&mut self, heading: &str) {
        if !self.is_open {
            self.sink.open(heading);
            self.is_open = true;
        }
    }

    pub fn close(&mut self) {
        if self.is_open {
            self.sink.close();
            self.is_open = false;
        }
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn sink(&self) -> &'a dyn ProgressSink {
        self.sink
    }
}

impl Drop for SinkGuard<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Transferred byte count against an optionally known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub size: Option<u64>,
}

impl TransferProgress {
    pub fn new(transferred: u64, size: Option<u64>) -> Self {
        Self { transferred, size }
    }

    /// Percentage in `0..=100`; 1 when the size is unknown.
    pub fn percent(&self) -> f64 {
        match self.size {
            Some(size) if size > 0 => {
                (self.transferred as f64 * 100.0 / size as f64).clamp(0.0, 100.0)
            }
            _ => 1.0,
        }
    }
}

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Formats a byte count as `"1.5 MB"`.
pub fn human_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Formats a byte rate as `"1.5 MB/s"`.
pub fn human_rate(bytes_per_second: u64) -> String {
    format!("{}/s", human_size(bytes_per_second))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingSink {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl ProgressSink for CountingSink {
        fn open(&self, _heading: &str) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_cancelled(&self) -> bool {
            false
        }

        fn update(&self, _percent: f64, _context: &ProgressContext<'_>) {}
    }

    #[test]
    fn test_guard_closes_once_on_drop() {
        let sink = CountingSink::default();
        {
            let mut guard = SinkGuard::opened(&sink, "Buffering");
            guard.open("again");
            assert!(guard.is_open());
        }
        assert_eq!(sink.opened.load(Ordering::SeqCst), 1);
        assert_eq!(sink.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_reopen_cycle() {
        let sink = CountingSink::default();
        let mut guard = SinkGuard::new(&sink);
        guard.close();
        guard.open("Paused");
        guard.close();
        guard.open("Paused");
        drop(guard);
        assert_eq!(sink.opened.load(Ordering::SeqCst), 2);
        assert_eq!(sink.closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transfer_percent() {
        assert_eq!(TransferProgress::new(50, Some(200)).percent(), 25.0);
        assert_eq!(TransferProgress::new(500, Some(200)).percent(), 100.0);
        assert_eq!(TransferProgress::new(50, None).percent(), 1.0);
        assert_eq!(TransferProgress::new(50, Some(0)).percent(), 1.0);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(human_rate(2048), "2.0 KB/s");
    }

    #[test]
    fn test_logging_sink_cancel_and_repeat_updates() {
        let sink = LoggingSink::new();
        let snapshot = StatusSnapshot::phase(CanonicalStatus::Prebuffering);
        let context = ProgressContext {
            snapshot: &snapshot,
            file_name: Some("x.mkv"),
            target_size: None,
        };

        sink.open("Buffering");
        sink.update(10.0, &context);
        sink.update(10.0, &context);
        assert!(!sink.is_cancelled());
        sink.cancel();
        assert!(sink.is_cancelled());
        sink.close();
    }
}
