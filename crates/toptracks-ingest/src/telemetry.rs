//! Best-effort error reporting
//!
//! Components that keep going after a failed write (chart persistence, the
//! catalog merge, the swap alarm) take an `&dyn ErrorReporter` instead of
//! reaching for a global client.

use std::sync::Mutex;
use tracing::error;

/// Sink for failures that must reach operators without aborting the caller
pub trait ErrorReporter: Send + Sync {
    /// Report a failure
    ///
    /// `context` names the operation, e.g. `"save_chart 143441.14"`.
    fn report(&self, context: &str, error: &(dyn std::error::Error + 'static));
}

/// Emits reports as structured `error!` events tagged `telemetry = true`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, context: &str, error: &(dyn std::error::Error + 'static)) {
        error!(telemetry = true, context = %context, error = %error, "Reported failure");
    }
}

/// A single captured report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub context: String,
    pub message: String,
}

/// Keeps every report in memory, for dry runs and tests
#[derive(Debug, Default)]
pub struct CollectingReporter {
    reports: Mutex<Vec<Report>>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|reports| reports.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorReporter for CollectingReporter {
    fn report(&self, context: &str, error: &(dyn std::error::Error + 'static)) {
        TracingReporter.report(context, error);

        if let Ok(mut reports) = self.reports.lock() {
            reports.push(Report {
                context: context.to_string(),
                message: error.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter_keeps_reports() {
        let reporter = CollectingReporter::new();
        assert!(reporter.is_empty());

        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        reporter.report("insert_track 100", &err);

        let reports = reporter.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].context, "insert_track 100");
        assert_eq!(reports[0].message, "disk full");
    }
}
