//! Lock-free pipeline counters
//!
//! Every counter is a monotonic `AtomicU64` updated from the job worker and read
//! by the HTTP `/metrics` handler. `report()` takes a snapshot and also resets
//! the per-report run duration statistics.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical counters only.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    /// Triggers refused because the same window was already running
    runs_rejected: AtomicU64,
    readings_loaded: AtomicU64,
    positions_solved: AtomicU64,
    /// Timestamp groups that produced no position
    groups_skipped: AtomicU64,
    /// Groups with more than three readings cut down to the nearest three
    anchors_trimmed: AtomicU64,
    assignments: AtomicU64,
    unassigned: AtomicU64,
    directory_fetches: AtomicU64,
    directory_errors: AtomicU64,
    sessions_emitted: AtomicU64,
    sink_errors: AtomicU64,
    /// Run durations since last report (reset on report)
    run_duration_sum_ms: AtomicU64,
    run_duration_max_ms: AtomicU64,
    runs_since_report: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_rejected: AtomicU64::new(0),
            readings_loaded: AtomicU64::new(0),
            positions_solved: AtomicU64::new(0),
            groups_skipped: AtomicU64::new(0),
            anchors_trimmed: AtomicU64::new(0),
            assignments: AtomicU64::new(0),
            unassigned: AtomicU64::new(0),
            directory_fetches: AtomicU64::new(0),
            directory_errors: AtomicU64::new(0),
            sessions_emitted: AtomicU64::new(0),
            sink_errors: AtomicU64::new(0),
            run_duration_sum_ms: AtomicU64::new(0),
            run_duration_max_ms: AtomicU64::new(0),
            runs_since_report: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished run and its wall-clock duration
    #[inline]
    pub fn record_run_finished(&self, succeeded: bool, duration_ms: u64) {
        if succeeded {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.runs_since_report.fetch_add(1, Ordering::Relaxed);
        self.run_duration_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        update_atomic_max(&self.run_duration_max_ms, duration_ms);
    }

    #[inline]
    pub fn record_run_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_readings(&self, count: u64) {
        self.readings_loaded.fetch_add(count, Ordering::Relaxed);
    }

    /// Record the outcome of solving one beacon's readings
    #[inline]
    pub fn record_solve(&self, solved: u64, skipped: u64, trimmed: u64) {
        self.positions_solved.fetch_add(solved, Ordering::Relaxed);
        self.groups_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.anchors_trimmed.fetch_add(trimmed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_classification(&self, assigned: u64, unassigned: u64) {
        self.assignments.fetch_add(assigned, Ordering::Relaxed);
        self.unassigned.fetch_add(unassigned, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_directory_fetches(&self, fetches: u64, errors: u64) {
        self.directory_fetches.fetch_add(fetches, Ordering::Relaxed);
        self.directory_errors.fetch_add(errors, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sessions(&self, count: u64) {
        self.sessions_emitted.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sink_error(&self) {
        self.sink_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn positions_solved(&self) -> u64 {
        self.positions_solved.load(Ordering::Relaxed)
    }

    /// Snapshot every counter, then reset the per-report duration stats
    pub fn report(&self) -> MetricsSummary {
        let runs_since_report = self.runs_since_report.swap(0, Ordering::Relaxed);
        let duration_sum = self.run_duration_sum_ms.swap(0, Ordering::Relaxed);
        let duration_max = self.run_duration_max_ms.swap(0, Ordering::Relaxed);
        let avg_run_ms = if runs_since_report > 0 { duration_sum / runs_since_report } else { 0 };

        MetricsSummary {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_rejected: self.runs_rejected.load(Ordering::Relaxed),
            readings_loaded: self.readings_loaded.load(Ordering::Relaxed),
            positions_solved: self.positions_solved.load(Ordering::Relaxed),
            groups_skipped: self.groups_skipped.load(Ordering::Relaxed),
            anchors_trimmed: self.anchors_trimmed.load(Ordering::Relaxed),
            assignments: self.assignments.load(Ordering::Relaxed),
            unassigned: self.unassigned.load(Ordering::Relaxed),
            directory_fetches: self.directory_fetches.load(Ordering::Relaxed),
            directory_errors: self.directory_errors.load(Ordering::Relaxed),
            sessions_emitted: self.sessions_emitted.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
            runs_since_report,
            avg_run_ms,
            max_run_ms: duration_max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_rejected: u64,
    pub readings_loaded: u64,
    pub positions_solved: u64,
    pub groups_skipped: u64,
    pub anchors_trimmed: u64,
    pub assignments: u64,
    pub unassigned: u64,
    pub directory_fetches: u64,
    pub directory_errors: u64,
    pub sessions_emitted: u64,
    pub sink_errors: u64,
    /// Runs finished since the previous report
    pub runs_since_report: u64,
    pub avg_run_ms: u64,
    pub max_run_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            runs_started = %self.runs_started,
            runs_completed = %self.runs_completed,
            runs_failed = %self.runs_failed,
            readings = %self.readings_loaded,
            positions = %self.positions_solved,
            skipped = %self.groups_skipped,
            assignments = %self.assignments,
            sessions = %self.sessions_emitted,
            directory_errors = %self.directory_errors,
            avg_run_ms = %self.avg_run_ms,
            max_run_ms = %self.max_run_ms,
            "metrics"
        );
    }

    /// Render as Prometheus text exposition format
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, u64); 14] = [
            ("positioning_runs_started_total", "Pipeline runs started", self.runs_started),
            ("positioning_runs_completed_total", "Pipeline runs completed", self.runs_completed),
            ("positioning_runs_failed_total", "Pipeline runs failed", self.runs_failed),
            ("positioning_runs_rejected_total", "Triggers rejected as duplicates", self.runs_rejected),
            ("positioning_readings_total", "Usable readings loaded", self.readings_loaded),
            ("positioning_positions_total", "Positions solved", self.positions_solved),
            ("positioning_groups_skipped_total", "Reading groups without a position", self.groups_skipped),
            ("positioning_anchors_trimmed_total", "Groups trimmed to three anchors", self.anchors_trimmed),
            ("positioning_assignments_total", "Positions assigned to an area", self.assignments),
            ("positioning_unassigned_total", "Positions outside every area", self.unassigned),
            ("positioning_directory_fetches_total", "Directory lookups issued", self.directory_fetches),
            ("positioning_directory_errors_total", "Directory lookups failed", self.directory_errors),
            ("positioning_sessions_total", "Dwell sessions emitted", self.sessions_emitted),
            ("positioning_sink_errors_total", "Session sink write failures", self.sink_errors),
        ];

        let mut output = String::with_capacity(2048);
        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }
        output.push_str("# HELP positioning_run_duration_max_ms Longest run since last scrape\n");
        output.push_str("# TYPE positioning_run_duration_max_ms gauge\n");
        output.push_str(&format!("positioning_run_duration_max_ms {}\n", self.max_run_ms));
        output
    }
}
