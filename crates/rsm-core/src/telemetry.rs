use std::time::Duration;

/// Counters, gauges, timings, and an error reporter — the telemetry sink
/// contract (§1, §6). The lifecycle controller also broadcasts
/// [`crate::api::IngestEvent`]s for anything progress-shaped; this trait is
/// for a caller that wants raw metrics instead of (or in addition to)
/// subscribing to the event stream.
pub trait Telemetry: Send + Sync {
    /// Increment a named counter by `delta`.
    fn incr_counter(&self, name: &'static str, delta: u64);
    /// Set a named gauge to `value`.
    fn set_gauge(&self, name: &'static str, value: i64);
    /// Record how long a named operation took.
    fn record_duration(&self, name: &'static str, elapsed: Duration);
    /// Report a non-fatal error with some context label.
    fn report_error(&self, context: &str, message: &str);
}

/// Discards everything. The default when a caller doesn't care.
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn incr_counter(&self, _name: &'static str, _delta: u64) {}
    fn set_gauge(&self, _name: &'static str, _value: i64) {}
    fn record_duration(&self, _name: &'static str, _elapsed: Duration) {}
    fn report_error(&self, _context: &str, _message: &str) {}
}

/// Prints to stderr, the same `warning:`/`error:` convention the upstream
/// client uses for its own ad hoc logging.
pub struct StderrTelemetry;

impl Telemetry for StderrTelemetry {
    fn incr_counter(&self, name: &'static str, delta: u64) {
        eprintln!("counter: {name} +{delta}");
    }

    fn set_gauge(&self, name: &'static str, value: i64) {
        eprintln!("gauge: {name} = {value}");
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        eprintln!("timing: {name} took {}ms", elapsed.as_millis());
    }

    fn report_error(&self, context: &str, message: &str) {
        eprintln!("error: {context}: {message}");
    }
}
