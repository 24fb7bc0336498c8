use rsm_core::IngestEvent;

/// Turn an ingestion event into a human-readable line, or `None` for events
/// that are only interesting as state transitions (start/stop markers).
pub fn format_event_line(event: &IngestEvent) -> Option<String> {
    match event {
        IngestEvent::Started => Some("watcher started".to_string()),
        IngestEvent::StopRequested => {
            Some("stop requested — draining the queue before exiting".to_string())
        }
        IngestEvent::JobStarted { id, retry } if *retry > 0 => {
            Some(format!("{id}: retry {retry} started"))
        }
        IngestEvent::JobStarted { .. } => None,
        IngestEvent::JobEnqueued { id, seq } => Some(format!("{id}: enqueued @{seq}")),
        IngestEvent::JobFinished { id } => Some(format!("{id}: done")),
        IngestEvent::JobRetrying { id, retry } => Some(format!("{id}: transient failure, retry {retry} scheduled")),
        IngestEvent::JobParked { id } => Some(format!("{id}: retries exhausted, parked")),
        IngestEvent::Reaped { count } if *count > 0 => Some(format!("reaper reinjected {count} parked job(s)")),
        IngestEvent::Reaped { .. } => None,
        IngestEvent::RefreshScanned { injected } if *injected > 0 => {
            Some(format!("refresh scan reinjected {injected} stale record(s)"))
        }
        IngestEvent::RefreshScanned { .. } => None,
        IngestEvent::Warning { message } => Some(format!("warning: {message}")),
        IngestEvent::Stopped => Some("watcher stopped".to_string()),
    }
}
