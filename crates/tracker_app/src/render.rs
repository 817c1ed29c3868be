use chrono::{DateTime, Local, Utc};
use engine_logging::short_id;
use tracker_core::{JobKind, ProgressCardView, ProgressItem, Timestamp, TrackerViewModel};
use tracker_engine::TrackerEvent;

pub fn render_view(view: &TrackerViewModel) -> Vec<String> {
    view.cards.iter().map(card_line).collect()
}

/// One line per job: id, kind, status, progress, source, then the most
/// useful detail available.
pub fn card_line(card: &ProgressCardView) -> String {
    let mut line = format!(
        "{:<8} {:<6} {:<12} {:>5.1}%",
        short_id(&card.job_id),
        kind_label(card.kind),
        card.status.as_str(),
        card.percentage
    );
    if let Some((processed, total)) = card.pages {
        line.push_str(&format!(" [{processed}/{total}]"));
    }
    if let Some(source) = &card.source {
        line.push_str(&format!(" {source}"));
    }
    let detail = card
        .error
        .as_ref()
        .or(card.last_log.as_ref())
        .or(card.message.as_ref());
    if let Some(detail) = detail {
        line.push_str(&format!(" | {detail}"));
    }
    line
}

/// Line for a persisted entry; the snapshot may be missing or unreadable.
pub fn snapshot_line(job_id: &str, snapshot: Option<&ProgressItem>) -> String {
    match snapshot {
        Some(item) => format!(
            "{:<8} {:<6} {:<12} {:>5.1}% started {} {}",
            short_id(job_id),
            kind_label(item.kind),
            item.status.as_str(),
            item.percentage,
            format_time(item.started_at),
            item.source.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        None => format!("{:<8} (no snapshot)", short_id(job_id)),
    }
}

pub fn event_line(event: &TrackerEvent) -> Option<String> {
    match event {
        TrackerEvent::ArtifactsRefreshed(list) => {
            Some(format!("Knowledge base now holds {} items", list.total))
        }
        TrackerEvent::ArtifactsRefreshFailed(error) => {
            Some(format!("Could not refresh knowledge items: {error}"))
        }
        TrackerEvent::StatusChanged { .. } | TrackerEvent::SurfaceVisibility(_) => None,
    }
}

fn kind_label(kind: Option<JobKind>) -> &'static str {
    match kind {
        Some(JobKind::Crawl) => "crawl",
        Some(JobKind::Upload) => "upload",
        None => "-",
    }
}

fn format_time(timestamp: Timestamp) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "?".to_string())
}
