//! Remote calendar export: one request per event, in order, with a running
//! status log.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::CalendarApi;
use crate::error::{Result, SiftError};
use crate::model::CalendarEvent;

const HEADER: &str = "Exporting events to Google Calendar...";

/// How long the final summary stays on the panel.
pub const DEFAULT_CLEAR_AFTER: Duration = Duration::from_secs(10);

/// Text panel the front-end renders while an export runs.
#[derive(Clone)]
pub struct StatusPanel {
    tx: Arc<watch::Sender<String>>,
    clear_after: Duration,
}

impl Default for StatusPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPanel {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(String::new());
        Self {
            tx: Arc::new(tx),
            clear_after: DEFAULT_CLEAR_AFTER,
        }
    }

    pub fn with_clear_after(mut self, after: Duration) -> Self {
        self.clear_after = after;
        self
    }

    pub fn clear_after(&self) -> Duration {
        self.clear_after
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn text(&self) -> String {
        self.tx.borrow().clone()
    }

    pub fn set(&self, text: impl Into<String>) {
        self.tx.send_replace(text.into());
    }

    pub fn clear(&self) {
        self.tx.send_replace(String::new());
    }

    /// Clear the panel after `after`, unless something else was written
    /// in the meantime.
    pub fn schedule_clear(&self, after: Duration) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let snapshot = self.text();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            tx.send_if_modified(|text| {
                if *text == snapshot {
                    text.clear();
                    true
                } else {
                    false
                }
            });
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub event_id: String,
    pub title: String,
    pub success: bool,
    pub message: String,
    /// The failure happened before the server answered.
    pub network_error: bool,
    /// The server reported an update of an existing event.
    pub updated: bool,
}

impl ExportOutcome {
    pub fn line(&self) -> String {
        if self.success {
            let verb = if self.updated { "Updated" } else { "Exported" };
            format!("✅ {verb}: \"{}\"", self.title)
        } else if self.network_error {
            format!(
                "❌ Network error exporting \"{}\": {}",
                self.title, self.message
            )
        } else {
            format!("❌ Failed to export \"{}\": {}", self.title, self.message)
        }
    }
}

/// Immutable result of one export run, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    outcomes: Vec<ExportOutcome>,
}

impl ExportReport {
    fn push(mut self, outcome: ExportOutcome) -> Self {
        self.outcomes.push(outcome);
        self
    }

    pub fn outcomes(&self) -> &[ExportOutcome] {
        &self.outcomes
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// One line per event.
    pub fn lines(&self) -> Vec<String> {
        self.outcomes.iter().map(ExportOutcome::line).collect()
    }

    pub fn summary(&self) -> String {
        if self.failed() > 0 {
            format!(
                "Export finished. Succeeded: {}, failed: {}",
                self.succeeded(),
                self.failed()
            )
        } else {
            "Export finished.".to_string()
        }
    }

    fn render(&self, pending: Option<&str>, with_summary: bool) -> String {
        let mut lines = vec![HEADER.to_string()];
        lines.extend(self.lines());
        if let Some(title) = pending {
            lines.push(format!("Exporting \"{title}\"..."));
        }
        if with_summary {
            lines.push(String::new());
            lines.push(self.summary());
        }
        lines.join("\n")
    }
}

fn is_update_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("actualizado") || lower.contains("updated")
}

async fn export_one<C: CalendarApi>(api: &C, event: &CalendarEvent) -> ExportOutcome {
    let base = ExportOutcome {
        event_id: event.id.clone(),
        title: event.title.clone(),
        success: false,
        message: String::new(),
        network_error: false,
        updated: false,
    };

    let Some(request) = event.to_remote_request() else {
        tracing::warn!(id = %event.id, date = %event.date, "not exporting event with invalid date");
        return ExportOutcome {
            message: format!("invalid date '{}'", event.date),
            ..base
        };
    };

    match api.export_remote_event(&request).await {
        Ok(resp) => {
            let message = resp.message.unwrap_or_default();
            ExportOutcome {
                success: true,
                updated: is_update_message(&message),
                message,
                ..base
            }
        }
        Err(e) => {
            tracing::warn!(id = %event.id, "remote export failed: {e}");
            let network_error = matches!(e, SiftError::Transport(_));
            ExportOutcome {
                message: e.user_message(),
                network_error,
                ..base
            }
        }
    }
}

/// Export `events` one at a time to the linked calendar.
///
/// Each event is attempted exactly once and failures never stop the run.
/// `panel` is rewritten after every event and cleared
/// [`StatusPanel::clear_after`] once the run ends. Without a linked account
/// nothing is sent. Cancelling stops before the next event and returns
/// [`SiftError::Cancelled`].
pub async fn export_events<C: CalendarApi>(
    api: &C,
    events: &[CalendarEvent],
    linked: bool,
    panel: &StatusPanel,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    if events.is_empty() {
        panel.set("No events to export.");
        return Ok(ExportReport::default());
    }
    if !linked {
        let msg = "Link your Google account first.";
        panel.set(msg);
        return Err(SiftError::CalendarNotLinked(msg.into()));
    }

    panel.set(HEADER);
    let mut report = ExportReport::default();
    for event in events {
        if cancel.is_cancelled() {
            tracing::info!(done = report.outcomes.len(), "remote export cancelled");
            return Err(SiftError::Cancelled);
        }
        panel.set(report.render(Some(event.title.as_str()), false));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SiftError::Cancelled),
            o = export_one(api, event) => o,
        };
        report = report.push(outcome);
        panel.set(report.render(None, false));
    }

    panel.set(report.render(None, true));
    panel.schedule_clear(panel.clear_after());
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "remote export finished"
    );
    Ok(report)
}
