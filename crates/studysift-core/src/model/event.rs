use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::CalendarEntry;
use crate::ical::next_day;

const UNTITLED: &str = "Untitled event";
const UNKNOWN_FILE: &str = "Unknown";
const NOT_AVAILABLE: &str = "N/A";

/// An all-day event derived from a record's key dates. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    /// Start date as sent by the backend.
    pub date: String,
    /// Exclusive end (`date + 1 day`). `None` when `date` does not parse.
    pub end: Option<String>,
    pub props: EventProps,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventProps {
    pub filename: String,
    pub subject: String,
    pub degree: String,
    pub department: String,
    pub university: String,
    pub pass_conditions: String,
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl CalendarEvent {
    pub fn has_valid_date(&self) -> bool {
        self.end.is_some()
    }

    /// Location, ignoring the `N/A` placeholder.
    pub fn location(&self) -> Option<&str> {
        self.props
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != NOT_AVAILABLE)
    }

    /// Request body for the remote calendar endpoint, or `None` if the date
    /// is unusable.
    pub fn to_remote_request(&self) -> Option<RemoteEventRequest> {
        let end = self.end.clone()?;
        Some(RemoteEventRequest {
            event_id: self.id.clone(),
            summary: self.title.clone(),
            start_date: self.date.trim().to_string(),
            end_date: end,
            description: self.props.description.clone(),
            location: self.location().unwrap_or_default().to_string(),
        })
    }
}

/// One create/update call against the linked external calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEventRequest {
    pub event_id: String,
    pub summary: String,
    pub start_date: String,
    pub end_date: String,
    pub description: String,
    pub location: String,
}

fn or_placeholder(value: &str, placeholder: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder.to_string()
    } else {
        trimmed.to_string()
    }
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("event");
    }
    out
}

/// Flatten every entry's key dates into calendar events.
///
/// Dates with an empty `fecha` are dropped with a warning. Dates that are
/// present but unparseable are kept with `end = None` so the exporters can
/// report them. Ids are `<file>-<title>-<date>`, suffixed `-2`, `-3`, ... on
/// collision within the batch.
pub fn build_events(entries: &[CalendarEntry]) -> Vec<CalendarEvent> {
    let mut events = Vec::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut next_suffix: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        if entry.record.dates.is_empty() {
            tracing::debug!(
                file_id = ?entry.file_id,
                "calendar entry has no dates"
            );
        }
        let file = entry
            .file_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "no-file".to_string());
        let filename = or_placeholder(entry.filename.as_deref().unwrap_or_default(), UNKNOWN_FILE);
        let subject = &entry.record.subject;
        let subject_name = or_placeholder(&subject.name, NOT_AVAILABLE);

        for key_date in &entry.record.dates {
            let date = key_date.date.trim();
            if date.is_empty() {
                tracing::warn!(
                    file_id = ?entry.file_id,
                    title = %key_date.title,
                    "skipping key date without a date"
                );
                continue;
            }

            let title = key_date
                .description
                .as_deref()
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .or_else(|| Some(key_date.title.trim()).filter(|t| !t.is_empty()))
                .unwrap_or(UNTITLED)
                .to_string();

            let base = format!("{file}-{}-{date}", slug(&title));
            let id = if used.contains(&base) {
                // a suffixed id may itself be some later event's natural id
                let n = next_suffix.entry(base.clone()).or_insert(2);
                while used.contains(&format!("{base}-{n}")) {
                    *n += 1;
                }
                let id = format!("{base}-{n}");
                *n += 1;
                id
            } else {
                base
            };
            used.insert(id.clone());

            let end = next_day(date);
            if end.is_none() {
                tracing::warn!(id = %id, date = %date, "key date is not a valid ISO date");
            }

            events.push(CalendarEvent {
                id,
                title,
                date: date.to_string(),
                end,
                props: EventProps {
                    filename: filename.clone(),
                    subject: subject_name.clone(),
                    degree: or_placeholder(&subject.degree, NOT_AVAILABLE),
                    department: or_placeholder(&subject.department, NOT_AVAILABLE),
                    university: or_placeholder(&subject.university, NOT_AVAILABLE),
                    pass_conditions: or_placeholder(&subject.pass_conditions, NOT_AVAILABLE),
                    description: format!("File: {filename}\nSubject: {subject_name}"),
                    location: key_date.location.clone(),
                },
            });
        }
    }

    events
}
