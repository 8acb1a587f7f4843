//! iCalendar (RFC 5545) rendering for all-day events.
//!
//! Only the subset the calendar view needs: `VCALENDAR` with one `VEVENT` per
//! event, date-only start and exclusive end, escaped text and folded lines.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Result, SiftError};
use crate::model::CalendarEvent;

/// Maximum octets per content line, excluding the CRLF.
pub const MAX_LINE_OCTETS: usize = 75;

const CRLF: &str = "\r\n";

/// The calendar day after an ISO `YYYY-MM-DD` date, or `None` if it does not
/// parse. Pure date arithmetic, no time zone involved.
pub fn next_day(date: &str) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    parsed.succ_opt().map(|d| d.format("%Y-%m-%d").to_string())
}

fn ical_date(date: &str) -> Option<String> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y%m%d").to_string())
}

fn ical_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Escape TEXT values: backslash, semicolon, comma and newline.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Inverse of [`escape_text`].
pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Fold a content line into chunks of at most 75 octets. Continuation lines
/// start with a single space, which counts toward their 75. Multi-byte
/// characters are never split.
pub fn fold_line(line: &str) -> String {
    if line.len() <= MAX_LINE_OCTETS {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len() + line.len() / 37);
    let mut budget = MAX_LINE_OCTETS;
    let mut used = 0;
    for c in line.chars() {
        let width = c.len_utf8();
        if used + width > budget {
            out.push_str(CRLF);
            out.push(' ');
            budget = MAX_LINE_OCTETS - 1;
            used = 0;
        }
        out.push(c);
        used += width;
    }
    out
}

#[derive(Debug, Clone)]
pub struct IcsOptions {
    pub prod_id: String,
    pub uid_domain: String,
    pub dtstamp: DateTime<Utc>,
}

impl IcsOptions {
    pub fn new(prod_id: &str, uid_domain: &str) -> Self {
        Self {
            prod_id: prod_id.to_string(),
            uid_domain: uid_domain.to_string(),
            dtstamp: Utc::now(),
        }
    }

    pub fn with_dtstamp(mut self, at: DateTime<Utc>) -> Self {
        self.dtstamp = at;
        self
    }
}

/// A rendered calendar and what went into it.
#[derive(Debug, Clone)]
pub struct IcsDocument {
    pub content: String,
    pub exported: usize,
    /// Ids of events left out because their date did not parse.
    pub skipped: Vec<String>,
}

/// Fold events into an iCalendar document. Lines are CRLF-separated with no
/// trailing CRLF after `END:VCALENDAR`.
pub fn render_calendar(events: &[CalendarEvent], opts: &IcsOptions) -> IcsDocument {
    let stamp = ical_timestamp(opts.dtstamp);
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        fold_line(&format!("PRODID:{}", opts.prod_id)),
        "VERSION:2.0".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
    ];
    let mut exported = 0;
    let mut skipped = Vec::new();

    for event in events {
        let start = ical_date(&event.date);
        let end = event.end.as_deref().and_then(ical_date);
        let (Some(start), Some(end)) = (start, end) else {
            tracing::warn!(id = %event.id, date = %event.date, "skipping event with invalid date");
            skipped.push(event.id.clone());
            continue;
        };

        lines.push("BEGIN:VEVENT".to_string());
        lines.push(fold_line(&format!("UID:{}@{}", event.id, opts.uid_domain)));
        lines.push(format!("DTSTAMP:{stamp}"));
        lines.push(format!("DTSTART;VALUE=DATE:{start}"));
        lines.push(format!("DTEND;VALUE=DATE:{end}"));
        lines.push(fold_line(&format!("SUMMARY:{}", escape_text(&event.title))));
        if !event.props.description.is_empty() {
            lines.push(fold_line(&format!(
                "DESCRIPTION:{}",
                escape_text(&event.props.description)
            )));
        }
        if let Some(location) = event.location() {
            lines.push(fold_line(&format!("LOCATION:{}", escape_text(location))));
        }
        lines.push("END:VEVENT".to_string());
        exported += 1;
    }

    lines.push("END:VCALENDAR".to_string());
    IcsDocument {
        content: lines.join(CRLF),
        exported,
        skipped,
    }
}

/// Render and write `events` to `path`. Refuses to write when nothing would
/// end up in the file.
pub fn export_ics(
    events: &[CalendarEvent],
    opts: &IcsOptions,
    path: &Path,
) -> Result<IcsDocument> {
    if events.is_empty() {
        return Err(SiftError::InvalidInput("No events to export.".into()));
    }
    let doc = render_calendar(events, opts);
    if doc.exported == 0 {
        return Err(SiftError::InvalidInput(format!(
            "none of the {} events has a valid date",
            events.len()
        )));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, &doc.content)?;
    tracing::info!(
        path = %path.display(),
        exported = doc.exported,
        skipped = doc.skipped.len(),
        "wrote calendar file"
    );
    Ok(doc)
}
