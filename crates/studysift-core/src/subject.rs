//! Subject listing and in-place editing of a subject's record before saving.

use crate::api::HttpBackend;
use crate::error::{Result, SiftError};
use crate::model::{CalendarEntry, ExtractedRecord, KeyDate, Professor, Schedule};

pub const SCHEDULE_KINDS: [&str; 3] = ["teoria", "practica", "tutoria"];

/// Find the entry whose subject is called `name`.
pub fn find_subject<'a>(entries: &'a [CalendarEntry], name: &str) -> Result<&'a CalendarEntry> {
    entries
        .iter()
        .find(|e| e.subject_name() == name)
        .ok_or_else(|| SiftError::NotFound(format!("subject '{name}'")))
}

/// Distinct subject names, in listing order.
pub fn subject_names(entries: &[CalendarEntry]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for entry in entries {
        let name = entry.subject_name().trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// List sections of a record that hold removable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Schedules,
    Dates,
    Professors,
}

impl std::str::FromStr for Section {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "schedules" | "horarios" => Ok(Self::Schedules),
            "dates" | "fechas" => Ok(Self::Dates),
            "professors" | "profesores" => Ok(Self::Professors),
            other => Err(format!(
                "unknown section: {other}, valid: schedules, dates, professors"
            )),
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schedules => write!(f, "schedules"),
            Self::Dates => write!(f, "dates"),
            Self::Professors => write!(f, "professors"),
        }
    }
}

/// Local working copy of one subject. Nothing reaches the backend until
/// [`SubjectEditor::save`], which replaces the whole record.
#[derive(Debug, Clone)]
pub struct SubjectEditor {
    original_name: String,
    record: ExtractedRecord,
}

impl SubjectEditor {
    pub fn new(record: ExtractedRecord) -> Self {
        Self {
            original_name: record.subject.name.clone(),
            record,
        }
    }

    pub fn from_entries(entries: &[CalendarEntry], name: &str) -> Result<Self> {
        Ok(Self::new(find_subject(entries, name)?.record.clone()))
    }

    /// Name the record is saved under, even if the subject was renamed.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn record(&self) -> &ExtractedRecord {
        &self.record
    }

    /// Set a subject field by its wire or English name.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<()> {
        let subject = &mut self.record.subject;
        let slot = match field {
            "nombre" | "name" => &mut subject.name,
            "grado" | "degree" => &mut subject.degree,
            "departamento" | "department" => &mut subject.department,
            "universidad" | "university" => &mut subject.university,
            "condiciones_aprobado" | "pass_conditions" => &mut subject.pass_conditions,
            other => {
                return Err(SiftError::InvalidInput(format!(
                    "unknown subject field '{other}'"
                )))
            }
        };
        *slot = value.to_string();
        Ok(())
    }

    /// Group and hours are required. An empty kind defaults to `teoria`.
    pub fn add_schedule(&mut self, mut schedule: Schedule) -> Result<()> {
        if schedule.group.trim().is_empty() || schedule.hours.trim().is_empty() {
            return Err(SiftError::InvalidInput(
                "a schedule needs at least a group and hours".into(),
            ));
        }
        if schedule.kind.trim().is_empty() {
            schedule.kind = SCHEDULE_KINDS[0].to_string();
        }
        if !SCHEDULE_KINDS.contains(&schedule.kind.as_str()) {
            return Err(SiftError::InvalidInput(format!(
                "unknown schedule type '{}', valid: {}",
                schedule.kind,
                SCHEDULE_KINDS.join(", ")
            )));
        }
        self.record.schedules.push(schedule);
        Ok(())
    }

    /// Title and an ISO date are required.
    pub fn add_date(&mut self, date: KeyDate) -> Result<()> {
        if date.title.trim().is_empty() || date.date.trim().is_empty() {
            return Err(SiftError::InvalidInput(
                "a date needs a title and a date".into(),
            ));
        }
        if date.parsed_date().is_none() {
            return Err(SiftError::InvalidInput(format!(
                "'{}' is not a YYYY-MM-DD date",
                date.date
            )));
        }
        self.record.dates.push(date);
        Ok(())
    }

    pub fn add_professor(&mut self, professor: Professor) -> Result<()> {
        if professor.name.trim().is_empty() {
            return Err(SiftError::InvalidInput(
                "a professor needs at least a name".into(),
            ));
        }
        self.record.professors.push(professor);
        Ok(())
    }

    /// Remove the item at `index` (0-based) from `section`.
    pub fn remove(&mut self, section: Section, index: usize) -> Result<()> {
        let len = match section {
            Section::Schedules => self.record.schedules.len(),
            Section::Dates => self.record.dates.len(),
            Section::Professors => self.record.professors.len(),
        };
        if index >= len {
            return Err(SiftError::InvalidInput(format!(
                "{section} has {len} items, no index {index}"
            )));
        }
        match section {
            Section::Schedules => {
                self.record.schedules.remove(index);
            }
            Section::Dates => {
                self.record.dates.remove(index);
            }
            Section::Professors => {
                self.record.professors.remove(index);
            }
        }
        Ok(())
    }

    /// Replace the stored record. After a rename the editor follows the new name.
    pub async fn save(&mut self, backend: &HttpBackend) -> Result<()> {
        if self.record.subject.name.trim().is_empty() {
            return Err(SiftError::InvalidInput("subject name cannot be empty".into()));
        }
        backend
            .update_subject(&self.original_name, &self.record)
            .await?;
        tracing::info!(subject = %self.original_name, "subject saved");
        self.original_name = self.record.subject.name.clone();
        Ok(())
    }
}
