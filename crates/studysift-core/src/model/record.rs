use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SiftError};

/// Structured academic data extracted from one document.
///
/// Wire keys are the Spanish names the backend uses. Missing sections
/// deserialize as empty so a partial extraction still renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    #[serde(rename = "asignatura", default)]
    pub subject: Subject,
    #[serde(rename = "horarios", default)]
    pub schedules: Vec<Schedule>,
    #[serde(rename = "fechas", default)]
    pub dates: Vec<KeyDate>,
    #[serde(rename = "profesores", default)]
    pub professors: Vec<Professor>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    #[serde(rename = "nombre", default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(rename = "grado", default, deserialize_with = "nullable")]
    pub degree: String,
    #[serde(rename = "departamento", default, deserialize_with = "nullable")]
    pub department: String,
    #[serde(rename = "universidad", default, deserialize_with = "nullable")]
    pub university: String,
    #[serde(rename = "condiciones_aprobado", default, deserialize_with = "nullable")]
    pub pass_conditions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "grupo", default, deserialize_with = "nullable")]
    pub group: String,
    /// `teoria`, `practica` or `tutoria`.
    #[serde(rename = "tipo", default, deserialize_with = "nullable")]
    pub kind: String,
    /// Time span such as `10:40-12:30`.
    #[serde(rename = "hora", default, deserialize_with = "nullable")]
    pub hours: String,
    #[serde(rename = "dia", default, deserialize_with = "nullable")]
    pub day: String,
    #[serde(rename = "aula", default, deserialize_with = "nullable")]
    pub room: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyDate {
    #[serde(rename = "titulo", default, deserialize_with = "nullable")]
    pub title: String,
    /// ISO `YYYY-MM-DD`. Kept as text since extractions are not always clean.
    #[serde(rename = "fecha", default, deserialize_with = "nullable")]
    pub date: String,
    #[serde(
        rename = "descripcion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(rename = "lugar", default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Professor {
    #[serde(rename = "nombre", default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(rename = "despacho", default, deserialize_with = "nullable")]
    pub office: String,
    #[serde(rename = "enlace", default, deserialize_with = "nullable")]
    pub link: String,
}

impl Schedule {
    pub fn new(group: &str, kind: &str, hours: &str) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
            hours: hours.to_string(),
            ..Default::default()
        }
    }
}

impl KeyDate {
    pub fn new(title: &str, date: &str) -> Self {
        Self {
            title: title.to_string(),
            date: date.to_string(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn parsed_date(&self) -> Option<chrono::NaiveDate> {
        chrono::NaiveDate::parse_from_str(self.date.trim(), "%Y-%m-%d").ok()
    }
}

impl Professor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// Treat JSON `null` as an empty string.
fn nullable<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lenient mirror of [`ExtractedRecord`] used to spot absent sections.
#[derive(Deserialize)]
struct RawRecord {
    asignatura: Option<Subject>,
    horarios: Option<Vec<Schedule>>,
    fechas: Option<Vec<KeyDate>>,
    profesores: Option<Vec<Professor>>,
}

/// Extracted data as it arrives from the backend: either a usable record
/// or nothing at all.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedData {
    Record(ExtractedRecord),
    Missing,
}

impl ExtractedData {
    /// Validate a raw `extracted_data` value once, at the API boundary.
    ///
    /// Accepts an object or an array whose first element is the record.
    /// `null`, empty arrays and empty objects are `Missing`. Absent sections
    /// are logged and treated as empty.
    pub fn from_value(value: &Value) -> Result<Self> {
        let candidate = match value {
            Value::Null => return Ok(Self::Missing),
            Value::Array(items) => match items.first() {
                Some(first) => first,
                None => return Ok(Self::Missing),
            },
            other => other,
        };

        let Value::Object(map) = candidate else {
            return Err(SiftError::InvalidInput(format!(
                "extracted data is not an object: {candidate}"
            )));
        };
        if map.is_empty() {
            return Ok(Self::Missing);
        }

        let raw: RawRecord = serde_json::from_value(candidate.clone())?;
        if raw.asignatura.is_none() {
            tracing::warn!("extracted data has no 'asignatura' section");
        }
        if raw.horarios.is_none() {
            tracing::warn!("extracted data has no 'horarios' section");
        }
        if raw.fechas.is_none() {
            tracing::warn!("extracted data has no 'fechas' section");
        }
        if raw.profesores.is_none() {
            tracing::warn!("extracted data has no 'profesores' section");
        }

        Ok(Self::Record(ExtractedRecord {
            subject: raw.asignatura.unwrap_or_default(),
            schedules: raw.horarios.unwrap_or_default(),
            dates: raw.fechas.unwrap_or_default(),
            professors: raw.profesores.unwrap_or_default(),
        }))
    }

    pub fn record(&self) -> Option<&ExtractedRecord> {
        match self {
            Self::Record(r) => Some(r),
            Self::Missing => None,
        }
    }

    pub fn into_record(self) -> Option<ExtractedRecord> {
        match self {
            Self::Record(r) => Some(r),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

/// One entry of the calendar data listing: a record plus the file it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    #[serde(default)]
    pub file_id: Option<i64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(flatten)]
    pub record: ExtractedRecord,
}

impl CalendarEntry {
    /// Parse one listing item, tolerating missing sections the same way
    /// [`ExtractedData::from_value`] does.
    pub fn from_value(value: &Value) -> Result<Self> {
        let file_id = value.get("file_id").and_then(Value::as_i64);
        let filename = value
            .get("filename")
            .and_then(Value::as_str)
            .map(str::to_string);
        let record = match ExtractedData::from_value(value)? {
            ExtractedData::Record(r) => r,
            ExtractedData::Missing => ExtractedRecord::default(),
        };
        Ok(Self {
            file_id,
            filename,
            record,
        })
    }

    pub fn subject_name(&self) -> &str {
        &self.record.subject.name
    }
}
