use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ExtractedData;
use crate::error::{Result, SiftError};

/// A course document stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: i64,
    /// Storage URL of the original document.
    #[serde(rename = "file")]
    pub storage_ref: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub text_file_url: Option<String>,
    #[serde(default)]
    pub extracted_data: Option<Value>,
}

impl UploadedFile {
    pub fn text_available(&self) -> bool {
        self.text_file_url
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty())
    }

    pub fn extracted(&self) -> Result<ExtractedData> {
        match &self.extracted_data {
            Some(v) => ExtractedData::from_value(v),
            None => Ok(ExtractedData::Missing),
        }
    }

    /// File name shown to the user, taken from the last segment of the
    /// storage URL with any query string dropped.
    pub fn display_name(&self) -> String {
        let last = self
            .storage_ref
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default();
        if last.is_empty() {
            return "unnamed file".to_string();
        }
        match urlencoding::decode(last) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => last.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractTextResponse {
    pub file: UploadedFile,
}

/// Extracted text of a document with any structured data already attached.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentText {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub extracted_data: Option<Value>,
}

impl DocumentText {
    pub fn extracted(&self) -> Result<ExtractedData> {
        match &self.extracted_data {
            Some(v) => ExtractedData::from_value(v),
            None => Ok(ExtractedData::Missing),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    /// Check the form before it is sent. `confirm` must match `password`.
    pub fn validate(&self, confirm: &str) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(SiftError::InvalidInput(
                "username cannot be empty".into(),
            ));
        }
        if !self.email.contains('@') {
            return Err(SiftError::InvalidInput(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        if self.password.is_empty() {
            return Err(SiftError::InvalidInput(
                "password cannot be empty".into(),
            ));
        }
        if self.password != confirm {
            return Err(SiftError::InvalidInput(
                "passwords do not match".into(),
            ));
        }
        Ok(())
    }
}

/// Reply from the remote calendar endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportResponse {
    #[serde(default)]
    pub message: Option<String>,
}
