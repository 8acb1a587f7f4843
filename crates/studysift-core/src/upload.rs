use std::path::Path;

use crate::error::{Result, SiftError};

/// Document types the backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Pptx,
}

impl DocumentKind {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Pptx => write!(f, "pptx"),
        }
    }
}

/// A document that passed client-side checks and is ready to send.
#[derive(Debug, Clone)]
pub struct UploadDocument {
    pub file_name: String,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl UploadDocument {
    /// Validate name and content before any network call.
    pub fn new(file_name: &str, bytes: Vec<u8>, max_size_mb: u64) -> Result<Self> {
        let kind = DocumentKind::from_file_name(file_name).ok_or_else(|| {
            SiftError::InvalidInput(format!(
                "'{file_name}' is not a supported document, only PDF and PPTX files are accepted"
            ))
        })?;
        if bytes.is_empty() {
            return Err(SiftError::InvalidInput(format!("'{file_name}' is empty")));
        }
        let limit = max_size_mb.saturating_mul(1024 * 1024);
        if bytes.len() as u64 > limit {
            return Err(SiftError::InvalidInput(format!(
                "'{file_name}' is {:.1} MB, the limit is {max_size_mb} MB",
                bytes.len() as f64 / (1024.0 * 1024.0)
            )));
        }
        Ok(Self {
            file_name: file_name.to_string(),
            kind,
            bytes,
        })
    }

    /// Read and validate a local file. The size is checked before reading.
    pub fn from_path(path: &Path, max_size_mb: u64) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                SiftError::InvalidInput(format!("'{}' has no usable file name", path.display()))
            })?
            .to_string();
        if DocumentKind::from_file_name(&file_name).is_none() {
            return Err(SiftError::InvalidInput(format!(
                "'{file_name}' is not a supported document, only PDF and PPTX files are accepted"
            )));
        }
        let size = std::fs::metadata(path)?.len();
        if size > max_size_mb.saturating_mul(1024 * 1024) {
            return Err(SiftError::InvalidInput(format!(
                "'{file_name}' is {:.1} MB, the limit is {max_size_mb} MB",
                size as f64 / (1024.0 * 1024.0)
            )));
        }
        let bytes = std::fs::read(path)?;
        Self::new(&file_name, bytes, max_size_mb)
    }
}
