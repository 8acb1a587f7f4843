mod event;
mod file;
mod record;


pub use event::*;
pub use file::*;
pub use record::*;

use serde::{Deserialize, Serialize};

/// Django REST Framework page envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Total pages for a given page size. Zero items still make one page.
    pub fn total_pages(&self, page_size: u64) -> u64 {
        if page_size == 0 {
            return 1;
        }
        self.count.div_ceil(page_size).max(1)
    }
}

/// Where the extraction models run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    Local,
    Api,
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for ModelMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "api" => Ok(Self::Api),
            other => Err(format!("unknown model mode: {other}")),
        }
    }
}

/// Body of the structured extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    #[serde(rename = "model_mode")]
    pub mode: ModelMode,
    pub summary_model: String,
    pub json_model: String,
}

impl ModelSelection {
    pub fn new(mode: ModelMode, summary_model: &str, json_model: &str) -> Self {
        Self {
            mode,
            summary_model: summary_model.to_string(),
            json_model: json_model.to_string(),
        }
    }
}
