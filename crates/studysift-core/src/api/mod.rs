mod http;

pub use http::HttpBackend;

use std::future::Future;

use serde_json::Value;

use crate::error::Result;
use crate::model::{CalendarEntry, ExportResponse, ModelSelection, RemoteEventRequest};

/// The two extraction calls the document pipeline drives.
pub trait ExtractionApi: Send + Sync {
    /// `POST /api/ai/<id>/dates/`. Returns the structured payload untouched.
    fn extract_dates(
        &self,
        file_id: i64,
        models: &ModelSelection,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// `POST /api/ai/<id>/process-extracted-data/`, no body.
    fn process_extracted(&self, file_id: i64) -> impl Future<Output = Result<Value>> + Send;
}

/// Calendar listing and the remote calendar export endpoint.
pub trait CalendarApi: Send + Sync {
    fn calendar_data(&self) -> impl Future<Output = Result<Vec<CalendarEntry>>> + Send;

    fn export_remote_event(
        &self,
        request: &RemoteEventRequest,
    ) -> impl Future<Output = Result<ExportResponse>> + Send;
}
