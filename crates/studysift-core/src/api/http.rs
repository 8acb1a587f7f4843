use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use super::{CalendarApi, ExtractionApi};
use crate::config::BackendConfig;
use crate::error::{remote_detail_by, Result, SiftError, DETAIL_KEYS, EXPORT_DETAIL_KEYS};
use crate::model::*;
use crate::session::SessionService;
use crate::upload::UploadDocument;

/// REST client for the StudySift backend.
///
/// Protected calls read the bearer token from the shared session on every
/// request, so a login or logout elsewhere takes effect immediately.
pub struct HttpBackend {
    base_url: Url,
    http: reqwest::Client,
    session: Arc<SessionService>,
}

#[derive(Deserialize)]
struct CalendarDataResponse {
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    message: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, session: Arc<SessionService>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            SiftError::Config(format!("invalid backend URL '{}': {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SiftError::Config(format!(
                "backend URL '{}' cannot be used as a base",
                config.base_url
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| SiftError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url,
            http,
            session,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionService> {
        &self.session
    }

    /// `<base>/<segments...>/`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SiftError::Config(format!("bad backend URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments)
            .push("");
        Ok(url)
    }

    fn public(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url)
    }

    fn protected(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self
            .session
            .access_token()
            .ok_or_else(|| SiftError::Unauthorized("no access token, log in first".into()))?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    /// Send and return the body text of a 2xx response.
    ///
    /// On protected calls a 401 becomes [`SiftError::Unauthorized`]; everything
    /// else non-2xx becomes [`SiftError::Remote`].
    async fn send(&self, req: RequestBuilder, endpoint: &str, protected: bool) -> Result<String> {
        self.send_with(req, endpoint, protected, &DETAIL_KEYS).await
    }

    /// [`Self::send`] for endpoints whose error body puts the reason under
    /// other keys first.
    async fn send_with(
        &self,
        req: RequestBuilder,
        endpoint: &str,
        protected: bool,
        detail_keys: &[&str],
    ) -> Result<String> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if status.is_success() {
            tracing::debug!(endpoint, status = status.as_u16(), "backend call ok");
            return Ok(body);
        }

        let detail = remote_detail_by(status.as_u16(), &body, detail_keys);
        tracing::debug!(endpoint, status = status.as_u16(), %detail, "backend call failed");
        if protected && status == StatusCode::UNAUTHORIZED {
            return Err(SiftError::Unauthorized(detail));
        }
        Err(SiftError::Remote {
            status: status.as_u16(),
            detail,
        })
    }

    fn decode<R: DeserializeOwned>(endpoint: &str, body: &str) -> Result<R> {
        let source = if body.trim().is_empty() { "{}" } else { body };
        serde_json::from_str(source).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            tracing::warn!(endpoint, %preview, "could not decode response: {e}");
            SiftError::Serialization(e)
        })
    }

    // -- Auth --

    /// Exchange credentials for an access/refresh pair. Does not touch the session.
    pub async fn obtain_token(&self, username: &str, password: &str) -> Result<TokenPair> {
        let url = self.url(&["api", "token"])?;
        let creds = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let body = self
            .send(self.public(Method::POST, url).json(&creds), "token", false)
            .await?;
        Self::decode("token", &body)
    }

    /// Credential login: exchange, then store the tokens in the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let pair = self.obtain_token(username, password).await?;
        self.session
            .login_with_tokens(&pair.access, pair.refresh.as_deref())
    }

    /// Create an account. `confirm` must repeat the password.
    pub async fn register(&self, registration: &Registration, confirm: &str) -> Result<Value> {
        registration.validate(confirm)?;
        let url = self.url(&["api", "register"])?;
        let body = self
            .send(
                self.public(Method::POST, url).json(registration),
                "register",
                false,
            )
            .await?;
        Self::decode("register", &body)
    }

    // -- Files --

    /// Upload a validated document. Returns the server's confirmation message.
    pub async fn upload(&self, document: &UploadDocument) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(document.bytes.clone())
            .file_name(document.file_name.clone())
            .mime_str(document.kind.mime())?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = self.url(&["api", "upload"])?;
        let body = self
            .send(
                self.protected(Method::POST, url)?.multipart(form),
                "upload",
                true,
            )
            .await?;
        let reply: MessageResponse = Self::decode("upload", &body)?;
        Ok(reply
            .message
            .unwrap_or_else(|| format!("{} uploaded", document.file_name)))
    }

    /// One page of the user's files, 1-based.
    pub async fn list_files(&self, page: u32) -> Result<Page<UploadedFile>> {
        let mut url = self.url(&["api", "upload", "list"])?;
        url.query_pairs_mut()
            .append_pair("page", &page.max(1).to_string());
        let body = self
            .send(self.protected(Method::GET, url)?, "list", true)
            .await?;
        Self::decode("list", &body)
    }

    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        let id = file_id.to_string();
        let url = self.url(&["api", "upload", "delete", &id])?;
        self.send(self.protected(Method::DELETE, url)?, "delete", true)
            .await
            .map_err(|e| match e {
                SiftError::Remote { status: 404, .. } => {
                    SiftError::NotFound(format!("file {file_id}"))
                }
                other => other,
            })?;
        Ok(())
    }

    /// Ask the backend to pull the text out of a stored document.
    pub async fn extract_text(&self, file_id: i64) -> Result<UploadedFile> {
        let id = file_id.to_string();
        let url = self.url(&["api", "upload", &id, "extract"])?;
        let body = self
            .send(self.protected(Method::POST, url)?, "extract", true)
            .await?;
        let reply: ExtractTextResponse = Self::decode("extract", &body)?;
        Ok(reply.file)
    }

    pub async fn get_text(&self, file_id: i64) -> Result<DocumentText> {
        let id = file_id.to_string();
        let url = self.url(&["api", "upload", &id, "text"])?;
        let body = self
            .send(self.protected(Method::GET, url)?, "text", true)
            .await?;
        Self::decode("text", &body)
    }

    /// Replace a file's structured data wholesale.
    pub async fn update_extracted(&self, file_id: i64, record: &ExtractedRecord) -> Result<Value> {
        let id = file_id.to_string();
        let url = self.url(&["api", "upload", &id, "update-extracted"])?;
        let body = self
            .send(
                self.protected(Method::PUT, url)?
                    .json(&json!({ "extracted_data": record })),
                "update-extracted",
                true,
            )
            .await?;
        Self::decode("update-extracted", &body)
    }

    // -- Subjects --

    /// Save a subject's full record under its current name.
    pub async fn update_subject(&self, name: &str, record: &ExtractedRecord) -> Result<Value> {
        let url = self.url(&["api", "ai", "asignaturas", name])?;
        let body = self
            .send(
                self.protected(Method::PUT, url)?.json(record),
                "asignaturas",
                true,
            )
            .await?;
        Self::decode("asignaturas", &body)
    }

    pub async fn delete_subject(&self, name: &str) -> Result<()> {
        let url = self.url(&["api", "ai", "asignaturas", name, "delete"])?;
        self.send(
            self.protected(Method::DELETE, url)?,
            "asignaturas-delete",
            true,
        )
        .await
        .map_err(|e| match e {
            SiftError::Remote { status: 404, .. } => SiftError::NotFound(format!("subject '{name}'")),
            other => other,
        })?;
        Ok(())
    }
}

impl ExtractionApi for HttpBackend {
    async fn extract_dates(&self, file_id: i64, models: &ModelSelection) -> Result<Value> {
        let id = file_id.to_string();
        let url = self.url(&["api", "ai", &id, "dates"])?;
        let body = self
            .send(self.protected(Method::POST, url)?.json(models), "dates", true)
            .await?;
        Self::decode("dates", &body)
    }

    async fn process_extracted(&self, file_id: i64) -> Result<Value> {
        let id = file_id.to_string();
        let url = self.url(&["api", "ai", &id, "process-extracted-data"])?;
        let body = self
            .send(
                self.protected(Method::POST, url)?,
                "process-extracted-data",
                true,
            )
            .await?;
        Self::decode("process-extracted-data", &body)
    }
}

impl CalendarApi for HttpBackend {
    async fn calendar_data(&self) -> Result<Vec<CalendarEntry>> {
        let url = self.url(&["api", "ai", "calendar", "data"])?;
        let body = self
            .send(self.protected(Method::GET, url)?, "calendar-data", true)
            .await?;
        let reply: CalendarDataResponse = Self::decode("calendar-data", &body)?;
        let Some(items) = reply.data else {
            tracing::warn!("calendar data response has no 'data' array");
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            match CalendarEntry::from_value(item) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("skipping malformed calendar entry: {e}"),
            }
        }
        Ok(entries)
    }

    async fn export_remote_event(&self, request: &RemoteEventRequest) -> Result<ExportResponse> {
        let url = self.url(&["api", "ai", "export-google-calendar"])?;
        let body = self
            .send_with(
                self.protected(Method::POST, url)?.json(request),
                "export-google-calendar",
                true,
                &EXPORT_DETAIL_KEYS,
            )
            .await?;
        Self::decode("export-google-calendar", &body)
    }
}
