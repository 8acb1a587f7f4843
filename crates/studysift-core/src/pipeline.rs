//! Drives one uploaded document through structured extraction and
//! post-processing.
//!
//! `Idle -> RequestingExtraction -> ProcessingExtractedData -> Complete | Failed`
//!
//! Progress is published on a watch channel at fixed checkpoints. Every
//! network call races the caller's [`CancellationToken`]; once it fires the
//! in-flight request is dropped and nothing else is published.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::api::ExtractionApi;
use crate::error::SiftError;
use crate::model::{ModelMode, ModelSelection};
use crate::session::SessionService;

pub const PROGRESS_START: u8 = 10;
pub const PROGRESS_EXTRACTED: u8 = 50;
pub const PROGRESS_DONE: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    RequestingExtraction,
    ProcessingExtractedData,
    Complete,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RequestingExtraction => write!(f, "requesting extraction"),
            Self::ProcessingExtractedData => write!(f, "processing extracted data"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineProgress {
    pub state: PipelineState,
    /// Simulated percentage, set at fixed checkpoints.
    pub percent: u8,
    pub status: String,
}

impl PipelineProgress {
    fn idle() -> Self {
        Self {
            state: PipelineState::Idle,
            percent: 0,
            status: String::new(),
        }
    }
}

/// Where the front-end should go next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    FileList,
    Dates(i64),
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login => write!(f, "/login"),
            Self::FileList => write!(f, "/files"),
            Self::Dates(id) => write!(f, "/dates/{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Configuration,
    Extraction,
    Processing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub stage: FailureStage,
    pub status: Option<u16>,
    /// Server detail or local error text, shown as-is.
    pub message: String,
}

impl PipelineFailure {
    /// The only way out of a failure. There is no retry.
    pub fn cancel_route(&self) -> Route {
        Route::FileList
    }
}

impl std::fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let action = match self.stage {
            FailureStage::Configuration => return write!(f, "Configuration error: {}", self.message),
            FailureStage::Extraction => "extracting",
            FailureStage::Processing => "processing",
        };
        match self.status {
            Some(status) => write!(f, "Error {status} while {action}: {}", self.message),
            None => write!(f, "Error while {action}: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No session, or the backend rejected the token.
    RedirectToLogin,
    /// Both calls succeeded. `payload` is the extraction call's response.
    Navigate { route: Route, payload: Value },
    Failed(PipelineFailure),
    Cancelled,
    /// Another run is in flight; nothing was sent.
    AlreadyRunning,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ExtractionPipeline<A> {
    api: Arc<A>,
    session: Arc<SessionService>,
    completion_delay: Duration,
    running: AtomicBool,
    progress: watch::Sender<PipelineProgress>,
}

impl<A: ExtractionApi> ExtractionPipeline<A> {
    pub fn new(api: Arc<A>, session: Arc<SessionService>, completion_delay: Duration) -> Self {
        let (progress, _) = watch::channel(PipelineProgress::idle());
        Self {
            api,
            session,
            completion_delay,
            running: AtomicBool::new(false),
            progress,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> PipelineProgress {
        self.progress.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn publish(&self, state: PipelineState, percent: u8, status: impl Into<String>) {
        self.progress.send_replace(PipelineProgress {
            state,
            percent,
            status: status.into(),
        });
    }

    fn fail(&self, failure: PipelineFailure) -> PipelineOutcome {
        tracing::warn!(stage = ?failure.stage, status = ?failure.status, "pipeline failed: {}", failure.message);
        self.publish(PipelineState::Failed, 0, failure.to_string());
        PipelineOutcome::Failed(failure)
    }

    fn fail_remote(&self, stage: FailureStage, err: SiftError) -> PipelineOutcome {
        if err.is_auth() {
            tracing::info!("backend rejected the session, redirecting to login");
            self.publish(PipelineState::Idle, 0, "");
            return PipelineOutcome::RedirectToLogin;
        }
        self.fail(PipelineFailure {
            stage,
            status: err.status(),
            message: err.user_message(),
        })
    }

    /// Run extraction and post-processing for `file_id`.
    ///
    /// `models` is the selection carried over from the file list; `None` or an
    /// incomplete selection fails before any call is made.
    pub async fn run(
        &self,
        file_id: i64,
        models: Option<&ModelSelection>,
        cancel: &CancellationToken,
    ) -> PipelineOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(file_id, "pipeline already running, ignoring");
            return PipelineOutcome::AlreadyRunning;
        }
        let _guard = RunGuard(&self.running);

        if !self.session.is_authenticated() {
            return PipelineOutcome::RedirectToLogin;
        }

        let models = match models {
            Some(m) if !m.summary_model.trim().is_empty() && !m.json_model.trim().is_empty() => m,
            _ => {
                return self.fail(PipelineFailure {
                    stage: FailureStage::Configuration,
                    status: None,
                    message: "model mode, summary model and JSON model must all be set".into(),
                })
            }
        };

        if cancel.is_cancelled() {
            return PipelineOutcome::Cancelled;
        }

        let status = match models.mode {
            ModelMode::Api => "Connecting to the Gemini API",
            ModelMode::Local => "Extracting key information",
        };
        self.publish(PipelineState::RequestingExtraction, PROGRESS_START, status);
        tracing::info!(file_id, mode = %models.mode, "requesting structured extraction");

        let extracted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            r = self.api.extract_dates(file_id, models) => r,
        };
        let payload = match extracted {
            Ok(p) => p,
            Err(e) => return self.fail_remote(FailureStage::Extraction, e),
        };

        self.publish(
            PipelineState::ProcessingExtractedData,
            PROGRESS_EXTRACTED,
            "Processing extracted data",
        );

        let processed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            r = self.api.process_extracted(file_id) => r,
        };
        if let Err(e) = processed {
            return self.fail_remote(FailureStage::Processing, e);
        }

        self.publish(PipelineState::Complete, PROGRESS_DONE, "Done");
        tracing::info!(file_id, "extraction pipeline complete");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return PipelineOutcome::Cancelled,
            _ = tokio::time::sleep(self.completion_delay) => {}
        }

        PipelineOutcome::Navigate {
            route: Route::Dates(file_id),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Reply {
        Ok(Value),
        Remote(u16, &'static str),
        Unauthorized,
        Hang,
    }

    impl Reply {
        async fn resolve(self) -> Result<Value> {
            match self {
                Reply::Ok(v) => Ok(v),
                Reply::Remote(status, detail) => Err(SiftError::Remote {
                    status,
                    detail: detail.into(),
                }),
                Reply::Unauthorized => Err(SiftError::Unauthorized("token expired".into())),
                Reply::Hang => std::future::pending().await,
            }
        }
    }

    struct MockApi {
        dates: Reply,
        process: Reply,
        dates_calls: AtomicUsize,
        process_calls: AtomicUsize,
        last_models: Mutex<Option<ModelSelection>>,
    }

    impl MockApi {
        fn new(dates: Reply, process: Reply) -> Self {
            Self {
                dates,
                process,
                dates_calls: AtomicUsize::new(0),
                process_calls: AtomicUsize::new(0),
                last_models: Mutex::new(None),
            }
        }
    }

    impl ExtractionApi for MockApi {
        async fn extract_dates(&self, _file_id: i64, models: &ModelSelection) -> Result<Value> {
            self.dates_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_models.lock().unwrap() = Some(models.clone());
            self.dates.clone().resolve().await
        }

        async fn process_extracted(&self, _file_id: i64) -> Result<Value> {
            self.process_calls.fetch_add(1, Ordering::SeqCst);
            self.process.clone().resolve().await
        }
    }

    fn logged_in() -> Arc<SessionService> {
        let session = SessionService::in_memory();
        session.login("tok").unwrap();
        Arc::new(session)
    }

    fn models() -> ModelSelection {
        ModelSelection::new(ModelMode::Api, "gemini-1.5-flash", "gemini-1.5-pro")
    }

    fn pipeline(api: Arc<MockApi>, session: Arc<SessionService>) -> ExtractionPipeline<MockApi> {
        ExtractionPipeline::new(api, session, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_success_navigates_with_first_payload() {
        let first = json!({"fechas": [{"titulo": "Parcial", "fecha": "2025-03-14"}]});
        let api = Arc::new(MockApi::new(
            Reply::Ok(first.clone()),
            Reply::Ok(json!({"status": "processed"})),
        ));
        let p = pipeline(api.clone(), logged_in());
        let rx = p.subscribe();

        let outcome = p.run(42, Some(&models()), &CancellationToken::new()).await;
        assert_eq!(
            outcome,
            PipelineOutcome::Navigate {
                route: Route::Dates(42),
                payload: first,
            }
        );
        assert_eq!(api.dates_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.process_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*api.last_models.lock().unwrap(), Some(models()));

        let last = rx.borrow().clone();
        assert_eq!(last.state, PipelineState::Complete);
        assert_eq!(last.percent, 100);
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn test_first_call_failure_stops_pipeline() {
        let api = Arc::new(MockApi::new(
            Reply::Remote(500, "model unavailable"),
            Reply::Ok(json!({})),
        ));
        let p = pipeline(api.clone(), logged_in());

        let outcome = p.run(7, Some(&models()), &CancellationToken::new()).await;
        let PipelineOutcome::Failed(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.stage, FailureStage::Extraction);
        assert_eq!(failure.status, Some(500));
        assert_eq!(failure.message, "model unavailable");
        assert_eq!(failure.to_string(), "Error 500 while extracting: model unavailable");
        assert_eq!(failure.cancel_route(), Route::FileList);
        assert_eq!(api.process_calls.load(Ordering::SeqCst), 0);

        let progress = p.progress();
        assert_eq!(progress.state, PipelineState::Failed);
        assert_eq!(progress.percent, 0);
    }

    #[tokio::test]
    async fn test_second_call_failure() {
        let api = Arc::new(MockApi::new(
            Reply::Ok(json!({})),
            Reply::Remote(400, "nothing to process"),
        ));
        let p = pipeline(api.clone(), logged_in());
        let outcome = p.run(7, Some(&models()), &CancellationToken::new()).await;
        let PipelineOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, FailureStage::Processing);
        assert_eq!(failure.message, "nothing to process");
    }

    #[tokio::test]
    async fn test_no_session_redirects_without_calls() {
        let api = Arc::new(MockApi::new(Reply::Ok(json!({})), Reply::Ok(json!({}))));
        let p = pipeline(api.clone(), Arc::new(SessionService::in_memory()));
        let outcome = p.run(1, Some(&models()), &CancellationToken::new()).await;
        assert_eq!(outcome, PipelineOutcome::RedirectToLogin);
        assert_eq!(api.dates_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_redirects() {
        let api = Arc::new(MockApi::new(Reply::Unauthorized, Reply::Ok(json!({}))));
        let p = pipeline(api.clone(), logged_in());
        let outcome = p.run(1, Some(&models()), &CancellationToken::new()).await;
        assert_eq!(outcome, PipelineOutcome::RedirectToLogin);
        assert_eq!(api.process_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_models_fail_before_calls() {
        let api = Arc::new(MockApi::new(Reply::Ok(json!({})), Reply::Ok(json!({}))));
        let p = pipeline(api.clone(), logged_in());

        let outcome = p.run(1, None, &CancellationToken::new()).await;
        let PipelineOutcome::Failed(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.stage, FailureStage::Configuration);

        let blank = ModelSelection::new(ModelMode::Local, "", "qwen");
        let outcome = p.run(1, Some(&blank), &CancellationToken::new()).await;
        assert!(matches!(outcome, PipelineOutcome::Failed(_)));
        assert_eq!(api.dates_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_run_while_in_flight_is_ignored() {
        let api = Arc::new(MockApi::new(Reply::Hang, Reply::Ok(json!({}))));
        let p = Arc::new(pipeline(api.clone(), logged_in()));
        let cancel = CancellationToken::new();

        let first = {
            let p = p.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { p.run(3, Some(&models()), &cancel).await })
        };

        let mut rx = p.subscribe();
        rx.wait_for(|s| s.state == PipelineState::RequestingExtraction)
            .await
            .unwrap();
        assert!(p.is_running());

        let second = p.run(3, Some(&models()), &CancellationToken::new()).await;
        assert_eq!(second, PipelineOutcome::AlreadyRunning);
        assert_eq!(api.dates_calls.load(Ordering::SeqCst), 1);

        cancel.cancel();
        assert_eq!(first.await.unwrap(), PipelineOutcome::Cancelled);
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn test_cancel_drops_in_flight_request() {
        let api = Arc::new(MockApi::new(Reply::Hang, Reply::Ok(json!({}))));
        let p = Arc::new(pipeline(api.clone(), logged_in()));
        let cancel = CancellationToken::new();

        let task = {
            let p = p.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { p.run(5, Some(&models()), &cancel).await })
        };
        let mut rx = p.subscribe();
        rx.wait_for(|s| s.percent == PROGRESS_START).await.unwrap();

        cancel.cancel();
        assert_eq!(task.await.unwrap(), PipelineOutcome::Cancelled);
        assert_eq!(api.process_calls.load(Ordering::SeqCst), 0);
        // nothing published after cancellation
        assert_eq!(p.progress().state, PipelineState::RequestingExtraction);
    }

    #[tokio::test]
    async fn test_cancel_during_completion_delay_skips_navigation() {
        let api = Arc::new(MockApi::new(Reply::Ok(json!({})), Reply::Ok(json!({}))));
        let p = Arc::new(ExtractionPipeline::new(
            api,
            logged_in(),
            Duration::from_secs(30),
        ));
        let cancel = CancellationToken::new();
        let task = {
            let p = p.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { p.run(5, Some(&models()), &cancel).await })
        };
        let mut rx = p.subscribe();
        rx.wait_for(|s| s.state == PipelineState::Complete)
            .await
            .unwrap();
        cancel.cancel();
        assert_eq!(task.await.unwrap(), PipelineOutcome::Cancelled);
    }

    #[test]
    fn test_route_display() {
        assert_eq!(Route::Dates(12).to_string(), "/dates/12");
        assert_eq!(Route::Login.to_string(), "/login");
        assert_eq!(Route::FileList.to_string(), "/files");
    }
}
