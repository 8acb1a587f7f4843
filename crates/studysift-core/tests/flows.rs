//! End-to-end flows over HTTP: extraction pipeline, calendar listing to
//! iCalendar file, and remote calendar export.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{calendar_item, logged_in_backend};
use serde_json::json;
use studysift_core::api::CalendarApi;
use studysift_core::export::{export_events, StatusPanel};
use studysift_core::ical::{export_ics, IcsOptions};
use studysift_core::model::{build_events, ModelMode, ModelSelection};
use studysift_core::pipeline::{ExtractionPipeline, PipelineOutcome, PipelineState, Route};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn models() -> ModelSelection {
    ModelSelection::new(ModelMode::Api, "gemini-1.5-flash", "gemini-1.5-pro")
}

#[tokio::test]
async fn test_pipeline_over_http_success() {
    let server = MockServer::start().await;
    let payload = json!({"asignatura": {"nombre": "CBD"}, "fechas": [{"titulo": "Final", "fecha": "2025-06-20"}]});
    Mock::given(method("POST"))
        .and(path("/api/ai/8/dates/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/8/process-extracted-data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "done"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = Arc::new(logged_in_backend(&server));
    let session = backend.session().clone();
    let pipeline = ExtractionPipeline::new(backend, session, Duration::from_millis(1));

    let outcome = pipeline
        .run(8, Some(&models()), &CancellationToken::new())
        .await;
    match outcome {
        PipelineOutcome::Navigate { route, payload: got } => {
            assert_eq!(route, Route::Dates(8));
            assert_eq!(route.to_string(), "/dates/8");
            assert_eq!(got, payload);
        }
        other => panic!("expected navigation, got {other:?}"),
    }
    assert_eq!(pipeline.progress().state, PipelineState::Complete);
}

#[tokio::test]
async fn test_pipeline_over_http_first_call_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/ai/8/dates/"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"detail": "model unavailable"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/8/process-extracted-data/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let backend = Arc::new(logged_in_backend(&server));
    let session = backend.session().clone();
    let pipeline = ExtractionPipeline::new(backend, session, Duration::from_millis(1));

    let outcome = pipeline
        .run(8, Some(&models()), &CancellationToken::new())
        .await;
    let PipelineOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.message, "model unavailable");
    assert_eq!(failure.status, Some(500));
    assert_eq!(pipeline.progress().state, PipelineState::Failed);
}

#[tokio::test]
async fn test_calendar_listing_to_ics_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ai/calendar/data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                calendar_item(1, "CBD", &[("Parcial", "2025-01-31"), ("Sin fecha", "")]),
                calendar_item(2, "Redes", &[("Lab", "2024-02-28"), ("Quiz", "pronto")]),
            ]
        })))
        .mount(&server)
        .await;

    let backend = logged_in_backend(&server);
    let entries = backend.calendar_data().await.unwrap();
    let events = build_events(&entries);
    // "Sin fecha" is dropped, "Quiz" stays with an unusable date
    assert_eq!(events.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("calendario_eventos.ics");
    let opts = IcsOptions::new("-//StudySift//Exported Events//EN", "studysift.com");
    let doc = export_ics(&events, &opts, &out).unwrap();

    assert_eq!(doc.exported, 2);
    assert_eq!(doc.skipped.len(), 1);
    let content = std::fs::read_to_string(&out).unwrap();
    assert!(content.starts_with("BEGIN:VCALENDAR"));
    assert!(content.ends_with("END:VCALENDAR"));
    assert_eq!(content.matches("BEGIN:VEVENT").count(), 2);
    assert!(content.contains("DTEND;VALUE=DATE:20250201"));
    assert!(content.contains("DTEND;VALUE=DATE:20240229"));
}

#[tokio::test]
async fn test_remote_export_partial_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/ai/calendar/data/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [calendar_item(1, "CBD", &[
                ("Parcial", "2025-03-14"),
                ("Entrega", "2025-04-01"),
                ("Final", "2025-06-20"),
            ])]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/export-google-calendar/"))
        .and(wiremock::matchers::body_partial_json(json!({"summary": "Entrega"})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid event"})))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/export-google-calendar/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Evento creado"})))
        .expect(2)
        .mount(&server)
        .await;

    let backend = logged_in_backend(&server);
    let events = build_events(&backend.calendar_data().await.unwrap());
    let panel = StatusPanel::new();

    let report = export_events(&backend, &events, true, &panel, &CancellationToken::new())
        .await
        .unwrap();
    let lines = report.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("Parcial"));
    assert!(lines[1].contains("Entrega"));
    assert!(lines[2].contains("Final"));
    assert_eq!(report.failed(), 1);
    assert!(lines[1].ends_with("invalid event"));
    assert!(panel.text().contains("Succeeded: 2, failed: 1"));
}
