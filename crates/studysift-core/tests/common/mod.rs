#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use studysift_core::api::HttpBackend;
use studysift_core::config::BackendConfig;
use studysift_core::session::SessionService;
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

pub fn logged_in_session() -> Arc<SessionService> {
    let session = SessionService::in_memory();
    session.login(TOKEN).unwrap();
    Arc::new(session)
}

pub fn backend_for(server: &MockServer, session: Arc<SessionService>) -> HttpBackend {
    let config = BackendConfig {
        base_url: server.uri(),
        timeout_secs: 5,
        connect_timeout_secs: 1,
    };
    HttpBackend::new(&config, session).unwrap()
}

pub fn logged_in_backend(server: &MockServer) -> HttpBackend {
    backend_for(server, logged_in_session())
}

pub fn calendar_item(file_id: i64, subject: &str, dates: &[(&str, &str)]) -> Value {
    let fechas: Vec<Value> = dates
        .iter()
        .map(|(t, d)| json!({"titulo": t, "fecha": d}))
        .collect();
    json!({
        "file_id": file_id,
        "filename": format!("{subject}.pdf"),
        "asignatura": {"nombre": subject, "grado": "GII"},
        "horarios": [],
        "fechas": fechas,
        "profesores": []
    })
}
