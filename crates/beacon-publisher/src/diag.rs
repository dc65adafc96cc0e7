//! Loopback diagnostics endpoint.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness, always `ok` |
//! | GET | `/registrations` | Container ID to application path, as JSON |

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::registry::Registrations;

#[derive(Serialize)]
struct RegistrationsResponse {
    count: usize,
    registrations: BTreeMap<String, String>,
}

/// Build the diagnostics router over a shared registration table.
pub fn router(registrations: Registrations) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/registrations", get(list_registrations))
        .with_state(registrations)
}

async fn healthz() -> &'static str {
    "ok"
}

/// GET /registrations
async fn list_registrations(State(registrations): State<Registrations>) -> impl IntoResponse {
    let registrations = registrations.snapshot().await;
    Json(RegistrationsResponse {
        count: registrations.len(),
        registrations,
    })
}
