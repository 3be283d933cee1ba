use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use mentorship_ledger::program::{
    program_router, DocumentStore, FileStorage, IdentityProvider, MentorshipProgram,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_program_routes<S, F, I>(
    service: Arc<MentorshipProgram<S, F, I>>,
) -> axum::Router
where
    S: DocumentStore + 'static,
    F: FileStorage + 'static,
    I: IdentityProvider + 'static,
{
    program_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{
        seed_demo_roster, InMemoryFileStorage, InMemoryIdentityProvider, DEMO_MENTEE,
    };
    use axum::body::Body;
    use axum::http::Request;
    use mentorship_ledger::config::ProgramConfig;
    use mentorship_ledger::program::{MemoryDocumentStore, ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let store = Arc::new(MemoryDocumentStore::new());
        let identity = Arc::new(InMemoryIdentityProvider::default());
        seed_demo_roster(&store, &identity).expect("seed roster");
        let service = Arc::new(MentorshipProgram::new(
            store,
            Arc::new(InMemoryFileStorage::default()),
            identity,
            ProgramConfig::default(),
        ));
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_program_routes(service).layer(Extension(state))
    }

    #[tokio::test]
    async fn readiness_reflects_startup_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = app(true)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn program_routes_are_mounted_next_to_probes() {
        let router = app(true);

        let response = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(
                Request::get("/api/v1/standings")
                    .header(ACTOR_ID_HEADER, DEMO_MENTEE)
                    .header(ACTOR_ROLE_HEADER, "mentee")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("read body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json payload");
        assert_eq!(payload["pairings"].as_array().map(Vec::len), Some(2));
    }
}
