//! Admission Surface (AS) — the only axum `Router` the process serves.
//!
//! `GET /health` is registered ahead of the wildcard fallback so it can never
//! be shadowed by it. Every other method/path is the gate: touch
//! the Activity Clock, drive activation, then forward or reject with 503.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::Serialize;
use tracing::{error, warn};

use crate::activation::ActivationController;
use crate::activity_clock::ActivityClock;
use crate::config::ProxyConfig;
use crate::forward::{axum_headers_from, upstream_url, Forwarder};
use crate::orchestrator::OrchestratorOps;

pub struct AppState<O: OrchestratorOps> {
    pub config: Arc<ProxyConfig>,
    pub activity_clock: Arc<ActivityClock>,
    pub activation: Arc<ActivationController<O>>,
    pub forwarder: Arc<Forwarder>,
    /// Flips to `true` once the orchestrator client has finished
    /// initializing. `main` sets this before the listener ever binds, but
    /// the wildcard handler still checks it on every request and `/health`
    /// still reports it, rather than assuming it.
    pub k8s_ready: Arc<AtomicBool>,
}

pub fn router<O: OrchestratorOps + 'static>(state: Arc<AppState<O>>) -> Router {
    Router::new()
        .route("/health", get(health::<O>))
        .fallback(any(admit::<O>))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    k8s_ready: bool,
    forward_to: &'a str,
    namespace: &'a str,
    target_services: &'a [String],
}

async fn health<O: OrchestratorOps>(State(state): State<Arc<AppState<O>>>) -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "ok",
        k8s_ready: state.k8s_ready.load(Ordering::Acquire),
        forward_to: &state.config.primary_service,
        namespace: &state.config.namespace,
        target_services: &state.config.group_services,
    })
}

async fn admit<O: OrchestratorOps + 'static>(
    State(state): State<Arc<AppState<O>>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.k8s_ready.load(Ordering::Acquire) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Kubernetes client not ready").into_response();
    }

    state.activity_clock.touch(&state.config.namespace);

    let ready = state
        .activation
        .activate(&state.config.namespace, &state.config.group_services, &state.config.primary_service)
        .await;

    if !ready {
        warn!(
            primary = %state.config.primary_service,
            max_scaleup_wait = state.config.max_scaleup_wait,
            "primary not ready within wait budget"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            format!(
                "{} is still starting up, waited up to {} seconds",
                state.config.primary_service, state.config.max_scaleup_wait
            ),
        )
            .into_response();
    }

    let target = upstream_url(&state.config.primary_upstream_base(), uri.path());

    match state
        .forwarder
        .forward(method, &target, uri.query(), headers, body)
        .await
    {
        Ok(resp) => {
            let mut builder = Response::builder().status(resp.status);
            *builder.headers_mut().unwrap() = axum_headers_from(&resp.headers);
            builder.body(Body::from(resp.body)).unwrap()
        }
        Err(e) => {
            error!(error = %e, target = %target, "forward failed");
            (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response()
        }
    }
}
