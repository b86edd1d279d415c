use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;

use crate::paymaster::{PaymasterProxy, PaymasterRequest};
use crate::validation::{
    DataCallbackRequest, ValidationResponse, ValidationRules, validate_data_callback,
    validate_email_callback,
};

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<PaymasterProxy>,
    pub rules: Arc<ValidationRules>,
}

/// Builds the HTTP router. With `bearer_token` set, every route but `/health` needs it.
pub fn router(state: AppState, bearer_token: Option<String>) -> Router {
    let mut router = Router::new()
        .route("/api/paymaster", post(paymaster))
        .route("/api/data-validation", post(data_validation))
        .route("/api/email-validation", post(email_validation))
        .with_state(state);

    if let Some(expected) = bearer_token {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(expected),
            require_bearer,
        ));
    }

    router.route("/health", get(|| async { "ok" }))
}

async fn paymaster(State(state): State<AppState>, body: Bytes) -> Response {
    let request: PaymasterRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!("Malformed paymaster request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {"code": -32700, "message": format!("Parse error: {e}")}
                })),
            )
                .into_response();
        }
    };

    Json(state.proxy.handle(request).await).into_response()
}

async fn data_validation(State(state): State<AppState>, body: Bytes) -> Json<ValidationResponse> {
    match serde_json::from_slice::<DataCallbackRequest>(&body) {
        Ok(request) => Json(validate_data_callback(&request, &state.rules)),
        Err(e) => {
            tracing::error!("Error processing data validation: {}", e);
            Json(ValidationResponse::server_error("Server error validating data"))
        }
    }
}

async fn email_validation(State(state): State<AppState>, body: Bytes) -> Json<ValidationResponse> {
    match serde_json::from_slice::<DataCallbackRequest>(&body) {
        Ok(request) => Json(validate_email_callback(&request, &state.rules)),
        Err(e) => {
            tracing::error!("Error processing email validation: {}", e);
            Json(ValidationResponse::email_error("Server error validating email"))
        }
    }
}

async fn require_bearer(
    State(expected): State<Arc<String>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let headers: &HeaderMap = req.headers();
    let header_ok = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", expected.as_str()));

    // Fallback for clients that cannot set headers: ?access_token= or ?token=
    let query_ok = req.uri().query().is_some_and(|q| {
        q.split('&').any(|pair| {
            pair.split_once('=').is_some_and(|(k, v)| {
                (k == "access_token" || k == "token") && v == expected.as_str()
            })
        })
    });

    if !header_ok && !query_ok {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(req).await
}
