//! Axum HTTP ingress: the REST surface documented for external callers,
//! plus the `X-API-Key` auth middleware guarding every route except
//! health/channel discovery and the inbound webhook receivers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use omni_common::{Channel, Message, Priority};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use crate::Gateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let state = AppState { gateway };

    let protected = Router::new()
        .route("/send", post(send_message))
        .route("/broadcast", post(broadcast))
        .route("/templates", get(list_templates).post(register_template))
        .route("/templates/:name", delete(delete_template))
        .route("/dlq", get(get_dead_letters).delete(clear_dead_letters))
        .route("/dlq/:index/retry", post(retry_dead_letter))
        .route("/stats", get(get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let public = Router::new()
        .route("/health", get(health))
        .route("/channels", get(list_channels))
        .route("/webhook/:channel", post(receive_channel_webhook))
        .route("/webhook", post(receive_generic_webhook));

    public.merge(protected).layer(TraceLayer::new_for_http()).with_state(state)
}

async fn auth_middleware(State(state): State<AppState>, headers: HeaderMap, request: axum::extract::Request, next: Next) -> Response {
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided != state.gateway.config.api_key {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid API key");
    }
    next.run(request).await
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "error": detail.into() }))).into_response()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let channels: Map<String, Value> = Channel::all()
        .into_iter()
        .map(|c| (c.as_str().to_string(), Value::Bool(state.gateway.channel_enabled(c))))
        .collect();
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "channels": channels,
        "stats": state.gateway.stats(),
    }))
}

async fn list_channels(State(state): State<AppState>) -> Json<Value> {
    let channels: Vec<Value> = Channel::all()
        .into_iter()
        .map(|c| json!({"name": c.as_str(), "enabled": state.gateway.channel_enabled(c)}))
        .collect();
    Json(json!({ "channels": channels }))
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    channel: String,
    target: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    template_vars: Map<String, Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    parse_mode: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

fn default_priority() -> i32 {
    5
}

async fn send_message(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let text = if req.text.is_empty() { req.message.clone() } else { req.text.clone() };
    if text.is_empty() && req.template.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Required: text or template");
    }

    let to_channel = match req.channel.parse::<Channel>() {
        Ok(c) => c,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown channel: {}. Available: telegram,whatsapp,discord,slack,email,webhook", req.channel),
            )
        }
    };

    let priority = match Priority::try_from(req.priority) {
        Ok(p) => p,
        Err(_) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid priority: {}", req.priority)),
    };

    let mut metadata = req.metadata.clone();
    if let Some(subject) = &req.subject {
        metadata.insert("subject".into(), Value::String(subject.clone()));
    }
    if let Some(parse_mode) = &req.parse_mode {
        metadata.insert("parse_mode".into(), Value::String(parse_mode.clone()));
    }
    if let Some(username) = &req.username {
        metadata.insert("username".into(), Value::String(username.clone()));
    }

    let mut msg = Message::new(Channel::Webhook, to_channel, text, req.target.clone());
    msg.template_name = req.template.clone();
    msg.template_vars = req.template_vars;
    msg.metadata = metadata;
    msg.priority = priority;

    let result = state.gateway.send(msg).await;
    (StatusCode::OK, Json(Value::Object(result.to_map()))).into_response()
}

#[derive(Debug, Deserialize)]
struct BroadcastTarget {
    channel: String,
    target: String,
}

#[derive(Debug, Deserialize)]
struct BroadcastRequest {
    targets: Vec<BroadcastTarget>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    template_vars: Map<String, Value>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

async fn broadcast(State(state): State<AppState>, Json(req): Json<BroadcastRequest>) -> Response {
    let text = if req.text.is_empty() { req.message.clone() } else { req.text.clone() };
    if text.is_empty() && req.template.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Required: text or template");
    }

    let mut results = Vec::with_capacity(req.targets.len());
    for t in &req.targets {
        match t.channel.parse::<Channel>() {
            Ok(channel) => {
                let mut msg = Message::new(Channel::Webhook, channel, text.clone(), t.target.clone());
                msg.template_name = req.template.clone();
                msg.template_vars = req.template_vars.clone();
                msg.metadata = req.metadata.clone();
                let result = state.gateway.send(msg).await;
                results.push(Value::Object(result.to_map()));
            }
            Err(_) => {
                results.push(json!({
                    "success": false,
                    "error": format!("Unknown channel: {}", t.channel),
                    "target": t.target,
                }));
            }
        }
    }

    Json(json!({ "results": results })).into_response()
}

async fn receive_channel_webhook(Path(channel): Path<String>, Json(body): Json<Value>) -> Json<Value> {
    let event = body.get("event").and_then(Value::as_str).unwrap_or("unknown");
    tracing::info!(%channel, %event, "webhook received");
    Json(json!({ "status": "received", "channel": channel, "event": event }))
}

#[derive(Debug, Deserialize)]
struct GenericWebhookPayload {
    #[serde(default = "default_event")]
    event: String,
    #[serde(default)]
    #[allow(dead_code)]
    data: Map<String, Value>,
}

fn default_event() -> String {
    "message".to_string()
}

async fn receive_generic_webhook(Json(payload): Json<GenericWebhookPayload>) -> Json<Value> {
    tracing::info!(event = %payload.event, "generic webhook received");
    Json(json!({ "status": "received", "event": payload.event }))
}

async fn list_templates(State(state): State<AppState>) -> Json<Value> {
    let (memory, files) = state.gateway.template_engine.list_templates();
    Json(json!({ "memory": memory, "files": files }))
}

#[derive(Debug, Deserialize)]
struct TemplateRegisterRequest {
    name: String,
    template: String,
}

async fn register_template(State(state): State<AppState>, Json(req): Json<TemplateRegisterRequest>) -> Response {
    match state.gateway.register_template(&req.name, &req.template) {
        Ok(()) => Json(json!({ "status": "registered", "name": req.name })).into_response(),
        Err(e) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    }
}

async fn delete_template(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if state.gateway.template_engine.unregister(&name) {
        Json(json!({ "status": "removed", "name": name })).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("Template not found: {name}"))
    }
}

#[derive(Debug, Deserialize)]
struct DlqQuery {
    #[serde(default = "default_dlq_limit")]
    limit: usize,
}

fn default_dlq_limit() -> usize {
    100
}

async fn get_dead_letters(State(state): State<AppState>, Query(query): Query<DlqQuery>) -> Json<Value> {
    let messages = state.gateway.router.get_dead_letters(query.limit);
    Json(json!({ "count": messages.len(), "messages": messages }))
}

async fn retry_dead_letter(State(state): State<AppState>, Path(index): Path<usize>) -> Response {
    match state.gateway.router.retry_dead_letter(index).await {
        Ok(result) => Json(Value::Object(result.to_map())).into_response(),
        Err(_) => error_response(StatusCode::NOT_FOUND, "Dead letter not found"),
    }
}

async fn clear_dead_letters(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.gateway.router.clear_dead_letters();
    Json(json!({ "cleared": cleared }))
}

async fn get_stats(State(state): State<AppState>) -> Json<Value> {
    Json(state.gateway.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let mut config = GatewayConfig::default();
        config.api_key = "secret".to_string();
        build_router(Arc::new(Gateway::new(config)))
    }

    #[tokio::test]
    async fn health_is_public_and_reports_version() {
        let response = router().oneshot(Request::get("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_key_is_unauthorized() {
        let response = router()
            .oneshot(Request::get("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn protected_route_with_correct_key_succeeds() {
        let response = router()
            .oneshot(Request::get("/stats").header("x-api-key", "secret").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deleting_unknown_template_is_not_found() {
        let response = router()
            .oneshot(
                Request::delete("/templates/nope")
                    .header("x-api-key", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
