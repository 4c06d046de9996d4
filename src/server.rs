use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::SearchAgent;
use crate::config::{Credentials, RuntimeConfig};
use crate::error::{is_stream_closed, stream_error_message};
use crate::event::{EventSink, StreamClosed, StreamEvent};
use crate::provider::build_model;
use crate::search::build_search;
use crate::telemetry::TelemetrySink;

/// The agent may run at most this many events ahead of the connection.
pub const EVENT_CHANNEL_CAPACITY: usize = 1;

pub const ACCEPTED_NOTE: &str = "Accepted query, initializing agent...";
pub const FINISHED_NOTE: &str = "Agent finished.";
pub const MISSING_QUERY_ERROR: &str = "Missing 'query' field in request body";

#[derive(Clone)]
pub struct ServerState {
    pub agent: Arc<SearchAgent>,
    pub telemetry: TelemetrySink,
    pub auth_token: Option<String>,
    pub max_query_chars: usize,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub model: String,
    pub search_backend: &'static str,
}

pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn check_server_auth(state: &ServerState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected_token) = state.auth_token.as_deref() else {
        return Ok(());
    };

    let provided_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();

    if provided_token.is_empty() || provided_token != expected_token {
        return Err(api_error(
            StatusCode::UNAUTHORIZED,
            "missing or invalid Authorization bearer token",
        ));
    }

    Ok(())
}

/// Extracts the query from a `/chat` request body. The query is returned
/// exactly as sent; blank queries are rejected.
pub fn parse_chat_query(body: &[u8], max_query_chars: usize) -> Result<String, ApiError> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(body).map_err(|err| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("request body is not valid JSON: {err}"),
            )
        })?
    };

    let query = payload
        .get("query")
        .and_then(Value::as_str)
        .filter(|query| !query.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, MISSING_QUERY_ERROR))?;

    let query_chars = query.chars().count();
    if query_chars > max_query_chars {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("query is {query_chars} characters; the limit is {max_query_chars}"),
        ));
    }

    Ok(query.to_string())
}

pub async fn handle_server_health(
    State(state): State<Arc<ServerState>>,
) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        model: state.agent.model_name().to_string(),
        search_backend: state.agent.search_backend(),
    })
}

/// `POST /chat`: validates the request, then streams the run as SSE.
///
/// Validation failures are plain JSON errors; once the stream is open every
/// outcome, including failures, is reported as events.
pub async fn handle_chat(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    check_server_auth(&state, &headers)?;
    let query = parse_chat_query(&body, state.max_query_chars)?;
    tracing::info!(query_chars = query.chars().count(), "chat request accepted");

    let (events, receiver) = mpsc::channel::<StreamEvent>(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(stream_agent_run(
        state.agent.clone(),
        query,
        events,
        state.telemetry.clone(),
    ));

    let frames = ReceiverStream::new(receiver).map(|event| Event::default().json_data(event));
    let stream_headers = [
        (CACHE_CONTROL, "no-cache, no-transform"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    let sse = Sse::new(frames).keep_alive(KeepAlive::default());
    Ok((stream_headers, sse).into_response())
}

/// Drives one agent run into `events`, bracketing it with the acknowledgement
/// and completion notes. The channel closes when this returns.
pub async fn stream_agent_run(
    agent: Arc<SearchAgent>,
    query: String,
    events: mpsc::Sender<StreamEvent>,
    telemetry: TelemetrySink,
) {
    let started_at = Instant::now();
    if events.emit(StreamEvent::reasoning(ACCEPTED_NOTE)).await.is_err() {
        tracing::debug!("client disconnected before the run started");
        return;
    }

    let outcome = tokio::select! {
        outcome = agent.run(&query, &events) => outcome,
        _ = events.closed() => Err(anyhow::Error::new(StreamClosed)),
    };
    let latency_ms = started_at.elapsed().as_millis() as u64;

    match outcome {
        Ok(summary) => {
            tracing::info!(
                used_search = summary.used_search,
                fragments = summary.fragments,
                latency_ms,
                "agent run completed"
            );
            telemetry.emit(
                "agent.run.completed",
                json!({
                    "used_search": summary.used_search,
                    "fragments": summary.fragments,
                    "answer_chars": summary.answer_chars,
                    "latency_ms": latency_ms
                }),
            );
            if events.emit(StreamEvent::reasoning(FINISHED_NOTE)).await.is_err() {
                tracing::debug!("client disconnected before the completion note");
            }
        }
        Err(err) if is_stream_closed(&err) => {
            tracing::info!(latency_ms, "client disconnected; agent run abandoned");
            telemetry.emit("agent.run.abandoned", json!({ "latency_ms": latency_ms }));
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), latency_ms, "agent run failed");
            telemetry.emit(
                "agent.run.failed",
                json!({ "error": format!("{err:#}"), "latency_ms": latency_ms }),
            );
            let message = stream_error_message(&err);
            if events.emit(StreamEvent::response(message)).await.is_err() {
                tracing::debug!("client disconnected before the error response");
            }
        }
    }
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/chat", post(handle_chat))
        .with_state(state)
}

pub async fn run_server(
    cfg: &RuntimeConfig,
    creds: &Credentials,
    host: String,
    port: u16,
    telemetry: &TelemetrySink,
) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{}:{}'", host, port))?;
    let model = build_model(cfg, creds)?;
    let search = build_search(cfg, creds)?;
    let agent = Arc::new(SearchAgent::new(model, search));

    let state = Arc::new(ServerState {
        agent: agent.clone(),
        telemetry: telemetry.clone(),
        auth_token: creds.server_auth_token.clone(),
        max_query_chars: cfg.max_query_chars,
    });

    telemetry.emit(
        "server.started",
        json!({
            "host": host,
            "port": port,
            "profile": cfg.profile,
            "model": agent.model_name(),
            "search_backend": agent.search_backend()
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind server listener on {addr}"))?;
    tracing::info!(
        %addr,
        model = agent.model_name(),
        search_backend = agent.search_backend(),
        auth = state.auth_token.is_some(),
        "server listening (health: /healthz, chat: /chat)"
    );
    println!("Server running on http://{addr} (health: /healthz, chat: POST /chat)");

    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down gracefully"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down gracefully"),
    }
}
