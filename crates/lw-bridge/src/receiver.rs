//! ExternalEventReceiver: a localhost HTTP listener for browser-side reports.
//!
//! Two ingestion routes (console errors and observed HTTP calls), each
//! answering CORS preflight. Accepted reports become [`Signal`]s on the
//! pipeline channel. A bad body gets a 500 and the listener keeps serving.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use lw_core::config::ReceiverConfig;
use lw_core::types::{HttpCall, Signal, SignalSource};
use lw_harness::ShutdownSignal;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::api_error::IngestError;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("receiver already running on {0}")]
    AlreadyRunning(SocketAddr),

    #[error("invalid route '{0}': must start with '/' and be distinct")]
    InvalidRoute(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Error report as posted by the injected tracking script.
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Epoch milliseconds or an RFC 3339 string.
    pub timestamp: Value,
}

impl BrowserReport {
    /// Normalize into a browser [`Signal`]. The payload is the message,
    /// prefixed so the diagnostic rules see the report kind, followed by the
    /// stack when there is one.
    pub fn into_signal(self) -> Signal {
        let kind = self.kind.to_ascii_lowercase();
        let mut text = match kind.as_str() {
            "warning" | "warn" => format!("Warning: {}", self.message),
            "unhandledrejection" | "unhandled_rejection" => {
                format!("Unhandled rejection: {}", self.message)
            }
            _ => self.message,
        };
        if let Some(stack) = self.stack.filter(|s| !s.trim().is_empty()) {
            text.push('\n');
            text.push_str(&stack);
        }

        let mut signal = Signal::text(SignalSource::Browser, text);
        if let Some(at) = parse_timestamp(&self.timestamp) {
            signal.timestamp = at;
        }
        match self.source.or(self.url).filter(|s| !s.is_empty()) {
            Some(origin) => signal.with_file(origin),
            None => signal,
        }
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

#[derive(Clone)]
struct ReceiverState {
    sink: flume::Sender<Signal>,
}

impl ReceiverState {
    fn forward(&self, signal: Signal) -> Result<Json<Value>, IngestError> {
        self.sink.send(signal).map_err(|_| IngestError::Unavailable)?;
        Ok(Json(json!({ "success": true })))
    }
}

async fn ingest_error(
    State(state): State<ReceiverState>,
    body: Bytes,
) -> Result<Json<Value>, IngestError> {
    let report: BrowserReport = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "rejected browser report");
        IngestError::MalformedPayload(e.to_string())
    })?;
    state.forward(report.into_signal())
}

async fn ingest_network(
    State(state): State<ReceiverState>,
    body: Bytes,
) -> Result<Json<Value>, IngestError> {
    let call: HttpCall = serde_json::from_slice(&body)
        .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
    state.forward(Signal::http_call(call))
}

/// Bare OPTIONS without CORS request headers; real preflights are answered by
/// the CORS layer before reaching this.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Build the ingestion router. Route paths are validated by
/// [`ExternalEventReceiver::start`].
pub fn router(config: &ReceiverConfig, sink: flume::Sender<Signal>) -> Router {
    Router::new()
        .route(&config.error_path, post(ingest_error).options(preflight))
        .route(&config.network_path, post(ingest_network).options(preflight))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive())
        .with_state(ReceiverState { sink })
}

struct Running {
    addr: SocketAddr,
    shutdown: ShutdownSignal,
    handle: JoinHandle<()>,
}

/// Owns at most one listener at a time.
pub struct ExternalEventReceiver {
    config: ReceiverConfig,
    running: Option<Running>,
}

impl ExternalEventReceiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    fn validate_routes(&self) -> Result<(), ReceiverError> {
        for path in [&self.config.error_path, &self.config.network_path] {
            if !path.starts_with('/') {
                return Err(ReceiverError::InvalidRoute(path.clone()));
            }
        }
        if self.config.error_path == self.config.network_path {
            return Err(ReceiverError::InvalidRoute(self.config.network_path.clone()));
        }
        Ok(())
    }

    /// Bind and serve on a background task. Returns once the socket is bound,
    /// never waiting for a client.
    pub async fn start(&mut self, sink: flume::Sender<Signal>) -> Result<SocketAddr, ReceiverError> {
        if let Some(running) = &self.running {
            return Err(ReceiverError::AlreadyRunning(running.addr));
        }
        self.validate_routes()?;

        let bind = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|source| ReceiverError::Bind {
                addr: bind.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| ReceiverError::Bind {
            addr: bind.clone(),
            source,
        })?;

        let app = router(&self.config, sink);
        let shutdown = ShutdownSignal::new();
        let mut stop = shutdown.listener();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.wait().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "event receiver stopped with error");
            }
        });

        info!(%addr, error_path = %self.config.error_path, "event receiver listening");
        self.running = Some(Running {
            addr,
            shutdown,
            handle,
        });
        Ok(addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stop serving and release the port. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.shutdown.trigger();
        let mut handle = running.handle;
        if tokio::time::timeout(std::time::Duration::from_secs(2), &mut handle)
            .await
            .is_err()
        {
            warn!(addr = %running.addr, "event receiver did not drain in time, aborting");
            handle.abort();
        }
        info!(addr = %running.addr, "event receiver stopped");
    }
}

impl Drop for ExternalEventReceiver {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.shutdown.trigger();
            running.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(kind: &str, stack: Option<&str>) -> BrowserReport {
        BrowserReport {
            kind: kind.into(),
            message: "Cannot read properties of undefined".into(),
            stack: stack.map(str::to_string),
            source: None,
            url: Some("http://localhost:5173/".into()),
            timestamp: json!(1_700_000_000_000i64),
        }
    }

    #[test]
    fn warning_reports_are_prefixed() {
        let signal = report("warning", None).into_signal();
        assert_eq!(signal.text_payload(), "Warning: Cannot read properties of undefined");
        assert_eq!(signal.file.as_deref(), Some("http://localhost:5173/"));
    }

    #[test]
    fn stack_follows_message() {
        let signal = report("error", Some("at App (src/App.jsx:3:1)")).into_signal();
        assert_eq!(
            signal.text_payload(),
            "Cannot read properties of undefined\nat App (src/App.jsx:3:1)"
        );
        assert_eq!(signal.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn rfc3339_timestamps_parse() {
        let at = parse_timestamp(&json!("2024-05-01T10:00:00Z")).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert!(parse_timestamp(&json!(true)).is_none());
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let config = ReceiverConfig {
            network_path: ReceiverConfig::default().error_path,
            ..ReceiverConfig::default()
        };
        let receiver = ExternalEventReceiver::new(config);
        assert!(matches!(
            receiver.validate_routes(),
            Err(ReceiverError::InvalidRoute(_))
        ));
    }
}
