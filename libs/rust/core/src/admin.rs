//! Admin HTTP surface shared by every service: liveness, readiness and Prometheus text.

use anyhow::Result;
use axum::{http::{header, StatusCode}, response::IntoResponse, routing::get, Json, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

use crate::{is_live, is_ready};

/// Bind the admin server and serve it on a background task.
///
/// `extra` carries service-specific routes; it must already have its state applied.
/// Returns the bound address so callers passing port 0 can discover it.
pub async fn start_admin_server(port: u16, extra: Router) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": is_live()})) }))
        .route("/ready", get(readiness))
        .route("/metrics", get(metrics_handler))
        .merge(extra);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!(?addr, "admin server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error=?e, "admin server failed");
        }
    });
    Ok(addr)
}

async fn readiness() -> impl IntoResponse {
    let ready = is_ready();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({"ready": ready})))
}

/// Render the default Prometheus registry in text exposition format.
pub fn metrics_text() -> Result<Vec<u8>> {
    let metric_families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buf)?;
    Ok(buf)
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics_text() {
        Ok(buf) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response(),
    }
}
