//! Minimal stand-in service for end-to-end tests.
//!
//! Binds the REST endpoint the agent injects through `SVCAGENT__ENDPOINT__*__REST`
//! and answers `GET /version` with the injected service version.

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;

const ENDPOINT_PREFIX: &str = "SVCAGENT__ENDPOINT__";
const REST_SUFFIX: &str = "__REST";
const VERSION_VAR: &str = "SVCAGENT__SERVICE__VERSION";

#[derive(Clone)]
struct AppState {
    version: Arc<str>,
}

async fn get_version(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": &*state.version }))
}

/// Port of the first REST endpoint address (`http://host:port`) in `vars`.
fn rest_port(vars: impl IntoIterator<Item = (String, String)>) -> Option<u16> {
    let mut rest: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(k, _)| k.starts_with(ENDPOINT_PREFIX) && k.ends_with(REST_SUFFIX))
        .collect();
    rest.sort();
    let (_, address) = rest.into_iter().next()?;
    address.rsplit(':').next()?.trim_end_matches('/').parse().ok()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let port = rest_port(std::env::vars()).context("no REST endpoint in environment")?;
    let version: Arc<str> = std::env::var(VERSION_VAR)
        .unwrap_or_else(|_| "unknown".to_owned())
        .into();

    let app = Router::new()
        .route("/version", get(get_version))
        .with_state(AppState { version });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "svc-echo listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown())
        .await?;
    tracing::info!("svc-echo stopped");
    Ok(())
}

async fn shutdown() {
    #[cfg(unix)]
    {
        let Ok(mut term) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
