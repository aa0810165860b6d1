//! Port release polling

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("port {port} is still bound after {attempts} attempts")]
pub struct PortStillBound {
    pub port: u16,
    pub attempts: u32,
}

/// `true` when nothing listens on `127.0.0.1:port`.
pub async fn is_port_free(port: u16) -> bool {
    tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok()
}

/// Poll until `port` can be bound again, at most `attempts` times.
///
/// # Errors
/// `PortStillBound` after the last failed attempt.
pub async fn wait_for_port_release(
    port: u16,
    attempts: u32,
    interval: Duration,
) -> Result<(), PortStillBound> {
    for attempt in 1..=attempts {
        if is_port_free(port).await {
            tracing::trace!(port, attempt, "port released");
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(PortStillBound { port, attempts })
}
