//! Forwarding of service stdout/stderr into tracing
//!
//! Each line is re-emitted with the level the service logged it at. Three
//! shapes are recognised:
//!
//! ```text
//! {"time":"2025-01-01T00:00:00Z","level":"WARN","msg":"..."}       (slog / zap JSON)
//! time=2025-01-01T00:00:00Z level=ERROR msg="..."                   (slog text)
//! 2025-01-01T00:00:00.000Z DEBUG target: message                    (tracing fmt)
//! ```
//!
//! Anything else is forwarded at INFO.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "error" | "fatal" | "panic" | "dpanic" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

fn json_level(line: &str) -> Option<Level> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    parse_level(value.get("level")?.as_str()?)
}

fn logfmt_level(line: &str) -> Option<Level> {
    line.split_whitespace()
        .find_map(|field| field.strip_prefix("level="))
        .and_then(|l| parse_level(l.trim_matches('"')))
}

fn fmt_level(line: &str) -> Option<Level> {
    let mut parts = line.split_whitespace();
    let _timestamp = parts.next()?;
    parse_level(parts.next()?)
}

/// Level a line was logged at, INFO when unknown. stderr lines without a
/// recognised level are reported as WARN.
fn detect_level(line: &str, stream: StreamKind) -> Level {
    json_level(line)
        .or_else(|| logfmt_level(line))
        .or_else(|| fmt_level(line))
        .unwrap_or(match stream {
            StreamKind::Stdout => Level::INFO,
            StreamKind::Stderr => Level::WARN,
        })
}

macro_rules! forward_at {
    ($macro:ident, $service:expr, $instance_id:expr, $stream:expr, $line:expr) => {
        tracing::$macro!(
            service = %$service,
            instance_id = %$instance_id,
            stream = %$stream,
            "{}",
            $line
        )
    };
}

fn forward(service: &str, instance_id: Uuid, stream: StreamKind, line: &str) {
    match detect_level(line, stream) {
        Level::ERROR => forward_at!(error, service, instance_id, stream, line),
        Level::WARN => forward_at!(warn, service, instance_id, stream, line),
        Level::INFO => forward_at!(info, service, instance_id, stream, line),
        Level::DEBUG => forward_at!(debug, service, instance_id, stream, line),
        Level::TRACE => forward_at!(trace, service, instance_id, stream, line),
    }
}

/// Read `stream` line by line until it closes or `cancel` fires.
pub fn spawn_forwarder<S>(
    stream: S,
    service: String,
    instance_id: Uuid,
    kind: StreamKind,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                next = lines.next_line() => match next {
                    Ok(Some(line)) => forward(&service, instance_id, kind, &line),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(service = %service, stream = %kind, error = %e, "output read error");
                        break;
                    }
                },
            }
        }
        tracing::trace!(service = %service, instance_id = %instance_id, stream = %kind, "output forwarder finished");
    })
}
