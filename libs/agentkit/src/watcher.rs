//! Source file watcher
//!
//! Wraps a `notify` recursive watcher over a [`DependencyDescriptor`]'s root.
//! Raw events are filtered by the descriptor, debounced per path, and sent
//! as [`ChangeEvent`]s on a bounded channel. The watcher never acts on
//! changes itself.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dependency::DependencyDescriptor;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("failed to create file watcher")]
    Init(#[source] notify::Error),
    #[error("failed to watch {}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfiguration {
    pub descriptor: DependencyDescriptor,
    pub debounce: Duration,
}

impl WatchConfiguration {
    #[must_use]
    pub fn new(descriptor: DependencyDescriptor) -> Self {
        Self {
            descriptor,
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

fn change_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

/// Running file watcher. Dropping it stops delivery.
pub struct Watcher {
    _inner: RecommendedWatcher,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Start watching and deliver debounced changes to `events`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// `WatchError` if the OS watcher cannot be created or attached.
    pub fn start(
        configuration: WatchConfiguration,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self, WatchError> {
        let WatchConfiguration {
            descriptor,
            debounce,
        } = configuration;
        let root = descriptor.root().to_path_buf();
        let paused = Arc::new(AtomicBool::new(false));
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<ChangeEvent>();

        let filter_paused = Arc::clone(&paused);
        let mut inner = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if filter_paused.load(Ordering::Acquire) {
                    return;
                }
                let Some(kind) = change_kind(&event.kind) else {
                    return;
                };
                for path in event.paths {
                    if descriptor.matches(&path) {
                        let _ = raw_tx.send(ChangeEvent { path, kind });
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })
        .map_err(WatchError::Init)?;

        inner
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.clone(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            raw_rx,
            events,
            debounce,
            Arc::clone(&paused),
            cancel.clone(),
        ));
        tracing::debug!(root = %root.display(), ?debounce, "file watcher started");

        Ok(Self {
            _inner: inner,
            paused,
            cancel,
            task: Some(task),
        })
    }

    /// Drop events until [`Watcher::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    /// Pause until the returned guard is dropped.
    #[must_use]
    pub fn pause_guard(&self) -> PauseGuard {
        self.pause();
        PauseGuard {
            paused: Arc::clone(&self.paused),
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::debug!("file watcher stopped");
    }
}

/// Resumes the watcher it was taken from when dropped.
pub struct PauseGuard {
    paused: Arc<AtomicBool>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.paused.store(false, Ordering::Release);
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward each path once it has been quiet for `debounce`, keeping its last kind.
async fn debounce_loop(
    mut raw: mpsc::UnboundedReceiver<ChangeEvent>,
    events: mpsc::Sender<ChangeEvent>,
    debounce: Duration,
    paused: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<PathBuf, (ChangeKind, Instant)> = HashMap::new();
    loop {
        let next_due = pending.values().map(|(_, due)| *due).min();
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            received = raw.recv() => match received {
                Some(event) => {
                    pending.insert(event.path, (event.kind, Instant::now() + debounce));
                }
                None => break,
            },

            () = sleep_until(next_due) => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, (_, at))| *at <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    let Some((kind, _)) = pending.remove(&path) else {
                        continue;
                    };
                    if paused.load(Ordering::Acquire) {
                        continue;
                    }
                    tracing::debug!(path = %path.display(), ?kind, "source change");
                    if events.send(ChangeEvent { path, kind }).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
