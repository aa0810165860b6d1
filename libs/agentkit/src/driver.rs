//! Local scheduler replaying lifecycle transitions after source changes.
//!
//! The [`Driver`] owns the change receiver of a [`Runtime`]. For every batch
//! of changes it records them through [`Runtime::handle_change`], takes the
//! pending [`DesiredAction`] and replays the last requests it was given:
//! `Load` replays Load, Init and Start; `Init` replays Init and Start;
//! `Start` replays Start.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;
use crate::lifecycle::{DesiredAction, Transition};
use crate::runtime::{InitRequest, LoadRequest, Runtime, StartRequest};
use crate::watcher::ChangeEvent;

/// Requests replayed on every transition.
#[derive(Debug, Clone)]
pub struct Requests {
    pub load: LoadRequest,
    pub init: InitRequest,
    pub start: StartRequest,
}

pub struct Driver {
    runtime: Arc<Runtime>,
    requests: Requests,
}

impl Driver {
    #[must_use]
    pub fn new(runtime: Arc<Runtime>, requests: Requests) -> Self {
        Self { runtime, requests }
    }

    /// Run Load, Init and Start once.
    ///
    /// # Errors
    /// The first failing lifecycle call.
    pub async fn bring_up(&self) -> Result<Transition, RuntimeError> {
        self.replay(DesiredAction::Load).await
    }

    /// Perform `action` and everything it implies.
    ///
    /// # Errors
    /// The first failing lifecycle call; later steps are skipped.
    pub async fn replay(&self, action: DesiredAction) -> Result<Transition, RuntimeError> {
        let mut transition = None;
        if action >= DesiredAction::Load {
            transition = Some(self.runtime.load(self.requests.load.clone()).await?.transition);
        }
        if action >= DesiredAction::Init {
            transition = Some(self.runtime.init(self.requests.init.clone()).await?.transition);
        }
        if action >= DesiredAction::Start {
            transition = Some(
                self.runtime
                    .start(self.requests.start.clone())
                    .await?
                    .transition,
            );
        }
        match transition {
            Some(t) => Ok(t),
            None => Ok(Transition::settled(self.runtime.phase().await)),
        }
    }

    /// Consume change events until `cancel` fires or the channel closes.
    ///
    /// Returns immediately when the receiver was already taken.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(mut changes) = self.runtime.take_change_receiver() else {
            tracing::warn!("change receiver already taken, driver not started");
            return;
        };
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                received = changes.recv() => match received {
                    Some(change) => self.on_changes(change, &mut changes).await,
                    None => break,
                },
            }
        }
        tracing::debug!("driver stopped");
    }

    async fn on_changes(&self, first: ChangeEvent, changes: &mut mpsc::Receiver<ChangeEvent>) {
        self.runtime.handle_change(&first).await;
        while let Ok(change) = changes.try_recv() {
            self.runtime.handle_change(&change).await;
        }
        let action = self.runtime.take_desired().await;
        if action == DesiredAction::None {
            return;
        }
        tracing::info!(?action, "replaying lifecycle");
        match self.replay(action).await {
            Ok(transition) => {
                tracing::info!(phase = %transition.phase, "lifecycle replayed");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    phase = %e.phase(),
                    retriable = e.is_retriable(),
                    "lifecycle replay failed"
                );
            }
        }
    }
}
