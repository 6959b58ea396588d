use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use crate::model::{ModelMetadata, loader::ModelHandle};

/// Lifecycle of the single served model. Only `Loading` may be left.
pub enum ServerState {
    Loading,
    Ready(Arc<ModelHandle>),
    Failed(String),
}

impl ServerState {
    pub fn is_loading(&self) -> bool {
        matches!(self, ServerState::Loading)
    }

    fn label(&self) -> &'static str {
        match self {
            ServerState::Loading => "loading",
            ServerState::Ready(_) => "ready",
            ServerState::Failed(_) => "failed",
        }
    }
}

/// Owned view of [`ServerState`] for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSnapshot {
    Loading,
    Online { model: ModelMetadata },
    Offline { error: String },
}

/// Holds the server state and notifies watchers on its single transition.
pub struct StateCell {
    tx: watch::Sender<ServerState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ServerState::Loading);
        Self { tx }
    }

    /// Moves out of `Loading`. Returns `false`, leaving the state untouched,
    /// if a transition already happened or `next` is `Loading`.
    pub fn transition(&self, next: ServerState) -> bool {
        let mut rejected = None;
        let applied = self.tx.send_if_modified(|current| {
            if current.is_loading() && !next.is_loading() {
                *current = next;
                true
            } else {
                rejected = Some((current.label(), next.label()));
                false
            }
        });
        if let Some((from, to)) = rejected {
            warn!(from, to, "ignoring illegal server state transition");
        }
        applied
    }

    pub fn ready_handle(&self) -> Option<Arc<ModelHandle>> {
        match &*self.tx.borrow() {
            ServerState::Ready(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        match &*self.tx.borrow() {
            ServerState::Loading => StatusSnapshot::Loading,
            ServerState::Ready(handle) => StatusSnapshot::Online {
                model: handle.metadata().clone(),
            },
            ServerState::Failed(reason) => StatusSnapshot::Offline {
                error: reason.clone(),
            },
        }
    }

    /// Resolves once the state has left `Loading`.
    pub async fn settled(&self) -> StatusSnapshot {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| !state.is_loading()).await;
        self.snapshot()
    }
}
