use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::mode::IdentityEvent;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentityState {
    #[default]
    Loading,
    SignedOut,
    SignedIn(String),
}

impl IdentityState {
    /// The resolver event this state announces; `Loading` announces nothing.
    pub fn as_event(&self) -> Option<IdentityEvent> {
        match self {
            IdentityState::Loading => None,
            IdentityState::SignedOut => Some(IdentityEvent::SignedOut),
            IdentityState::SignedIn(owner) => Some(IdentityEvent::SignedIn(owner.clone())),
        }
    }
}

/// Sign-in capability consumed by the front end. The engine only ever sees
/// the states it publishes.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn current_state(&self) -> IdentityState;

    fn subscribe(&self) -> watch::Receiver<IdentityState>;

    async fn sign_in(&self) -> anyhow::Result<()>;

    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// Provider backed by a watch channel. `sign_in` announces a fixed owner.
#[derive(Debug)]
pub struct LocalIdentity {
    owner_id: String,
    tx: watch::Sender<IdentityState>,
}

impl LocalIdentity {
    pub fn new(owner_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(IdentityState::Loading);
        Self {
            owner_id: owner_id.into(),
            tx,
        }
    }

    /// Publishes the state found at startup, ending `Loading`.
    pub fn resolve(&self, state: IdentityState) {
        debug!(?state, "identity resolved");
        self.tx.send_replace(state);
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    fn current_state(&self) -> IdentityState {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<IdentityState> {
        self.tx.subscribe()
    }

    async fn sign_in(&self) -> anyhow::Result<()> {
        info!(owner_id = %self.owner_id, "signing in");
        self.tx
            .send_replace(IdentityState::SignedIn(self.owner_id.clone()));
        Ok(())
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        info!(owner_id = %self.owner_id, "signing out");
        self.tx.send_replace(IdentityState::SignedOut);
        Ok(())
    }
}
