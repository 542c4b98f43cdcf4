use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::identity::IdentityState;
use crate::store::KeyValueStore;

pub const SESSION_STORAGE_KEY: &str = "quicktasks_session";

/// What the command line remembers between runs: whether the user chose
/// guest mode and which owner, if any, is signed in.
///
/// `guest` stays set after a sign-in whose migration was incomplete, so the
/// next run replays guest then sign-in and migrates again.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub guest: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Session {
    /// Unreadable or malformed state reads as a fresh session.
    #[tracing::instrument(skip(kv))]
    pub fn load(kv: &Arc<dyn KeyValueStore>) -> Self {
        let raw = match kv.get_item(SESSION_STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::default(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading session; starting fresh");
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(session) => {
                debug!(?session, "restored session");
                session
            }
            Err(err) => {
                warn!(error = %err, "malformed session; starting fresh");
                Self::default()
            }
        }
    }

    pub fn save(&self, kv: &Arc<dyn KeyValueStore>) -> anyhow::Result<()> {
        let raw = serde_json::to_string(self).context("failed to serialize session")?;
        kv.set_item(SESSION_STORAGE_KEY, &raw)
            .context("failed to persist session")
    }

    pub fn identity_state(&self) -> IdentityState {
        match &self.owner_id {
            Some(owner) => IdentityState::SignedIn(owner.clone()),
            None => IdentityState::SignedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{SESSION_STORAGE_KEY, Session};
    use crate::identity::IdentityState;
    use crate::store::{KeyValueStore, MemoryKeyValueStore};

    #[test]
    fn round_trips_through_the_key_value_store() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        assert_eq!(Session::load(&kv), Session::default());
        assert_eq!(Session::load(&kv).identity_state(), IdentityState::SignedOut);

        let session = Session {
            guest: true,
            owner_id: Some("ana".to_string()),
        };
        session.save(&kv).expect("save session");

        let restored = Session::load(&kv);
        assert_eq!(restored, session);
        assert_eq!(
            restored.identity_state(),
            IdentityState::SignedIn("ana".to_string())
        );
    }

    #[test]
    fn malformed_session_starts_fresh() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        kv.set_item(SESSION_STORAGE_KEY, "{not json").expect("seed");
        assert_eq!(Session::load(&kv), Session::default());
    }
}
