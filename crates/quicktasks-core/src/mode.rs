use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase", tag = "mode", content = "owner")]
pub enum Mode {
    #[default]
    Undetermined,
    Guest,
    Authenticated(String),
}

impl Mode {
    pub fn is_determined(&self) -> bool {
        !matches!(self, Mode::Undetermined)
    }

    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Mode::Authenticated(owner) => Some(owner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    SignedIn(String),
    SignedOut,
    ContinueAsGuest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Read the newly authoritative store.
    Load,
    /// Copy guest data to the owner's remote store, then load.
    Migrate,
    /// Drop all in-memory lists, tasks and selection.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: Mode,
    pub to: Mode,
    pub effect: Effect,
}

#[derive(Debug, Clone, Default)]
pub struct ModeResolver {
    mode: Mode,
}

impl ModeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resumes from a previously recorded mode.
    pub fn with_mode(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    /// Advances the mode for one identity event.
    ///
    /// Returns `None` when the event does not change the mode, either
    /// because it repeats the current state or because the pair is not a
    /// legal transition.
    #[tracing::instrument(skip(self), fields(from = ?self.mode))]
    pub fn apply(&mut self, event: IdentityEvent) -> Option<Transition> {
        let (to, effect) = match (&self.mode, event) {
            (Mode::Undetermined, IdentityEvent::SignedIn(owner)) => {
                (Mode::Authenticated(owner), Effect::Load)
            }
            (Mode::Undetermined, IdentityEvent::ContinueAsGuest) => (Mode::Guest, Effect::Load),
            (Mode::Guest, IdentityEvent::SignedIn(owner)) => {
                (Mode::Authenticated(owner), Effect::Migrate)
            }
            (Mode::Authenticated(_), IdentityEvent::SignedOut) => {
                (Mode::Undetermined, Effect::Reset)
            }
            (Mode::Authenticated(current), IdentityEvent::SignedIn(owner)) if *current == owner => {
                debug!(owner_id = %owner, "owner re-announced; mode unchanged");
                return None;
            }
            (Mode::Guest, IdentityEvent::ContinueAsGuest)
            | (Mode::Guest, IdentityEvent::SignedOut)
            | (Mode::Undetermined, IdentityEvent::SignedOut) => {
                debug!("identity event repeats current mode; ignoring");
                return None;
            }
            (current, event) => {
                warn!(mode = ?current, ?event, "illegal mode transition ignored");
                return None;
            }
        };

        let from = std::mem::replace(&mut self.mode, to.clone());
        info!(?from, ?to, ?effect, "mode transition");
        Some(Transition { from, to, effect })
    }
}
