use serde::{Deserialize, Serialize};

use crate::models::{Cell, CellId, User};

/// Token lifecycle notifications published by the API client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SessionEvent {
    /// A new access token was obtained through the refresh endpoint
    TokenRefreshed,

    /// Refresh failed; every stored credential has already been purged
    ForcedLogout,
}

/// Identity state observed by front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthStatus {
    Unauthenticated,
    Authenticated(User),
}

impl AuthStatus {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Unauthenticated => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellCommand {
    Open,
    Close,
}

impl CellCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

/// Per-cell operation state as seen from the client.
///
/// The backend acknowledges a command before the hardware has moved, so a
/// successful command passes through `AwaitingPhysicalState` until the
/// delayed re-fetch lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "command", rename_all = "snake_case")]
pub enum CellPhase {
    #[default]
    Idle,
    CommandPending(CellCommand),
    AwaitingPhysicalState(CellCommand),
}

impl CellPhase {
    pub fn is_busy(&self) -> bool {
        !matches!(self, Self::Idle)
    }
}

/// Notifications emitted by the cell operation controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CellUpdate {
    /// A cell moved between operation phases
    PhaseChanged { cell_id: CellId, phase: CellPhase },

    /// Fresh cell state arrived from the backend
    Refreshed(Cell),
}
