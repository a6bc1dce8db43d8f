use locker_types::models::{BorrowingId, Borrowing, CellId, ItemId, ItemStatus};
use serde_json::Value;

/// Failures surfaced by the API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure: connection refused, timeout, TLS, truncated body.
    #[error("Network error")]
    Network(#[source] reqwest::Error),

    /// Non-2xx response. `message` is the server's own text when it sent one.
    #[error("{message}")]
    Server { status: u16, message: String },

    /// Token refresh failed. Local credentials have been purged.
    #[error("Session expired. Please login again.")]
    SessionExpired,

    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired)
    }

    /// Builds a `Server` error from a response body, preferring the backend's message.
    pub(crate) fn from_response(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|value| server_message(&value))
            .unwrap_or_else(|| format!("HTTP {}", status));
        Self::Server { status, message }
    }
}

// Flask routes answer with `error` or `message`; flask-jwt-extended uses `msg`.
fn server_message(body: &Value) -> Option<String> {
    ["error", "message", "msg"].iter().find_map(|key| match body.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        // Validation errors arrive as objects keyed by field
        other => Some(other.to_string()),
    })
}

/// Failures of a single cell command.
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    #[error("Cell {cell_id} is busy with another operation")]
    Busy { cell_id: CellId },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Failures of the composite take/return flows.
///
/// The two backend calls of a flow are not transactional. When the second
/// call fails the first is not undone, and the variant says which half landed.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Item {item_id} is not available ({status:?})")]
    ItemUnavailable { item_id: ItemId, status: ItemStatus },

    #[error("You do not have access to item {item_id}")]
    AccessDenied { item_id: ItemId },

    #[error("Item {item_id} is already borrowed (borrowing {borrowing_id})")]
    AlreadyBorrowed { item_id: ItemId, borrowing_id: BorrowingId },

    #[error("Borrowing {} was recorded but the cell did not open: {source}", .borrowing.id)]
    CellNotOpened {
        borrowing: Box<Borrowing>,
        #[source]
        source: CellError,
    },

    #[error("Cell opened but the return of borrowing {borrowing_id} was not recorded: {source}")]
    ReturnNotRecorded {
        borrowing_id: BorrowingId,
        #[source]
        source: ApiError,
    },

    #[error(transparent)]
    Cell(#[from] CellError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}
