use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{CellId, CellStatus, ItemId, ItemStatus, LockState, Role, User, UserId};
use crate::timestamp;

// -- Auth --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Role,
    pub access_token: String,
    /// Absent on backends that do not issue refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl LoginResponse {
    /// User snapshot stored in the session. The login payload carries no timestamps.
    pub fn user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            full_name: self.full_name.clone(),
            role: self.role,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Acknowledgement body returned by actuation and delete endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// -- Items --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cell_id: CellId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessUpdate {
    pub user_ids: Vec<UserId>,
}

// -- Cells --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCell {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CellStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CellStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<LockState>,
}

// -- Borrowings --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBorrowing {
    pub user_id: UserId,
    pub item_id: ItemId,
    #[serde(with = "timestamp")]
    pub expected_return_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// -- Dashboard --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_users: u64,
    pub total_items: u64,
    pub total_cells: u64,
    pub available_items: u64,
    pub active_borrowings: u64,
    #[serde(default)]
    pub recent_activities: Vec<RecentActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentActivity {
    pub id: i64,
    pub user_name: String,
    pub item_name: String,
    #[serde(with = "timestamp")]
    pub borrowed_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub expected_return_at: DateTime<Utc>,
    /// "active" or "returned".
    pub status: String,
}
