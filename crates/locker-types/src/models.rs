use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

pub type UserId = i64;
pub type ItemId = i64;
pub type CellId = i64;
pub type BorrowingId = i64;
pub type CellEventId = i64;

// -- Users --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub role: Role,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// -- Items --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Available,
    Borrowed,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    /// Nullable on the backend.
    #[serde(default)]
    pub description: Option<String>,
    /// Owning cell. Many items may share one cell.
    pub cell_id: CellId,
    pub status: ItemStatus,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

// -- Cells --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    Open,
    Closed,
}

/// Legacy lock flag, reported alongside `status` by older firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    pub status: CellStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<LockState>,
    #[serde(default, with = "timestamp::option")]
    pub last_open_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub last_close_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

// -- Borrowings --

/// A user holding an item. Active while `returned_at` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrowing {
    pub id: BorrowingId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub cell_id: CellId,
    #[serde(with = "timestamp")]
    pub borrowed_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub expected_return_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<Cell>,
}

impl Borrowing {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

// -- Cell events --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellEventType {
    Open,
    Close,
    ForceOpen,
}

/// Append-only audit record of a physical actuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEvent {
    pub id: CellEventId,
    pub cell_id: CellId,
    pub event_type: CellEventType,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<Cell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

// -- Access grants --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUserAccess {
    pub id: i64,
    pub item_id: ItemId,
    pub user_id: UserId,
    #[serde(default, with = "timestamp::option")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// One row of an item's allow-list. Depending on the backend version the
/// access endpoint answers with grant records or with the granted users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessEntry {
    Grant(ItemUserAccess),
    User(User),
}

impl AccessEntry {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Grant(grant) => grant.user_id,
            Self::User(user) => user.id,
        }
    }

    /// The granted user, when the backend embedded it.
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Grant(grant) => grant.user.as_ref(),
            Self::User(user) => Some(user),
        }
    }
}

/// Per-item allow-list. No rows means every user may borrow the item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessList {
    user_ids: Vec<UserId>,
}

impl AccessList {
    pub fn from_entries(entries: &[AccessEntry]) -> Self {
        let mut list = Self::default();
        for entry in entries {
            list.grant(entry.user_id());
        }
        list
    }

    pub fn is_unrestricted(&self) -> bool {
        self.user_ids.is_empty()
    }

    pub fn permits(&self, user_id: UserId) -> bool {
        self.is_unrestricted() || self.user_ids.contains(&user_id)
    }

    pub fn user_ids(&self) -> &[UserId] {
        &self.user_ids
    }

    /// Adds a user. Returns false if the user was already listed.
    pub fn grant(&mut self, user_id: UserId) -> bool {
        if self.user_ids.contains(&user_id) {
            return false;
        }
        self.user_ids.push(user_id);
        true
    }

    /// Removes a user. Returns false if the user was not listed.
    ///
    /// Revoking the last user makes the item unrestricted again.
    pub fn revoke(&mut self, user_id: UserId) -> bool {
        let before = self.user_ids.len();
        self.user_ids.retain(|id| *id != user_id);
        self.user_ids.len() != before
    }
}
