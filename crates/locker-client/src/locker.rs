//! Domain flows built on the API client and the cell controller.
//!
//! None of these flows are transactional. Each backend call either lands or
//! fails on its own, and a failure in the second half of a flow leaves the
//! first half in place.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tracing::{info, warn};

use locker_types::api::NewBorrowing;
use locker_types::models::{AccessList, Borrowing, Item, ItemId, ItemStatus, User, UserId};

use crate::api::ApiClient;
use crate::cells::{CellController, PendingCommand};
use crate::error::{ApiError, CellError, FlowError};

/// A recorded borrowing and the open command that lets the user take the item.
#[derive(Debug)]
pub struct TakeReceipt {
    pub borrowing: Borrowing,
    pub pending: PendingCommand,
}

/// A closed borrowing and the open command that let the user put the item back.
#[derive(Debug)]
pub struct ReturnReceipt {
    pub borrowing: Borrowing,
    pub pending: PendingCommand,
}

#[derive(Clone)]
pub struct Locker {
    api: ApiClient,
    cells: CellController,
}

impl Locker {
    pub fn new(api: ApiClient, cells: CellController) -> Self {
        Self { api, cells }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn cells(&self) -> &CellController {
        &self.cells
    }

    // -- Access --

    pub async fn access_list(&self, item_id: ItemId) -> Result<AccessList, ApiError> {
        let entries = self.api.item_access(item_id).await?;
        Ok(AccessList::from_entries(&entries))
    }

    /// Items the user may borrow by allow-list, regardless of availability.
    ///
    /// Allow-lists are fetched concurrently. An item whose list cannot be
    /// fetched is treated as unrestricted.
    pub async fn accessible_items(&self, user: &User) -> Result<Vec<Item>, ApiError> {
        let items = self.api.items().await?;

        let lists = join_all(items.iter().map(|item| self.access_list(item.id))).await;

        Ok(items
            .into_iter()
            .zip(lists)
            .filter_map(|(item, list)| match list {
                Ok(list) => list.permits(user.id).then_some(item),
                Err(e) => {
                    warn!(item_id = item.id, "Access list unavailable, treating as open: {}", e);
                    Some(item)
                }
            })
            .collect())
    }

    /// Items the user could take right now.
    pub async fn borrowable_items(&self, user: &User) -> Result<Vec<Item>, ApiError> {
        let accessible = self.accessible_items(user).await?;
        let borrowings = self.api.borrowings().await?;

        Ok(accessible
            .into_iter()
            .filter(|item| item.status == ItemStatus::Available)
            .filter(|item| !borrowings.iter().any(|b| b.item_id == item.id && b.is_active()))
            .collect())
    }

    pub async fn active_borrowing_for(&self, item_id: ItemId) -> Result<Option<Borrowing>, ApiError> {
        let borrowings = self.api.borrowings().await?;
        Ok(borrowings
            .into_iter()
            .find(|b| b.item_id == item_id && b.is_active()))
    }

    pub async fn my_active_borrowings(&self, user: &User) -> Result<Vec<Borrowing>, ApiError> {
        self.api.my_active_borrowings(user.id).await
    }

    /// Adds a user to the item's allow-list. Returns false when already present.
    ///
    /// Read-modify-write: a concurrent edit by another client can be lost.
    pub async fn grant_access(&self, item_id: ItemId, user_id: UserId) -> Result<bool, ApiError> {
        let mut list = self.access_list(item_id).await?;
        if !list.grant(user_id) {
            return Ok(false);
        }
        self.api.set_item_access(item_id, list.user_ids()).await?;
        info!(item_id, user_id, "Access granted");
        Ok(true)
    }

    /// Removes a user from the item's allow-list. Returns false when absent.
    ///
    /// Removing the last user makes the item unrestricted.
    pub async fn revoke_access(&self, item_id: ItemId, user_id: UserId) -> Result<bool, ApiError> {
        let mut list = self.access_list(item_id).await?;
        if !list.revoke(user_id) {
            return Ok(false);
        }
        self.api.set_item_access(item_id, list.user_ids()).await?;
        info!(item_id, user_id, "Access revoked");
        Ok(true)
    }

    // -- Take / return --

    /// Records a borrowing and opens the item's cell.
    ///
    /// If the cell fails to open the borrowing stays recorded and is handed
    /// back inside `FlowError::CellNotOpened`.
    pub async fn take_item(
        &self,
        user: &User,
        item: &Item,
        expected_return_at: DateTime<Utc>,
    ) -> Result<TakeReceipt, FlowError> {
        if item.status != ItemStatus::Available {
            return Err(FlowError::ItemUnavailable {
                item_id: item.id,
                status: item.status,
            });
        }
        if !self.access_list(item.id).await?.permits(user.id) {
            return Err(FlowError::AccessDenied { item_id: item.id });
        }
        if let Some(active) = self.active_borrowing_for(item.id).await? {
            return Err(FlowError::AlreadyBorrowed {
                item_id: item.id,
                borrowing_id: active.id,
            });
        }
        if !self.cells.can_command(item.cell_id) {
            return Err(FlowError::Cell(CellError::Busy {
                cell_id: item.cell_id,
            }));
        }

        let borrowing = self
            .api
            .create_borrowing(&NewBorrowing {
                user_id: user.id,
                item_id: item.id,
                expected_return_at,
                note: None,
            })
            .await?;
        info!(borrowing_id = borrowing.id, item_id = item.id, user_id = user.id, "Borrowing recorded");

        match self.cells.open(item.cell_id).await {
            Ok(pending) => Ok(TakeReceipt { borrowing, pending }),
            Err(source) => {
                warn!(borrowing_id = borrowing.id, cell_id = item.cell_id, "Cell did not open after borrowing: {}", source);
                Err(FlowError::CellNotOpened {
                    borrowing: Box::new(borrowing),
                    source,
                })
            }
        }
    }

    /// Opens the item's cell, then marks the borrowing returned.
    ///
    /// The cell is the one the item lives in now, falling back to the cell
    /// recorded on the borrowing. If the open fails nothing is recorded.
    pub async fn return_item(&self, borrowing: &Borrowing) -> Result<ReturnReceipt, FlowError> {
        let cell_id = match &borrowing.item {
            Some(item) => item.cell_id,
            None => match self.api.item(borrowing.item_id).await {
                Ok(item) => item.cell_id,
                Err(e) => {
                    warn!(item_id = borrowing.item_id, "Item lookup failed, using borrowing's cell: {}", e);
                    borrowing.cell_id
                }
            },
        };

        let pending = self.cells.open(cell_id).await?;

        match self.api.return_borrowing(borrowing.id).await {
            Ok(returned) => {
                info!(borrowing_id = returned.id, cell_id, "Borrowing returned");
                Ok(ReturnReceipt {
                    borrowing: returned,
                    pending,
                })
            }
            Err(source) => {
                warn!(borrowing_id = borrowing.id, "Cell opened but return was not recorded: {}", source);
                Err(FlowError::ReturnNotRecorded {
                    borrowing_id: borrowing.id,
                    source,
                })
            }
        }
    }
}
