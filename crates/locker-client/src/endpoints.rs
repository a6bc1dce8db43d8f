//! One method per backend resource.

use reqwest::Method;
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};

use locker_types::api::{
    AccessUpdate, CellPatch, DashboardStats, ItemPatch, LoginRequest, LoginResponse,
    MessageResponse, NewBorrowing, NewCell, NewItem, NewUser, RegisterRequest, UserPatch,
};
use locker_types::events::CellCommand;
use locker_types::models::{
    AccessEntry, Borrowing, BorrowingId, Cell, CellEvent, CellEventId, CellId, Item, ItemId, User,
    UserId,
};

use crate::api::{ApiClient, RetryPolicy};
use crate::error::ApiError;

use RetryPolicy::{RefreshOnUnauthorized, Surface};

fn to_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(ApiError::Json)
}

impl ApiClient {
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, RefreshOnUnauthorized).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let body = to_body(body)?;
        self.request(method, path, Some(body), RefreshOnUnauthorized).await
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<(), ApiError> {
        self.request::<IgnoredAny>(method, path, None, RefreshOnUnauthorized)
            .await
            .map(|_| ())
    }

    // -- Auth --

    /// Never refreshes: a 401 here means bad credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let body = to_body(&LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        self.request(Method::POST, "/login", Some(body), Surface).await
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ApiError> {
        let body = to_body(req)?;
        self.request(Method::POST, "/register", Some(body), Surface).await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        self.request::<IgnoredAny>(Method::POST, "/logout", None, Surface)
            .await
            .map(|_| ())
    }

    // -- Users --

    pub async fn users(&self) -> Result<Vec<User>, ApiError> {
        self.get("/users").await
    }

    pub async fn user(&self, id: UserId) -> Result<User, ApiError> {
        self.get(&format!("/users/{}", id)).await
    }

    pub async fn create_user(&self, user: &NewUser) -> Result<User, ApiError> {
        self.send_json(Method::POST, "/users", user).await
    }

    pub async fn update_user(&self, id: UserId, patch: &UserPatch) -> Result<User, ApiError> {
        self.send_json(Method::PATCH, &format!("/users/{}", id), patch).await
    }

    pub async fn delete_user(&self, id: UserId) -> Result<(), ApiError> {
        self.send_empty(Method::DELETE, &format!("/users/{}", id)).await
    }

    // -- Items --

    pub async fn items(&self) -> Result<Vec<Item>, ApiError> {
        self.get("/items").await
    }

    pub async fn item(&self, id: ItemId) -> Result<Item, ApiError> {
        self.get(&format!("/items/{}", id)).await
    }

    pub async fn items_in_cell(&self, cell_id: CellId) -> Result<Vec<Item>, ApiError> {
        self.get(&format!("/items/cell/{}", cell_id)).await
    }

    pub async fn create_item(&self, item: &NewItem) -> Result<Item, ApiError> {
        self.send_json(Method::POST, "/items", item).await
    }

    pub async fn update_item(&self, id: ItemId, patch: &ItemPatch) -> Result<Item, ApiError> {
        self.send_json(Method::PATCH, &format!("/items/{}", id), patch).await
    }

    pub async fn delete_item(&self, id: ItemId) -> Result<(), ApiError> {
        self.send_empty(Method::DELETE, &format!("/items/{}", id)).await
    }

    /// Users allowed to borrow the item. Empty means everyone.
    pub async fn item_access(&self, id: ItemId) -> Result<Vec<AccessEntry>, ApiError> {
        self.get(&format!("/items/{}/access", id)).await
    }

    /// Replaces the item's allow-list.
    pub async fn set_item_access(&self, id: ItemId, user_ids: &[UserId]) -> Result<(), ApiError> {
        let body = to_body(&AccessUpdate {
            user_ids: user_ids.to_vec(),
        })?;
        self.request::<IgnoredAny>(
            Method::PUT,
            &format!("/items/{}/access", id),
            Some(body),
            RefreshOnUnauthorized,
        )
        .await
        .map(|_| ())
    }

    // -- Cells --

    pub async fn cells(&self) -> Result<Vec<Cell>, ApiError> {
        self.get("/cells").await
    }

    pub async fn cell(&self, id: CellId) -> Result<Cell, ApiError> {
        self.get(&format!("/cells/{}", id)).await
    }

    pub async fn create_cell(&self, cell: &NewCell) -> Result<Cell, ApiError> {
        self.send_json(Method::POST, "/cells", cell).await
    }

    pub async fn update_cell(&self, id: CellId, patch: &CellPatch) -> Result<Cell, ApiError> {
        self.send_json(Method::PATCH, &format!("/cells/{}", id), patch).await
    }

    pub async fn delete_cell(&self, id: CellId) -> Result<(), ApiError> {
        self.send_empty(Method::DELETE, &format!("/cells/{}", id)).await
    }

    /// Asks the backend to actuate a cell.
    ///
    /// The acknowledgement only means the command was published to the
    /// locker. The cell's reported state changes later.
    pub async fn cell_command(
        &self,
        id: CellId,
        command: CellCommand,
    ) -> Result<MessageResponse, ApiError> {
        self.send_json(
            Method::POST,
            &format!("/cells/{}/{}", id, command.as_str()),
            &json!({ "action": command.as_str() }),
        )
        .await
    }

    pub async fn open_cell(&self, id: CellId) -> Result<MessageResponse, ApiError> {
        self.cell_command(id, CellCommand::Open).await
    }

    pub async fn close_cell(&self, id: CellId) -> Result<MessageResponse, ApiError> {
        self.cell_command(id, CellCommand::Close).await
    }

    // -- Borrowings --

    pub async fn borrowings(&self) -> Result<Vec<Borrowing>, ApiError> {
        self.get("/borrowings").await
    }

    pub async fn borrowing(&self, id: BorrowingId) -> Result<Borrowing, ApiError> {
        self.get(&format!("/borrowings/{}", id)).await
    }

    pub async fn create_borrowing(&self, borrowing: &NewBorrowing) -> Result<Borrowing, ApiError> {
        self.send_json(Method::POST, "/borrowings", borrowing).await
    }

    /// Rejected by the backend when the borrowing is already closed.
    pub async fn return_borrowing(&self, id: BorrowingId) -> Result<Borrowing, ApiError> {
        self.request(
            Method::PATCH,
            &format!("/borrowings/{}/return", id),
            None,
            RefreshOnUnauthorized,
        )
        .await
    }

    pub async fn my_active_borrowings(&self, user_id: UserId) -> Result<Vec<Borrowing>, ApiError> {
        let all = self.borrowings().await?;
        Ok(all
            .into_iter()
            .filter(|b| b.user_id == user_id && b.is_active())
            .collect())
    }

    // -- Cell events --

    pub async fn cell_events(&self) -> Result<Vec<CellEvent>, ApiError> {
        self.get("/cell-events").await
    }

    pub async fn cell_event(&self, id: CellEventId) -> Result<CellEvent, ApiError> {
        self.get(&format!("/cell-events/{}", id)).await
    }

    pub async fn events_for_cell(&self, cell_id: CellId) -> Result<Vec<CellEvent>, ApiError> {
        self.get(&format!("/cells/{}/events", cell_id)).await
    }

    // -- Dashboard --

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, ApiError> {
        self.get("/dashboard/stats").await
    }
}
