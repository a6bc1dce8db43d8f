//! In-process stand-in for the locker backend.
//!
//! Serves the subset of routes the client uses, with knobs for token expiry,
//! refresh failure, hardware lag and injected errors.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::{Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use locker_client::{ApiClient, Auth, CellControlConfig, CellController, Locker, Session};
use locker_types::api::{AccessUpdate, LoginRequest, NewBorrowing, NewCell, RegisterRequest};
use locker_types::models::{
    Borrowing, Cell, CellId, CellStatus, Item, ItemId, ItemStatus, ItemUserAccess, Role, User,
    UserId,
};

pub const REFRESH_TOKEN: &str = "refresh-1";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

pub struct FakeBackend {
    pub url: String,
    fake: Arc<Fake>,
    server: JoinHandle<()>,
}

struct Fake {
    world: Mutex<World>,
    refresh_calls: AtomicUsize,
    requests: Mutex<Vec<Recorded>>,
}

struct World {
    valid_token: String,
    token_seq: u32,
    reject_all: bool,
    refresh_fails: bool,
    refresh_delay: Duration,
    hardware_lag: Duration,
    commands_fail: bool,
    returns_fail: bool,
    access_fails: HashSet<ItemId>,
    passwords: HashMap<String, String>,
    users: BTreeMap<UserId, User>,
    items: BTreeMap<ItemId, Item>,
    cells: BTreeMap<CellId, Cell>,
    access: HashMap<ItemId, Vec<UserId>>,
    borrowings: Vec<Borrowing>,
    next_id: i64,
}

fn user(id: UserId, username: &str, full_name: &str, role: Role) -> User {
    User {
        id,
        username: username.into(),
        full_name: full_name.into(),
        role,
        created_at: Some(Utc::now()),
        updated_at: None,
    }
}

fn cell(id: CellId, name: &str) -> Cell {
    Cell {
        id,
        name: name.into(),
        status: CellStatus::Closed,
        is_locked: None,
        last_open_at: None,
        last_close_at: None,
        created_at: Some(Utc::now()),
        updated_at: None,
    }
}

fn item(id: ItemId, name: &str, description: Option<&str>, cell_id: CellId, status: ItemStatus) -> Item {
    Item {
        id,
        name: name.into(),
        description: description.map(str::to_string),
        cell_id,
        status,
        created_at: Some(Utc::now()),
        updated_at: None,
    }
}

impl World {
    /// alice (1) is the admin; bob (5), carol (2) and dave (3) are users.
    /// Item 11 is restricted to carol and dave, item 13 to bob.
    /// Drill and Multimeter have a null description, as the backend allows.
    fn seeded() -> Self {
        let users = [
            user(1, "alice", "Alice Admin", Role::Admin),
            user(2, "carol", "Carol", Role::User),
            user(3, "dave", "Dave", Role::User),
            user(5, "bob", "Bob", Role::User),
        ];
        let items = [
            item(10, "Drill", None, 1, ItemStatus::Available),
            item(11, "Oscilloscope", Some("Bench scope"), 2, ItemStatus::Available),
            item(12, "Soldering iron", Some("Needs a new tip"), 1, ItemStatus::Maintenance),
            item(13, "Multimeter", None, 2, ItemStatus::Available),
        ];
        let cells = [cell(1, "Cell 1"), cell(2, "Cell 2"), cell(3, "Cell 3")];

        Self {
            valid_token: "access-1".into(),
            token_seq: 1,
            reject_all: false,
            refresh_fails: false,
            refresh_delay: Duration::ZERO,
            hardware_lag: Duration::ZERO,
            commands_fail: false,
            returns_fail: false,
            access_fails: HashSet::new(),
            passwords: users.iter().map(|u| (u.username.clone(), "pw".to_string())).collect(),
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            cells: cells.into_iter().map(|c| (c.id, c)).collect(),
            access: HashMap::from([(11, vec![2, 3]), (13, vec![5])]),
            borrowings: Vec::new(),
            next_id: 100,
        }
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn rotate_token(&mut self) -> String {
        self.token_seq += 1;
        self.valid_token = format!("access-{}", self.token_seq);
        self.valid_token.clone()
    }
}

impl FakeBackend {
    pub async fn start() -> Self {
        let fake = Arc::new(Fake {
            world: Mutex::new(World::seeded()),
            refresh_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let public = Router::new()
            .route("/login", post(login))
            .route("/register", post(register))
            .route("/refresh", post(refresh));

        let protected = Router::new()
            .route("/logout", post(logout))
            .route("/users", get(list_users))
            .route("/users/{id}", get(get_user))
            .route("/items", get(list_items))
            .route("/items/{id}", get(get_item))
            .route("/items/cell/{cell_id}", get(items_in_cell))
            .route("/items/{id}/access", get(get_access).put(put_access))
            .route("/cells", get(list_cells).post(create_cell))
            .route("/cells/{id}", get(get_cell))
            .route("/cells/{id}/open", post(open_cell))
            .route("/cells/{id}/close", post(close_cell))
            .route("/borrowings", get(list_borrowings).post(create_borrowing))
            .route("/borrowings/{id}", get(get_borrowing))
            .route("/borrowings/{id}/return", patch(return_borrowing))
            .route("/dashboard/stats", get(stats))
            .layer(middleware::from_fn_with_state(fake.clone(), require_token));

        let app = Router::new()
            .merge(public)
            .merge(protected)
            .layer(middleware::from_fn_with_state(fake.clone(), record))
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            fake,
            server,
        }
    }

    // -- Knobs --

    /// Invalidates every access token handed out so far.
    pub fn expire_access_token(&self) {
        self.fake.world.lock().rotate_token();
    }

    /// Every protected route answers 401, even for fresh tokens.
    pub fn reject_all_tokens(&self, reject: bool) {
        self.fake.world.lock().reject_all = reject;
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fake.world.lock().refresh_fails = fail;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.fake.world.lock().refresh_delay = delay;
    }

    /// Time between a command acknowledgement and the cell reporting its new state.
    pub fn set_hardware_lag(&self, lag: Duration) {
        self.fake.world.lock().hardware_lag = lag;
    }

    pub fn fail_commands(&self, fail: bool) {
        self.fake.world.lock().commands_fail = fail;
    }

    pub fn fail_returns(&self, fail: bool) {
        self.fake.world.lock().returns_fail = fail;
    }

    pub fn fail_access_for(&self, item_id: ItemId) {
        self.fake.world.lock().access_fails.insert(item_id);
    }

    pub fn remove_all_cells(&self) {
        self.fake.world.lock().cells.clear();
    }

    /// Changes a cell behind the client's back, as the hardware or another client would.
    pub fn set_cell_status(&self, cell_id: CellId, status: CellStatus) {
        if let Some(cell) = self.fake.world.lock().cells.get_mut(&cell_id) {
            cell.status = status;
        }
    }

    // -- Inspection --

    pub fn refresh_calls(&self) -> usize {
        self.fake.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.fake.requests.lock().clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.fake.requests.lock().clear();
    }

    pub fn cell_status(&self, cell_id: CellId) -> Option<CellStatus> {
        self.fake.world.lock().cells.get(&cell_id).map(|c| c.status)
    }

    pub fn borrowings(&self) -> Vec<Borrowing> {
        self.fake.world.lock().borrowings.clone()
    }

    pub fn access_for(&self, item_id: ItemId) -> Vec<UserId> {
        self.fake.world.lock().access.get(&item_id).cloned().unwrap_or_default()
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// -- Client helpers --

pub fn fast_cells() -> CellControlConfig {
    CellControlConfig {
        settle_delay: Duration::from_millis(50),
        poll_interval: Duration::from_secs(60),
        cell_count: 2,
    }
}

pub fn client(backend: &FakeBackend, session: Session) -> ApiClient {
    ApiClient::new(backend.url.clone(), Duration::from_secs(5), session).unwrap()
}

/// An API client already logged in as alice.
pub async fn admin_client(backend: &FakeBackend) -> (ApiClient, Auth) {
    let api = client(backend, Session::ephemeral());
    let auth = Auth::new(api.clone());
    auth.login("alice", "pw").await.unwrap();
    (api, auth)
}

pub async fn locker(backend: &FakeBackend, cells: CellControlConfig) -> Locker {
    let (api, _auth) = admin_client(backend).await;
    let controller = CellController::new(api.clone(), cells);
    Locker::new(api, controller)
}

// -- Middleware --

async fn record(State(fake): State<Arc<Fake>>, req: Request, next: Next) -> Response {
    let recorded = {
        let header_value = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Recorded {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            authorization: header_value(header::AUTHORIZATION),
            content_type: header_value(header::CONTENT_TYPE),
        }
    };
    fake.requests.lock().push(recorded);
    next.run(req).await
}

async fn require_token(State(fake): State<Arc<Fake>>, req: Request, next: Next) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let accepted = {
        let world = fake.world.lock();
        !world.reject_all && presented.as_deref() == Some(world.valid_token.as_str())
    };
    if !accepted {
        return reply(StatusCode::UNAUTHORIZED, json!({ "msg": "Token has expired" }));
    }
    next.run(req).await
}

fn reply(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

fn ok<T: serde::Serialize>(value: &T) -> Response {
    Json(json!(value)).into_response()
}

fn not_found(what: &str) -> Response {
    reply(StatusCode::NOT_FOUND, json!({ "message": format!("{} not found", what) }))
}

// -- Auth --

async fn login(State(fake): State<Arc<Fake>>, Json(req): Json<LoginRequest>) -> Response {
    let world = fake.world.lock();
    let user = world
        .users
        .values()
        .find(|u| u.username == req.username)
        .filter(|_| world.passwords.get(&req.username) == Some(&req.password));

    match user {
        Some(user) => ok(&json!({
            "id": user.id,
            "username": user.username,
            "full_name": user.full_name,
            "role": user.role,
            "access_token": world.valid_token,
            "refresh_token": REFRESH_TOKEN,
        })),
        None => reply(StatusCode::UNAUTHORIZED, json!({ "error": "Invalid credentials" })),
    }
}

async fn register(State(fake): State<Arc<Fake>>, Json(req): Json<RegisterRequest>) -> Response {
    let mut world = fake.world.lock();
    if world.passwords.contains_key(&req.username) {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "Username already exists" }));
    }
    let id = world.next_id();
    let created = user(id, &req.username, &req.full_name, Role::User);
    world.passwords.insert(req.username.clone(), req.password.clone());
    world.users.insert(id, created.clone());
    (StatusCode::CREATED, Json(json!(created))).into_response()
}

async fn refresh(State(fake): State<Arc<Fake>>, req: Request) -> Response {
    fake.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let (delay, fails) = {
        let world = fake.world.lock();
        (world.refresh_delay, world.refresh_fails)
    };
    tokio::time::sleep(delay).await;

    if fails || presented.as_deref() != Some(&format!("Bearer {}", REFRESH_TOKEN)) {
        return reply(StatusCode::UNAUTHORIZED, json!({ "msg": "Token has been revoked" }));
    }
    let token = fake.world.lock().rotate_token();
    ok(&json!({ "access_token": token }))
}

async fn logout() -> Response {
    ok(&json!({ "message": "Successfully logged out" }))
}

// -- Users --

async fn list_users(State(fake): State<Arc<Fake>>) -> Response {
    let users: Vec<User> = fake.world.lock().users.values().cloned().collect();
    ok(&users)
}

async fn get_user(State(fake): State<Arc<Fake>>, Path(id): Path<UserId>) -> Response {
    match fake.world.lock().users.get(&id) {
        Some(user) => ok(user),
        None => not_found("User"),
    }
}

// -- Items --

async fn list_items(State(fake): State<Arc<Fake>>) -> Response {
    let items: Vec<Item> = fake.world.lock().items.values().cloned().collect();
    ok(&items)
}

async fn get_item(State(fake): State<Arc<Fake>>, Path(id): Path<ItemId>) -> Response {
    match fake.world.lock().items.get(&id) {
        Some(item) => ok(item),
        None => not_found("Item"),
    }
}

async fn items_in_cell(State(fake): State<Arc<Fake>>, Path(cell_id): Path<CellId>) -> Response {
    let items: Vec<Item> = fake
        .world
        .lock()
        .items
        .values()
        .filter(|i| i.cell_id == cell_id)
        .cloned()
        .collect();
    ok(&items)
}

async fn get_access(State(fake): State<Arc<Fake>>, Path(id): Path<ItemId>) -> Response {
    let world = fake.world.lock();
    if world.access_fails.contains(&id) {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Database error" }));
    }
    if !world.items.contains_key(&id) {
        return not_found("Item");
    }
    let grants: Vec<ItemUserAccess> = world
        .access
        .get(&id)
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(n, uid)| ItemUserAccess {
            id: id * 100 + n as i64,
            item_id: id,
            user_id: *uid,
            granted_at: Some(Utc::now()),
            user: world.users.get(uid).cloned(),
        })
        .collect();
    ok(&grants)
}

async fn put_access(
    State(fake): State<Arc<Fake>>,
    Path(id): Path<ItemId>,
    Json(update): Json<AccessUpdate>,
) -> Response {
    let mut world = fake.world.lock();
    if !world.items.contains_key(&id) {
        return not_found("Item");
    }
    world.access.insert(id, update.user_ids);
    ok(&json!({ "message": "Access updated" }))
}

// -- Cells --

async fn list_cells(State(fake): State<Arc<Fake>>) -> Response {
    let cells: Vec<Cell> = fake.world.lock().cells.values().cloned().collect();
    ok(&cells)
}

async fn get_cell(State(fake): State<Arc<Fake>>, Path(id): Path<CellId>) -> Response {
    match fake.world.lock().cells.get(&id) {
        Some(cell) => ok(cell),
        None => not_found("Cell"),
    }
}

async fn create_cell(State(fake): State<Arc<Fake>>, Json(new): Json<NewCell>) -> Response {
    let mut world = fake.world.lock();
    let id = world.next_id();
    let mut created = cell(id, &new.name);
    if let Some(status) = new.status {
        created.status = status;
    }
    world.cells.insert(id, created.clone());
    (StatusCode::CREATED, Json(json!(created))).into_response()
}

async fn open_cell(State(fake): State<Arc<Fake>>, Path(id): Path<CellId>, Json(body): Json<Value>) -> Response {
    actuate(fake, id, CellStatus::Open, body)
}

async fn close_cell(State(fake): State<Arc<Fake>>, Path(id): Path<CellId>, Json(body): Json<Value>) -> Response {
    actuate(fake, id, CellStatus::Closed, body)
}

/// Acknowledges at once; the cell changes state after the configured lag.
fn actuate(fake: Arc<Fake>, id: CellId, target: CellStatus, body: Value) -> Response {
    let (name, lag) = {
        let world = fake.world.lock();
        if world.commands_fail {
            return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Failed to publish command" }));
        }
        match world.cells.get(&id) {
            Some(cell) => (cell.name.clone(), world.hardware_lag),
            None => return not_found("Cell"),
        }
    };

    let action = body.get("action").and_then(Value::as_str).unwrap_or_default().to_string();
    tokio::spawn(async move {
        tokio::time::sleep(lag).await;
        if let Some(cell) = fake.world.lock().cells.get_mut(&id) {
            cell.status = target;
            match target {
                CellStatus::Open => cell.last_open_at = Some(Utc::now()),
                CellStatus::Closed => cell.last_close_at = Some(Utc::now()),
            }
        }
    });

    ok(&json!({ "message": format!("{} command sent to {}", action, name) }))
}

// -- Borrowings --

async fn list_borrowings(State(fake): State<Arc<Fake>>) -> Response {
    ok(&fake.world.lock().borrowings)
}

async fn get_borrowing(State(fake): State<Arc<Fake>>, Path(id): Path<i64>) -> Response {
    match fake.world.lock().borrowings.iter().find(|b| b.id == id) {
        Some(borrowing) => ok(borrowing),
        None => not_found("Borrowing"),
    }
}

async fn create_borrowing(State(fake): State<Arc<Fake>>, Json(new): Json<NewBorrowing>) -> Response {
    let mut world = fake.world.lock();
    let Some(item) = world.items.get(&new.item_id).cloned() else {
        return not_found("Item");
    };
    if world.borrowings.iter().any(|b| b.item_id == item.id && b.is_active()) {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "Item is already borrowed" }));
    }

    let id = world.next_id();
    let borrowing = Borrowing {
        id,
        user_id: new.user_id,
        item_id: item.id,
        cell_id: item.cell_id,
        borrowed_at: Utc::now(),
        expected_return_at: new.expected_return_at,
        returned_at: None,
        user: world.users.get(&new.user_id).cloned(),
        item: Some(item.clone()),
        cell: world.cells.get(&item.cell_id).cloned(),
    };
    world.borrowings.push(borrowing.clone());
    if let Some(stored) = world.items.get_mut(&item.id) {
        stored.status = ItemStatus::Borrowed;
    }
    (StatusCode::CREATED, Json(json!(borrowing))).into_response()
}

async fn return_borrowing(State(fake): State<Arc<Fake>>, Path(id): Path<i64>) -> Response {
    let mut world = fake.world.lock();
    if world.returns_fail {
        return reply(StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Database error" }));
    }
    let Some(pos) = world.borrowings.iter().position(|b| b.id == id) else {
        return not_found("Borrowing");
    };
    if !world.borrowings[pos].is_active() {
        return reply(StatusCode::BAD_REQUEST, json!({ "error": "Item already returned" }));
    }

    world.borrowings[pos].returned_at = Some(Utc::now());
    let returned = world.borrowings[pos].clone();
    if let Some(item) = world.items.get_mut(&returned.item_id) {
        item.status = ItemStatus::Available;
    }
    ok(&returned)
}

async fn stats(State(fake): State<Arc<Fake>>) -> Response {
    let world = fake.world.lock();
    ok(&json!({
        "total_users": world.users.len(),
        "total_items": world.items.len(),
        "total_cells": world.cells.len(),
        "available_items": world.items.values().filter(|i| i.status == ItemStatus::Available).count(),
        "active_borrowings": world.borrowings.iter().filter(|b| b.is_active()).count(),
        "recent_activities": [],
    }))
}
