//! Cell operation controller.
//!
//! The backend acknowledges an open/close as soon as it has published the
//! command to the locker. The hardware reports back later, so every command
//! walks the per-cell state machine
//!
//! ```text
//! Idle -> CommandPending -> AwaitingPhysicalState -> Idle
//!              |                                      ^
//!              +------------- command failed ---------+
//! ```
//!
//! The cell stays busy until the delayed re-fetch lands. Further commands on
//! a busy cell are rejected.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use locker_types::api::{MessageResponse, NewCell};
use locker_types::events::{CellCommand, CellPhase, CellUpdate};
use locker_types::models::{Cell, CellId, CellStatus};

use crate::TaskHandle;
use crate::api::ApiClient;
use crate::config::CellControlConfig;
use crate::error::{ApiError, CellError};

#[derive(Clone)]
pub struct CellController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    api: ApiClient,
    config: CellControlConfig,
    cells: RwLock<BTreeMap<CellId, Cell>>,
    phases: Mutex<HashMap<CellId, CellPhase>>,
    updates: broadcast::Sender<CellUpdate>,
}

/// A cell as a front end should render it.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub cell: Cell,
    pub phase: CellPhase,
}

impl CellView {
    /// Whether the open/close actions should be enabled.
    pub fn actionable(&self) -> bool {
        !self.phase.is_busy()
    }
}

/// An acknowledged command whose physical outcome is still outstanding.
#[derive(Debug)]
pub struct PendingCommand {
    cell_id: CellId,
    command: CellCommand,
    ack: MessageResponse,
    settle: JoinHandle<Option<Cell>>,
}

impl PendingCommand {
    pub fn cell_id(&self) -> CellId {
        self.cell_id
    }

    pub fn command(&self) -> CellCommand {
        self.command
    }

    /// Backend acknowledgement text.
    pub fn message(&self) -> &str {
        &self.ack.message
    }

    /// Waits for the delayed re-fetch. `None` when it failed or was aborted.
    ///
    /// The returned cell is the latest known state, which may still show the
    /// old status if the hardware has not reported yet.
    pub async fn settled(self) -> Option<Cell> {
        self.settle.await.ok().flatten()
    }

    /// Stops waiting for the hardware. The cell returns to `Idle` immediately.
    pub fn abort(&self) {
        self.settle.abort();
    }
}

impl CellController {
    pub fn new(api: ApiClient, config: CellControlConfig) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(ControllerInner {
                api,
                config,
                cells: RwLock::new(BTreeMap::new()),
                phases: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CellUpdate> {
        self.inner.updates.subscribe()
    }

    pub fn phase(&self, cell_id: CellId) -> CellPhase {
        self.inner.phase(cell_id)
    }

    pub fn can_command(&self, cell_id: CellId) -> bool {
        !self.phase(cell_id).is_busy()
    }

    /// Last known cells, ordered by id.
    pub fn cells(&self) -> Vec<Cell> {
        self.inner.cells.read().values().cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<CellView> {
        let cells = self.inner.cells.read();
        let phases = self.inner.phases.lock();
        cells
            .values()
            .map(|cell| CellView {
                cell: cell.clone(),
                phase: phases.get(&cell.id).copied().unwrap_or_default(),
            })
            .collect()
    }

    /// Initial load. Seeds the default cells into an empty locker.
    pub async fn load_cells(&self) -> Result<Vec<Cell>, ApiError> {
        let mut cells = self.inner.api.cells().await?;

        if cells.is_empty() && self.inner.config.cell_count > 0 {
            info!(count = self.inner.config.cell_count, "No cells found, seeding defaults");
            for n in 1..=self.inner.config.cell_count {
                let seed = NewCell {
                    name: format!("Cell {}", n),
                    status: Some(CellStatus::Closed),
                };
                if let Err(e) = self.inner.api.create_cell(&seed).await {
                    warn!("Could not create {}: {}", seed.name, e);
                }
            }
            cells = self.inner.api.cells().await?;
        }

        Ok(self.inner.replace_all(cells))
    }

    /// Re-polls every cell.
    pub async fn refresh_all(&self) -> Result<Vec<Cell>, ApiError> {
        let cells = self.inner.api.cells().await?;
        Ok(self.inner.replace_all(cells))
    }

    pub async fn refresh_cell(&self, cell_id: CellId) -> Result<Cell, ApiError> {
        self.inner.fetch_cell(cell_id).await
    }

    pub async fn open(&self, cell_id: CellId) -> Result<PendingCommand, CellError> {
        self.command(cell_id, CellCommand::Open).await
    }

    pub async fn close(&self, cell_id: CellId) -> Result<PendingCommand, CellError> {
        self.command(cell_id, CellCommand::Close).await
    }

    /// Sends a command and schedules the delayed re-fetch.
    ///
    /// Rejected with `CellError::Busy` while the cell has a command in flight.
    /// A failed command puts the cell back to `Idle` and is not retried.
    pub async fn command(
        &self,
        cell_id: CellId,
        command: CellCommand,
    ) -> Result<PendingCommand, CellError> {
        let guard = BusyGuard::acquire(&self.inner, cell_id, command)?;

        let ack = match self.inner.api.cell_command(cell_id, command).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(cell_id, command = command.as_str(), "Cell command failed: {}", e);
                return Err(CellError::Api(e));
            }
        };
        info!(cell_id, command = command.as_str(), "Cell command acknowledged");

        guard.advance(CellPhase::AwaitingPhysicalState(command));

        let inner = self.inner.clone();
        let settle = tokio::spawn(async move {
            let _guard = guard;
            tokio::time::sleep(inner.config.settle_delay).await;

            match inner.fetch_cell(cell_id).await {
                Ok(cell) => {
                    if cell.status != expected_status(command) {
                        debug!(cell_id, status = ?cell.status, "Hardware has not reported the change yet");
                    }
                    Some(cell)
                }
                Err(e) => {
                    warn!(cell_id, "Re-fetch after command failed: {}", e);
                    None
                }
            }
        });

        Ok(PendingCommand {
            cell_id,
            command,
            ack,
            settle,
        })
    }

    /// Reconciles state changed by hand, by other clients, or by the hardware itself.
    ///
    /// The first poll happens one interval from now. Dropping the handle stops polling.
    pub fn spawn_background_refresh(&self) -> TaskHandle {
        let controller = self.clone();
        let period = self.inner.config.poll_interval;

        TaskHandle::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = controller.refresh_all().await {
                    warn!("Background cell refresh failed: {}", e);
                }
            }
        })
    }
}

impl ControllerInner {
    fn phase(&self, cell_id: CellId) -> CellPhase {
        self.phases.lock().get(&cell_id).copied().unwrap_or_default()
    }

    fn set_phase(&self, cell_id: CellId, phase: CellPhase) {
        {
            let mut phases = self.phases.lock();
            if phase.is_busy() {
                phases.insert(cell_id, phase);
            } else {
                phases.remove(&cell_id);
            }
        }
        let _ = self.updates.send(CellUpdate::PhaseChanged { cell_id, phase });
    }

    async fn fetch_cell(&self, cell_id: CellId) -> Result<Cell, ApiError> {
        let cell = self.api.cell(cell_id).await?;
        self.store(cell.clone());
        Ok(cell)
    }

    fn store(&self, cell: Cell) {
        self.cells.write().insert(cell.id, cell.clone());
        let _ = self.updates.send(CellUpdate::Refreshed(cell));
    }

    /// Keeps the first `cell_count` cells by id and drops anything no longer reported.
    fn replace_all(&self, mut cells: Vec<Cell>) -> Vec<Cell> {
        cells.sort_by_key(|c| c.id);
        if self.config.cell_count > 0 {
            cells.truncate(self.config.cell_count);
        }

        *self.cells.write() = cells.iter().map(|c| (c.id, c.clone())).collect();
        for cell in &cells {
            let _ = self.updates.send(CellUpdate::Refreshed(cell.clone()));
        }
        cells
    }
}

fn expected_status(command: CellCommand) -> CellStatus {
    match command {
        CellCommand::Open => CellStatus::Open,
        CellCommand::Close => CellStatus::Closed,
    }
}

/// Per-cell busy flag. The cell returns to `Idle` when the guard drops,
/// including when the settle task is aborted.
struct BusyGuard {
    inner: Arc<ControllerInner>,
    cell_id: CellId,
}

impl BusyGuard {
    fn acquire(
        inner: &Arc<ControllerInner>,
        cell_id: CellId,
        command: CellCommand,
    ) -> Result<Self, CellError> {
        let phase = CellPhase::CommandPending(command);
        {
            let mut phases = inner.phases.lock();
            if phases.get(&cell_id).is_some_and(CellPhase::is_busy) {
                debug!(cell_id, command = command.as_str(), "Rejecting command on busy cell");
                return Err(CellError::Busy { cell_id });
            }
            phases.insert(cell_id, phase);
        }
        let _ = inner.updates.send(CellUpdate::PhaseChanged { cell_id, phase });

        Ok(Self {
            inner: inner.clone(),
            cell_id,
        })
    }

    fn advance(&self, phase: CellPhase) {
        self.inner.set_phase(self.cell_id, phase);
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.inner.set_phase(self.cell_id, CellPhase::Idle);
    }
}
