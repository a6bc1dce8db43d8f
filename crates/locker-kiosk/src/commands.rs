//! Kiosk commands. Each one needs a logged-in user.

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Subcommand;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use locker_client::{CellView, FlowError, Locker};
use locker_types::events::{CellPhase, CellUpdate};
use locker_types::models::{Cell, CellId, ItemId, User, UserId};

#[derive(Subcommand)]
pub enum KioskCommand {
    /// List cells with their operation phase
    Cells,

    /// Open a cell and wait for the hardware to report back
    Open { cell: CellId },

    /// Close a cell and wait for the hardware to report back
    Close { cell: CellId },

    /// Follow cell state until interrupted
    Watch,

    /// Items you can borrow
    Items {
        /// List every item, ignoring allow-lists and availability
        #[arg(long)]
        all: bool,
    },

    /// Borrow an item and open its cell
    Take {
        item: ItemId,
        /// Days until the item is due back
        #[arg(long, default_value = "7")]
        days: i64,
    },

    /// Open the cell and mark a borrowing returned
    Return { borrowing: i64 },

    /// Your active borrowings
    Borrowings {
        /// Every borrowing, returned ones included
        #[arg(long)]
        all: bool,
    },

    /// Cell event history
    Events {
        #[arg(long)]
        cell: Option<CellId>,
    },

    /// Dashboard counters
    Stats,

    /// Item allow-lists
    #[command(subcommand)]
    Access(AccessCommand),

    /// List users
    Users,
}

#[derive(Subcommand)]
pub enum AccessCommand {
    /// Show who may borrow an item
    Get { item: ItemId },
    /// Allow a user to borrow an item
    Grant { item: ItemId, user: UserId },
    /// Remove a user from an item's allow-list
    Revoke { item: ItemId, user: UserId },
}

pub async fn run(locker: &Locker, user: &User, command: KioskCommand) -> Result<()> {
    match command {
        KioskCommand::Cells => cells(locker).await,
        KioskCommand::Open { cell } => actuate(locker, cell, true).await,
        KioskCommand::Close { cell } => actuate(locker, cell, false).await,
        KioskCommand::Watch => watch(locker).await,
        KioskCommand::Items { all } => items(locker, user, all).await,
        KioskCommand::Take { item, days } => take(locker, user, item, days).await,
        KioskCommand::Return { borrowing } => return_item(locker, borrowing).await,
        KioskCommand::Borrowings { all } => borrowings(locker, user, all).await,
        KioskCommand::Events { cell } => events(locker, cell).await,
        KioskCommand::Stats => stats(locker).await,
        KioskCommand::Access(cmd) => access(locker, cmd).await,
        KioskCommand::Users => users(locker).await,
    }
}

fn phase_label(phase: CellPhase) -> String {
    match phase {
        CellPhase::Idle => "idle".into(),
        CellPhase::CommandPending(cmd) => format!("sending {}", cmd.as_str()),
        CellPhase::AwaitingPhysicalState(cmd) => format!("waiting for {}", cmd.as_str()),
    }
}

fn print_cell(cell: &Cell, phase: CellPhase) {
    println!(
        "{:>4}  {:<16} {:<7} {}",
        cell.id,
        cell.name,
        format!("{:?}", cell.status).to_lowercase(),
        phase_label(phase)
    );
}

async fn cells(locker: &Locker) -> Result<()> {
    locker.cells().load_cells().await?;
    for CellView { cell, phase } in locker.cells().snapshot() {
        print_cell(&cell, phase);
    }
    Ok(())
}

async fn actuate(locker: &Locker, cell_id: CellId, open: bool) -> Result<()> {
    let pending = if open {
        locker.cells().open(cell_id).await?
    } else {
        locker.cells().close(cell_id).await?
    };
    println!("{}", pending.message());

    match pending.settled().await {
        Some(cell) => print_cell(&cell, CellPhase::Idle),
        None => warn!(cell_id, "Cell state could not be confirmed"),
    }
    Ok(())
}

async fn watch(locker: &Locker) -> Result<()> {
    let mut updates = locker.cells().subscribe();
    cells(locker).await?;
    let _poller = locker.cells().spawn_background_refresh();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(CellUpdate::Refreshed(cell)) => {
                    print_cell(&cell, locker.cells().phase(cell.id));
                }
                Ok(CellUpdate::PhaseChanged { cell_id, phase }) => {
                    println!("{:>4}  {}", cell_id, phase_label(phase));
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "Dropped cell updates"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn items(locker: &Locker, user: &User, all: bool) -> Result<()> {
    let items = if all {
        locker.api().items().await?
    } else {
        locker.borrowable_items(user).await?
    };
    for item in items {
        println!(
            "{:>4}  {:<24} cell {:<3} {:<12} {}",
            item.id,
            item.name,
            item.cell_id,
            format!("{:?}", item.status).to_lowercase(),
            item.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn take(locker: &Locker, user: &User, item_id: ItemId, days: i64) -> Result<()> {
    let item = locker.api().item(item_id).await?;
    let due = Utc::now() + Duration::days(days);

    match locker.take_item(user, &item, due).await {
        Ok(receipt) => {
            println!(
                "Borrowed {} (borrowing {}), due {}",
                item.name,
                receipt.borrowing.id,
                due.format("%Y-%m-%d")
            );
            receipt.pending.settled().await;
            Ok(())
        }
        Err(FlowError::CellNotOpened { borrowing, source }) => {
            println!(
                "Borrowing {} is recorded but cell {} did not open. Ask an administrator.",
                borrowing.id, item.cell_id
            );
            Err(source.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn return_item(locker: &Locker, borrowing_id: i64) -> Result<()> {
    let borrowing = locker.api().borrowing(borrowing_id).await?;
    if !borrowing.is_active() {
        anyhow::bail!("Borrowing {} was already returned", borrowing_id);
    }

    let receipt = locker.return_item(&borrowing).await?;
    println!("Returned borrowing {}", receipt.borrowing.id);
    receipt.pending.settled().await;
    Ok(())
}

async fn borrowings(locker: &Locker, user: &User, all: bool) -> Result<()> {
    let borrowings = if all {
        locker.api().borrowings().await?
    } else {
        locker.my_active_borrowings(user).await?
    };
    for b in borrowings {
        let name = b.item.as_ref().map(|i| i.name.as_str()).unwrap_or("?");
        let state = match b.returned_at {
            Some(at) => format!("returned {}", at.format("%Y-%m-%d %H:%M")),
            None => format!("due {}", b.expected_return_at.format("%Y-%m-%d")),
        };
        println!("{:>5}  {:<24} user {:<4} {}", b.id, name, b.user_id, state);
    }
    Ok(())
}

async fn events(locker: &Locker, cell: Option<CellId>) -> Result<()> {
    let events = match cell {
        Some(id) => locker.api().events_for_cell(id).await?,
        None => locker.api().cell_events().await?,
    };
    for event in events {
        println!(
            "{}  cell {:<3} {:<10} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.cell_id,
            format!("{:?}", event.event_type).to_lowercase(),
            event
                .user_id
                .map(|id| format!("user {}", id))
                .unwrap_or_default()
        );
    }
    Ok(())
}

async fn stats(locker: &Locker) -> Result<()> {
    let stats = locker.api().dashboard_stats().await?;
    println!("users              {}", stats.total_users);
    println!("items              {}", stats.total_items);
    println!("cells              {}", stats.total_cells);
    println!("available items    {}", stats.available_items);
    println!("active borrowings  {}", stats.active_borrowings);
    Ok(())
}

async fn access(locker: &Locker, command: AccessCommand) -> Result<()> {
    match command {
        AccessCommand::Get { item } => {
            let entries = locker.api().item_access(item).await?;
            if entries.is_empty() {
                println!("Item {} is open to everyone", item);
            } else {
                println!("Item {} is restricted to:", item);
                for entry in &entries {
                    let name = entry.user().map(|u| u.username.as_str()).unwrap_or("?");
                    println!("{:>4}  {}", entry.user_id(), name);
                }
            }
        }
        AccessCommand::Grant { item, user } => {
            let changed = locker
                .grant_access(item, user)
                .await
                .with_context(|| format!("Failed to grant access to item {}", item))?;
            if !changed {
                println!("User {} already had access to item {}", user, item);
            }
        }
        AccessCommand::Revoke { item, user } => {
            let changed = locker
                .revoke_access(item, user)
                .await
                .with_context(|| format!("Failed to revoke access to item {}", item))?;
            if !changed {
                println!("User {} was not on item {}'s list", user, item);
            }
        }
    }
    Ok(())
}

async fn users(locker: &Locker) -> Result<()> {
    for user in locker.api().users().await? {
        println!(
            "{:>4}  {:<16} {:<24} {}",
            user.id,
            user.username,
            user.full_name,
            user.role.as_str()
        );
    }
    Ok(())
}
