use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use locker_client::{ApiClient, Auth, CellController, ClientConfig, Locker, Session};
use locker_store::Database;
use locker_types::api::RegisterRequest;

mod commands;

use commands::KioskCommand;

#[derive(Parser)]
#[command(name = "locker")]
#[command(about = "Smart locker kiosk: borrow and return items, drive cells", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and remember the session
    Login {
        username: String,
        #[arg(long, env = "LOCKER_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create an account and log in with it
    Register {
        username: String,
        #[arg(long, env = "LOCKER_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long, default_value = "")]
        full_name: String,
    },

    /// End the session
    Logout,

    /// Show the logged-in user
    Whoami,

    #[command(flatten)]
    Kiosk(KioskCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "locker_client=info,locker_kiosk=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;

    let store = Arc::new(Database::open(&config.session_db)?);
    let session = Session::restore(store)?;
    let api = ApiClient::from_config(&config, session)?;
    let auth = Auth::new(api.clone());
    let cells = CellController::new(api.clone(), config.cells.clone());
    let locker = Locker::new(api.clone(), cells);

    info!("Using backend at {}", api.base_url());

    match cli.command {
        Command::Login { username, password } => {
            let user = auth.login(&username, &password).await?;
            println!("Logged in as {} ({})", user.username, user.role.as_str());
        }
        Command::Register {
            username,
            password,
            full_name,
        } => {
            let user = auth
                .register(&RegisterRequest {
                    username,
                    password,
                    full_name,
                })
                .await?;
            println!("Registered and logged in as {}", user.username);
        }
        Command::Logout => {
            auth.logout().await?;
            println!("Logged out");
        }
        Command::Whoami => match auth.current_user() {
            Some(user) => println!("{} ({}, id {})", user.username, user.role.as_str(), user.id),
            None => println!("Not logged in"),
        },
        Command::Kiosk(command) => {
            let user = auth
                .current_user()
                .context("Not logged in. Run `locker login <username>` first.")?;
            let _listener = auth.spawn_logout_listener();
            commands::run(&locker, &user, command).await?;
        }
    }

    Ok(())
}
