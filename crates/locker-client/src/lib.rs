//! Client for the smart-locker backend.
//!
//! [`ApiClient`] talks HTTP and keeps the session alive through a
//! single-flight token refresh. [`Auth`] owns login state, [`CellController`]
//! drives the open/close state machine, and [`Locker`] composes them into the
//! take/return flows.

pub mod api;
pub mod auth;
pub mod cells;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod locker;
mod refresh;
pub mod session;

use std::future::Future;

use tokio::task::JoinHandle;

pub use api::{ApiClient, RetryPolicy};
pub use auth::Auth;
pub use cells::{CellController, CellView, PendingCommand};
pub use config::{CellControlConfig, ClientConfig};
pub use error::{ApiError, CellError, ConfigError, FlowError};
pub use locker::{Locker, ReturnReceipt, TakeReceipt};
pub use session::Session;

/// Background task that is aborted when the handle is dropped.
pub struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(future))
    }

    pub fn abort(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}
