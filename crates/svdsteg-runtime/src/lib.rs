//! svdsteg runtime: worker channels, single-flight managers, session.
//!
//! Every computation runs on a background worker owned by a manager. A
//! manager reports results through the `on_update` callback it was built
//! with and hands back a [`Flight`] the caller may await or ignore.

pub mod channel;
pub mod resize_manager;
pub mod session;
pub mod single_flight;
pub mod steg_manager;
pub mod svd_manager;

use std::sync::Arc;

use svdsteg_core::{Error, Result};

/// Handle to one manager call. Resolves once `on_update` has run, or with
/// the error that stopped it.
pub type Flight = tokio::task::JoinHandle<Result<()>>;

/// Result callback injected into a manager at construction.
pub type OnUpdate<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Await a [`Flight`], folding a panicked or aborted task into [`Error::Worker`].
pub async fn wait(flight: Flight) -> Result<()> {
    match flight.await {
        Ok(result) => result,
        Err(e) => Err(Error::Worker(format!("manager task failed: {}", e))),
    }
}

pub use channel::WorkerChannel;
pub use resize_manager::ResizeManager;
pub use session::Session;
pub use single_flight::{settle, ResponseFuture, SingleFlight};
pub use steg_manager::{StegInfo, StegManager};
pub use svd_manager::{SvdInfo, SvdManager};
