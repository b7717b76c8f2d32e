pub mod pool;
pub mod retry;
pub mod runner;

pub use pool::{PoolSettings, WorkerPool};
pub use retry::RetryPolicy;
pub use runner::{JobRunner, RunnerSettings};

use crate::db::DatabaseError;
use crate::error::WorkerError;

/// Runs a store operation on tokio's blocking pool.
///
/// Store calls lock a SQLite connection and must not run on the async
/// executor threads.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, WorkerError>
where
    F: FnOnce() -> Result<T, DatabaseError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::Join(e.to_string()))?
        .map_err(WorkerError::from)
}
