//! Running blocking filesystem work off the async workers.

use crate::error::{DeliveryError, Result};

/// Run `f` on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DeliveryError::Task(e.to_string()))?
}
