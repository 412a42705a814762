//! Storage health check

use opendal::Operator;

use geocrypt_core::{GeocryptError, GeocryptResult};

/// Verify the storage backend is reachable by listing the root
pub async fn check_health(op: &Operator) -> GeocryptResult<()> {
    op.list("/")
        .await
        .map(|_| ())
        .map_err(|e| GeocryptError::Storage(format!("storage health check failed: {e}")))
}

/// Returns true if storage is reachable, false otherwise (non-panicking)
pub async fn is_healthy(op: &Operator) -> bool {
    check_health(op).await.is_ok()
}
