//! Storage health check

use anyhow::Result;
use opendal::Operator;

/// Verify the backend is reachable by listing the bundle prefix
pub async fn check_health(op: &Operator) -> Result<()> {
    op.list("bundles/")
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("storage health check failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_is_healthy() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        assert!(check_health(&op).await.is_ok());
    }
}
