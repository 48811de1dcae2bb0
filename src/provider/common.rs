//! # Common Provider Utilities
//!
//! Shared helpers used around every remote store call, whatever the provider.

use crate::observability::metrics;
use crate::provider::StoreError;
use std::future::Future;
use std::time::Instant;
use tracing::debug;

/// Store operations, as recorded in metrics and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    List,
    Get,
    Put,
    Delete,
}

impl StoreOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StoreOperation::List => "list",
            StoreOperation::Get => "get",
            StoreOperation::Put => "put",
            StoreOperation::Delete => "delete",
        }
    }
}

/// Run a store call and record its duration and outcome
///
/// Standardizes metrics across providers so individual implementations don't have to.
pub async fn record_store_call<T, F>(
    provider: &str,
    operation: StoreOperation,
    call: F,
) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let start = Instant::now();
    let result = call.await;
    metrics::record_store_operation(operation.as_str(), start.elapsed().as_secs_f64());

    if let Err(e) = &result {
        metrics::increment_store_operation_errors(operation.as_str(), e.kind());
        debug!(
            "{} store {} failed after {:?}: {}",
            provider,
            operation.as_str(),
            start.elapsed(),
            e
        );
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_store_call_passes_result_through() {
        let ok = record_store_call("test", StoreOperation::Get, async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = record_store_call("test", StoreOperation::Put, async {
            Err::<(), _>(StoreError::Transient("throttled".to_string()))
        })
        .await;
        assert!(err.unwrap_err().is_transient());
    }
}
