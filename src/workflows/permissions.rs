//! Permission fetch, branched on platform version.
//!
//! Generalizes `api/workflows/metadata.py::permissions`. Below the 10.3.0
//! compatibility cutoff the V1 (batched) permission endpoint is used; at or
//! above it, the V2 endpoint is used directly per guid.

use crate::client::ApiClient;
use crate::error::CsToolsResult;
use crate::logging::{log_debug, log_error, log_warn};
use crate::session::SessionContext;
use crate::task_group::BoundedTaskGroup;
use crate::types::{ApiResult, TypedGuids};
use std::sync::Arc;
use std::time::Duration;

/// Permission fetches could be expensive for the server; keep this well below
/// the general-purpose fan-out concurrency.
const CONCURRENCY: usize = 5;
const COMPAT_CUTOFF: &str = "10.3.0";
pub const PERMISSIONS_TIMEOUT: Duration = Duration::from_secs(60 * 15);

pub async fn permissions_fetch(client: Arc<ApiClient>, session: &SessionContext, typed_guids: &TypedGuids) -> Vec<ApiResult> {
    let v2 = session.is_at_least(COMPAT_CUTOFF);
    let mut group: BoundedTaskGroup<CsToolsResult<ApiResult>> = BoundedTaskGroup::new(CONCURRENCY);

    for (object_type, guids) in typed_guids {
        if v2 {
            for guid in guids {
                let client = client.clone();
                let object_type = object_type.clone();
                let guid = guid.clone();
                group.spawn(async move {
                    tokio::time::timeout(PERMISSIONS_TIMEOUT, client.security_metadata_permissions(&object_type, std::slice::from_ref(&guid)))
                        .await
                        .map_err(|_| crate::error::CsToolsError::timeout(PERMISSIONS_TIMEOUT.as_secs()))
                        .and_then(|r| r)
                });
            }
        } else {
            let client = client.clone();
            let object_type = object_type.clone();
            let guids = guids.clone();
            group.spawn(async move {
                tokio::time::timeout(PERMISSIONS_TIMEOUT, client.v1_security_metadata_permissions(&object_type, &guids))
                    .await
                    .map_err(|_| crate::error::CsToolsError::timeout(PERMISSIONS_TIMEOUT.as_secs()))
                    .and_then(|r| r)
                    .map(|batches| serde_json::Value::Array(batches))
            });
        }
    }

    log_debug!(v2, guid_types = typed_guids.len(), "starting permission fetch");

    let mut results = Vec::new();
    for outcome in group.join_all().await {
        match outcome {
            Ok(Ok(result)) => results.push(result),
            Ok(Err(e)) => log_error!(error = %e, "permission fetch failed for one guid batch"),
            Err(e) => log_warn!(error = %e, "permission fetch task group member failed"),
        }
    }
    results
}
