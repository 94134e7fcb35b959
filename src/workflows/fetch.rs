//! Fans out `metadata/search` across object types, or across specific guids.
//!
//! Generalizes `api/workflows/metadata.py::fetch_all` and `::fetch`.

use crate::client::ApiClient;
use crate::logging::{log_debug, log_error};
use crate::paginator::paginate;
use crate::task_group::BoundedTaskGroup;
use crate::types::{ApiObjectType, ApiResult, TypedGuids};
use crate::workflows::rows_from_search;
use serde_json::json;
use std::sync::Arc;

/// One task per object type, each exhausted via [`paginate`]. Concurrency
/// equals the number of object types, matching the Python source's
/// `max_concurrent=len(object_types)`.
pub async fn fetch_all(client: Arc<ApiClient>, object_types: &[ApiObjectType], record_size: usize) -> Vec<ApiResult> {
    let mut group: BoundedTaskGroup<(ApiObjectType, Vec<ApiResult>)> =
        BoundedTaskGroup::new(object_types.len().max(1));

    for object_type in object_types {
        let client = client.clone();
        let object_type = object_type.clone();
        group.spawn(async move {
            let rows = paginate(record_size, |offset, size| {
                let client = client.clone();
                let object_type = object_type.clone();
                async move {
                    let options = json!({
                        "metadata": [{"type": object_type}],
                        "record_offset": offset,
                        "record_size": size,
                    });
                    let result = client.metadata_search(None, options).await?;
                    rows_from_search(result)
                }
            })
            .await;
            (object_type, rows)
        });
    }

    let mut results = Vec::new();
    for outcome in group.join_all().await {
        match outcome {
            Ok((object_type, rows)) => {
                log_debug!(object_type = %object_type, count = rows.len(), "fetched all objects of type");
                results.extend(rows);
            }
            Err(e) => log_error!(error = %e, "fetch_all task group member failed"),
        }
    }
    results
}

/// One task per (type, guid) pair. No pagination needed — each task asks for
/// a single object. Concurrency capped at 15 (`CONCURRENCY_MAGIC_NUMBER` in
/// the Python source) so a large `typed_guids` map doesn't open unbounded
/// connections.
pub async fn fetch_many(client: Arc<ApiClient>, typed_guids: &TypedGuids, record_size: usize) -> Vec<ApiResult> {
    const CONCURRENCY: usize = 15;
    let mut group: BoundedTaskGroup<ApiResult> = BoundedTaskGroup::new(CONCURRENCY);

    for (object_type, guids) in typed_guids {
        for guid in guids {
            let client = client.clone();
            let object_type = object_type.clone();
            let guid = guid.clone();
            group.spawn(async move {
                let options = json!({
                    "metadata": [{"type": object_type, "identifier": guid.as_str()}],
                    "record_offset": 0,
                    "record_size": record_size,
                });
                client.metadata_search(Some(&guid), options).await
            });
        }
    }

    let mut results = Vec::new();
    for outcome in group.join_all().await {
        match outcome {
            Ok(Ok(result)) => match rows_from_search(result) {
                Ok(rows) => results.extend(rows),
                Err(e) => log_error!(error = %e, "fetch_many row shape was unexpected"),
            },
            Ok(Err(e)) => log_error!(error = %e, "fetch_many request failed for one guid"),
            Err(e) => log_error!(error = %e, "fetch_many task group member failed"),
        }
    }
    results
}
