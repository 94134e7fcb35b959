//! Snapshot a set of metadata objects to TML on disk and record the result
//! in a guid-mapping file, ready for a later [`crate::deploy::deploy`].

use crate::client::ApiClient;
use crate::deploy::deploy::collect_tml_files;
use crate::deploy::mapping::{HistoryMode, MappingFile};
use crate::error::CsToolsResult;
use crate::logging::{log_info, log_warn};
use crate::task_group::BoundedTaskGroup;
use crate::types::{ApiObjectType, Guid, TmlStatus};
use crate::workflows::tml;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const EXPORT_CONCURRENCY: usize = 4;

pub struct CheckpointFilters {
    pub object_types: Vec<ApiObjectType>,
    pub tags: Vec<String>,
}

/// The 7-step checkpoint sequence: open/create the mapping file, search for
/// matching metadata, fan out TML exports at concurrency 4, ensure every
/// exported guid has a mapping entry, prune guids no longer present, record
/// an EXPORT history entry, and save.
pub async fn checkpoint(
    client: Arc<ApiClient>,
    directory: &Path,
    environment: &str,
    filters: &CheckpointFilters,
    delete_aware: bool,
) -> CsToolsResult<MappingFile> {
    let mut mapping_file = MappingFile::open_or_create(directory, environment).await?;

    let search_options = json!({
        "metadata": filters.object_types.iter().map(|t| json!({"type": t})).collect::<Vec<_>>(),
        "tag_identifiers": filters.tags,
        "record_offset": 0,
        "record_size": 10_000,
    });
    let search_result = client.metadata_search(None, search_options).await?;
    let objects = search_result.as_array().cloned().unwrap_or_default();

    let guids: Vec<Guid> = objects
        .iter()
        .filter_map(|o| o["metadata_id"].as_str().or_else(|| o["id"].as_str()))
        .map(Guid::from)
        .collect();

    log_info!(environment, object_count = guids.len(), "checkpoint: exporting objects");

    let mut group: BoundedTaskGroup<crate::types::OperationStatusRow> = BoundedTaskGroup::new(EXPORT_CONCURRENCY);
    for guid in &guids {
        let client = client.clone();
        let guid = guid.clone();
        let directory = directory.to_path_buf();
        group.spawn(async move { tml::tml_export(&client, &guid, Some(&directory), true).await });
    }

    let mut statuses = Vec::new();
    for outcome in group.join_all().await {
        if let Ok(row) = outcome {
            statuses.push(row);
        }
    }

    mapping_file.ensure_keys(guids.iter().cloned());

    if delete_aware {
        let present: HashSet<Guid> = guids.iter().cloned().collect();
        let pruned = mapping_file.prune_to(&present);
        remove_guid_tml_files(directory, &pruned).await;
    }

    let files_exported = statuses.iter().filter(|s| s.status != TmlStatus::Error).count();
    let aggregate = TmlStatus::aggregate(statuses.iter().map(|s| s.status));
    mapping_file.record_history(
        "cs-tools-core/checkpoint",
        HistoryMode::Export,
        environment,
        aggregate,
        json!({"files_expected": guids.len(), "files_exported": files_exported}),
    );

    mapping_file.save(directory, environment).await?;

    Ok(mapping_file)
}

/// Delete the on-disk TML for each guid no longer present in the latest
/// checkpoint, matching `--delete-aware` pruning of the mapping file itself.
async fn remove_guid_tml_files(directory: &Path, pruned: &[Guid]) {
    if pruned.is_empty() {
        return;
    }

    let pruned_ids: HashSet<&str> = pruned.iter().map(Guid::as_str).collect();
    let files = match collect_tml_files(directory).await {
        Ok(files) => files,
        Err(e) => {
            log_warn!(error = %e, "could not enumerate TML files to prune");
            return;
        }
    };

    for file in files {
        let Some(stem) = file.file_name().and_then(|n| n.to_str()) else { continue };
        let Some(guid) = stem.split('.').next() else { continue };
        if pruned_ids.contains(guid) {
            if let Err(e) = tokio::fs::remove_file(&file).await {
                log_warn!(path = %file.display(), error = %e, "failed removing pruned TML file");
            }
        }
    }
}
