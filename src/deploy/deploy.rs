//! Deploy previously checkpointed TML from one environment's directory into
//! another, rewriting guids through the merged mapping file.

use crate::client::ApiClient;
use crate::deploy::mapping::{HistoryMode, MappingFile};
use crate::error::CsToolsResult;
use crate::logging::{log_info, log_warn};
use crate::types::{Guid, TmlImportPolicy, TmlStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployType {
    /// Deploy every TML file under the directory.
    All,
    /// Deploy only files modified since the last recorded IMPORT.
    Delta,
}

/// The 7-step deploy sequence: merge the source and target mapping files,
/// enumerate `*.tml` files (skipping unmodified ones under DELTA), rewrite
/// guids and additional mappings into each document, import the batch,
/// record newly-resolved guid mappings without overwriting existing ones,
/// append a VALIDATE/IMPORT history entry, and save under the target
/// environment's filename.
pub async fn deploy(
    client: Arc<ApiClient>,
    directory: &Path,
    source_environment: &str,
    target_environment: &str,
    policy: TmlImportPolicy,
    deploy_type: DeployType,
) -> CsToolsResult<MappingFile> {
    let source_mapping = MappingFile::open_required(directory, source_environment).await?;
    let mut target_mapping = MappingFile::open_or_create(directory, target_environment).await?;
    target_mapping.merge_from(&source_mapping);

    let last_import_at = target_mapping
        .history
        .iter()
        .rev()
        .find(|h| h.mode == HistoryMode::Import)
        .map(|h| h.at_utc)
        .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC);

    let tml_paths = collect_tml_files(directory).await?;

    let mut tmls_by_original_guid: Vec<(Guid, String)> = Vec::new();

    for path in tml_paths {
        if deploy_type == DeployType::Delta {
            let modified = tokio::fs::metadata(&path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(Utc::now);
            if modified < last_import_at {
                continue;
            }
        }

        let Some(guid) = guid_from_filename(&path) else { continue };
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            crate::error::CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string())
        })?;

        tmls_by_original_guid.push((guid, target_mapping.rewrite(&text)));
    }

    if tmls_by_original_guid.is_empty() {
        log_warn!(
            source_environment,
            target_environment,
            "no TML files found to deploy"
        );
        return Ok(target_mapping);
    }

    log_info!(count = tmls_by_original_guid.len(), ?deploy_type, "deploying TML files");

    let tmls: Vec<String> = tmls_by_original_guid.iter().map(|(_, t)| t.clone()).collect();
    let rows = crate::workflows::tml::tml_import(client, &tmls, policy).await?;

    for ((original_guid, _), row) in tmls_by_original_guid.iter().zip(rows.iter()) {
        if row.status != TmlStatus::Error {
            target_mapping.map_guid_if_unset(original_guid, row.metadata_guid.clone());
        }
    }

    let aggregate = TmlStatus::aggregate(rows.iter().map(|r| r.status));
    let mode = if policy == TmlImportPolicy::ValidateOnly {
        HistoryMode::Validate
    } else {
        HistoryMode::Import
    };

    target_mapping.record_history(
        format!("cs-tools-core/deploy/{source_environment}->{target_environment}"),
        mode,
        target_environment,
        aggregate,
        json!({"deploy_type": format!("{deploy_type:?}"), "files_deployed": tmls_by_original_guid.len()}),
    );

    target_mapping.save(directory, target_environment).await?;

    Ok(target_mapping)
}

pub(crate) async fn collect_tml_files(directory: &Path) -> CsToolsResult<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![directory.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await.ok().flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().map(|n| n == ".mappings").unwrap_or(false) {
                    continue;
                }
                stack.push(path);
            } else if path.extension().map(|e| e == "tml").unwrap_or(false) {
                out.push(path);
            }
        }
    }

    Ok(out)
}

/// TML files are named `{guid}.{type}.tml`.
fn guid_from_filename(path: &Path) -> Option<Guid> {
    let stem = path.file_name()?.to_str()?;
    let guid = stem.split('.').next()?;
    Some(Guid::from(guid))
}
