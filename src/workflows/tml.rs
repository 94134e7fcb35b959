//! TML export / import, producing a uniform status row per object.
//!
//! Generalizes `api/workflows/metadata.py::tml_export` and the import side of
//! `api/client.py::metadata_tml_import`.

use crate::client::ApiClient;
use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::{log_debug, log_error};
use crate::types::{Guid, OperationStatusRow, TmlImportPolicy, TmlStatus};
use std::path::Path;
use std::sync::Arc;

/// Export one object's TML, optionally writing it to `directory/{type}/{id}.{type}.tml`.
/// Export failures are captured into the returned row rather than propagated,
/// matching the source's "catch, log, return an ERROR row" behavior.
pub async fn tml_export(client: &ApiClient, guid: &Guid, directory: Option<&Path>, export_fqn: bool) -> OperationStatusRow {
    let result = match client.metadata_tml_export(guid, export_fqn).await {
        Ok(r) => r,
        Err(e) => {
            log_error!(guid = %guid, error = %e, "TML export request failed");
            return OperationStatusRow {
                operation: "EXPORT".into(),
                edoc: None,
                metadata_guid: guid.clone(),
                metadata_name: String::new(),
                metadata_type: String::new(),
                status: TmlStatus::Error,
                message: Some(e.to_string()),
            };
        }
    };

    let entry = match result.as_array().and_then(|a| a.first()) {
        Some(entry) => entry,
        None => {
            return OperationStatusRow {
                operation: "EXPORT".into(),
                edoc: None,
                metadata_guid: guid.clone(),
                metadata_name: String::new(),
                metadata_type: String::new(),
                status: TmlStatus::Error,
                message: Some("export response was empty".into()),
            };
        }
    };

    let info = &entry["info"];
    let status_code = info["status"]["status_code"].as_str().unwrap_or("ERROR");
    let status = match status_code {
        "OK" => TmlStatus::Ok,
        "WARNING" => TmlStatus::Warning,
        _ => TmlStatus::Error,
    };
    let metadata_name = info["name"].as_str().unwrap_or_default().to_string();
    let metadata_type = info["type"].as_str().unwrap_or_default().to_string();
    let edoc = entry["edoc"].as_str().map(str::to_string);

    if status != TmlStatus::Error {
        if let (Some(dir), Some(edoc)) = (directory, &edoc) {
            if let Err(e) = write_tml_file(dir, &metadata_type, guid.as_str(), edoc).await {
                log_error!(guid = %guid, error = %e, "failed writing exported TML to disk");
            }
        }
    }

    OperationStatusRow {
        operation: "EXPORT".into(),
        edoc,
        metadata_guid: guid.clone(),
        metadata_name,
        metadata_type,
        status,
        message: info["status"]["error_message"].as_str().map(str::to_string),
    }
}

async fn write_tml_file(directory: &Path, object_type: &str, guid: &str, edoc: &str) -> std::io::Result<()> {
    let type_dir = directory.join(object_type);
    tokio::fs::create_dir_all(&type_dir).await?;
    let file_path = type_dir.join(format!("{guid}.{object_type}.tml"));
    tokio::fs::write(file_path, edoc).await
}

/// Import a batch of TML documents under the given policy, producing one
/// status row per document.
pub async fn tml_import(client: Arc<ApiClient>, tmls: &[String], policy: TmlImportPolicy) -> CsToolsResult<Vec<OperationStatusRow>> {
    let result = client.metadata_tml_import(tmls, policy).await?;

    let rows = result
        .as_array()
        .ok_or_else(|| CsToolsError::response_parsing_error("tml import response was not an array"))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let info = &row["response"]["status"];
        let status_code = info["status_code"].as_str().unwrap_or("ERROR");
        let status = match status_code {
            "OK" => TmlStatus::Ok,
            "WARNING" => TmlStatus::Warning,
            _ => TmlStatus::Error,
        };
        let guid = row["response"]["header"]["id_guid"]
            .as_str()
            .or_else(|| row["response"]["header"]["guid"].as_str())
            .unwrap_or_default();

        log_debug!(guid, ?status, "TML import row processed");

        out.push(OperationStatusRow {
            operation: "IMPORT".into(),
            edoc: None,
            metadata_guid: Guid::from(guid),
            metadata_name: row["response"]["header"]["name"].as_str().unwrap_or_default().to_string(),
            metadata_type: row["response"]["header"]["type"].as_str().unwrap_or_default().to_string(),
            status,
            message: info["error_message"].as_str().map(str::to_string),
        });
    }

    Ok(out)
}
