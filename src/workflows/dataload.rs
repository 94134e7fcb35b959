//! The Falcon data-load sequence: initialize, redirect-aware reauth, upload,
//! commit, then poll for completion.
//!
//! Generalizes `api/workflows/tsload.py`.

use crate::client::ApiClient;
use crate::error::CsToolsResult;
use crate::logging::{log_debug, log_info, log_warn};
use crate::types::ApiResult;
use serde::Serialize;
use std::time::Duration;

pub struct AuthInfo {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFormatOptions {
    pub field_separator: String,
    pub enclosing_character: String,
    pub escape_character: String,
    pub null_value: String,
    pub date_time_format: String,
    pub date_format: String,
    pub time_format: String,
    pub skip_second_fraction: bool,
    pub boolean_true: String,
    pub boolean_false: String,
    pub has_header_row: bool,
    pub flexible: bool,
}

impl Default for LoadFormatOptions {
    fn default() -> Self {
        Self {
            field_separator: "|".into(),
            enclosing_character: "\"".into(),
            escape_character: "\"".into(),
            null_value: String::new(),
            date_time_format: "%Y-%m-%d %H:%M:%S".into(),
            date_format: "%Y-%m-%d".into(),
            time_format: "%H:%M:%S".into(),
            skip_second_fraction: true,
            boolean_true: "True".into(),
            boolean_false: "False".into(),
            has_header_row: true,
            flexible: false,
        }
    }
}

pub struct LoadTarget {
    pub database: String,
    pub schema: String,
    pub table: String,
}

pub struct LoadOptions {
    pub empty_target: bool,
    pub max_ignored_rows: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            empty_target: false,
            max_ignored_rows: 0,
        }
    }
}

/// The 5-step upload sequence: initialize, redirect-aware reauth, multipart
/// upload, commit, then return the cycle id.
pub async fn upload_data(
    client: &ApiClient,
    auth_info: &AuthInfo,
    target: &LoadTarget,
    format: &LoadFormatOptions,
    load_options: &LoadOptions,
    filename: &str,
    file_bytes: Vec<u8>,
    ignore_node_redirect: bool,
) -> CsToolsResult<String> {
    let flags = serde_json::json!({
        "target": {"database": target.database, "schema": target.schema, "table": target.table},
        "format": {
            "field_separator": format.field_separator,
            "enclosing_character": format.enclosing_character,
            "escape_character": format.escape_character,
            "null_value": format.null_value,
            "date_time": {
                "date_time_format": format.date_time_format,
                "date_format": format.date_format,
                "time_format": format.time_format,
                "skip_second_fraction": format.skip_second_fraction,
            },
            "boolean": {"true_format": format.boolean_true, "false_format": format.boolean_false},
            "has_header_row": format.has_header_row,
            "flexible": format.flexible,
        },
        "load_options": {"empty_target": load_options.empty_target, "max_ignored_rows": load_options.max_ignored_rows},
    });

    let init = client.v1_dataservice_dataload_initialize(flags).await?;
    let cycle_id = init["cycle_id"]
        .as_str()
        .ok_or_else(|| crate::error::CsToolsError::response_parsing_error("dataload initialize returned no cycle_id"))?
        .to_string();

    log_info!(cycle_id = %cycle_id, "data load to Falcon initialized");

    if let Some(node) = init.get("node_address") {
        if let (Some(host), Some(port)) = (node["host"].as_str(), node["port"].as_u64()) {
            if host != "127.0.0.1" {
                client.record_dataservice_redirect(cycle_id.clone(), host, port as u16).await;
            }
        }
    }

    if !ignore_node_redirect {
        // A redirect was just recorded (or already existed from a previous
        // call); the sibling node needs its own session before we can upload.
        client.v1_dataservice_dataload_session(&auth_info.username, &auth_info.password).await?;
    }

    client.v1_dataservice_dataload_start(&cycle_id, filename, file_bytes).await?;
    client.v1_dataservice_dataload_commit(&cycle_id).await?;

    Ok(cycle_id)
}

/// Poll every 5 seconds until the load reaches a terminal status or the
/// caller's timeout elapses. A timeout is a warning, not an error — the
/// caller decides whether to keep waiting.
pub async fn wait_for_load(client: &ApiClient, cycle_id: &str, timeout: Duration) -> CsToolsResult<ApiResult> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_status = serde_json::json!({});

    loop {
        log_debug!(cycle_id, "checking status of dataload");
        let status = client.v1_dataservice_dataload_status(cycle_id).await?;

        if status["status"].get("code").is_some() {
            last_status = status;
            break;
        }

        if tokio::time::Instant::now() >= deadline {
            log_warn!(cycle_id, timeout_secs = timeout.as_secs(), "reached timeout waiting for dataload, giving up");
            last_status = status;
            break;
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    Ok(last_status)
}
