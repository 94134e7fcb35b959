//! Search Data API: query a worksheet, casting the COMPACT response back to
//! typed values using the worksheet's own column metadata.
//!
//! Generalizes `api/workflows/search.py`.

use crate::client::ApiClient;
use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::log_warn;
use crate::types::Guid;
use serde_json::{Map, Value};
use std::collections::HashMap;

const BATCH_SIZE: usize = 100_000;
const SCALE_WARNING_EVERY: usize = 500_000;

/// Search a worksheet, returning rows as `{column_name -> value}` maps with
/// values cast per the worksheet's column types.
pub async fn search(client: &ApiClient, worksheet_guid: &Guid, query: &str) -> CsToolsResult<Vec<Map<String, Value>>> {
    let metadata = client
        .metadata_search(
            Some(worksheet_guid),
            serde_json::json!({
                "metadata": [{"type": "LOGICAL_TABLE", "identifier": worksheet_guid.as_str()}],
                "include_details": true,
            }),
        )
        .await?;

    let detail = metadata
        .as_array()
        .and_then(|rows| rows.first())
        .ok_or_else(|| CsToolsError::response_parsing_error("worksheet metadata lookup returned no rows"))?;

    let column_info: HashMap<String, String> = detail["metadata_detail"]["columns"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|column| {
            let name = column["header"]["name"].as_str()?;
            let data_type = column["dataType"].as_str()?;
            Some((name.to_string(), data_type.to_string()))
        })
        .collect();

    let mut rows: Vec<Map<String, Value>> = Vec::new();

    loop {
        let response = client
            .search_data(worksheet_guid, query, rows.len(), BATCH_SIZE)
            .await?;

        let content = response["contents"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| CsToolsError::response_parsing_error("search_data response had no contents"))?;

        let column_names: Vec<String> = content["column_names"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();

        let data_rows = content["data_rows"].as_array().cloned().unwrap_or_default();
        let page_len = data_rows.len();

        for compact_row in data_rows {
            rows.push(convert_compact_to_full(&compact_row, &column_names));
        }

        if page_len < BATCH_SIZE {
            break;
        }

        if rows.len() % SCALE_WARNING_EVERY == 0 {
            log_warn!(
                rows = rows.len(),
                "extracting this many rows via the Search Data API does not scale; add a filter or extract from the underlying data source"
            );
        }
    }

    cast(&mut rows, &column_info);

    Ok(rows)
}

fn convert_compact_to_full(compact_row: &Value, column_names: &[String]) -> Map<String, Value> {
    let mut full = Map::new();
    if let Some(cells) = compact_row.as_array() {
        for (idx, cell) in cells.iter().enumerate() {
            let Some(column_name) = column_names.get(idx) else { continue };
            let value = cell.get("v").and_then(|v| v.get("s")).cloned().unwrap_or_else(|| cell.clone());
            full.insert(column_name.clone(), value);
        }
    }
    full
}

fn cast(rows: &mut [Map<String, Value>], column_info: &HashMap<String, String>) {
    let mut warned_missing: std::collections::HashSet<String> = std::collections::HashSet::new();

    for row in rows.iter_mut() {
        let keys: Vec<String> = row.keys().cloned().collect();
        for column in keys {
            let value = row.get(&column).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }

            let column_type = column_info.get(&column).or_else(|| {
                column_info.iter().find(|(name, _)| name.contains(column.as_str())).map(|(_, t)| t)
            });

            let Some(column_type) = column_type else {
                if warned_missing.insert(column.clone()) {
                    log_warn!(column = %column, "could not match column to a LOGICAL_TABLE column");
                }
                continue;
            };

            let cast_value = cast_one(column_type, &value);
            row.insert(column, cast_value);
        }
    }
}

fn cast_one(column_type: &str, value: &Value) -> Value {
    match column_type {
        "VARCHAR" | "CHAR" => Value::String(value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())),
        "DOUBLE" | "FLOAT" | "TIMESTAMP" => value
            .as_f64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(|n| Value::from(n))
            .unwrap_or_else(|| value.clone()),
        "BOOL" => value
            .as_bool()
            .or_else(|| value.as_str().map(|s| s == "true"))
            .map(Value::Bool)
            .unwrap_or_else(|| value.clone()),
        "INT32" | "INT64" => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
            .map(Value::from)
            .unwrap_or_else(|| value.clone()),
        "DATE" | "DATE_TIME" => value.clone(),
        _ => value.clone(),
    }
}
