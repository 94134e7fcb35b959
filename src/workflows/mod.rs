//! Multi-request orchestration built on top of [`crate::client::ApiClient`].
//!
//! Every workflow here takes a shared client and fans out through
//! [`crate::task_group::BoundedTaskGroup`]; none of them hold state across calls.

pub mod dataload;
pub mod fetch;
pub mod permissions;
pub mod search;
pub mod tml;

use crate::error::{CsToolsError, CsToolsResult};
use crate::types::ApiResult;

/// A `metadata/search`-shaped response is a bare JSON array of rows.
pub(crate) fn rows_from_search(value: ApiResult) -> CsToolsResult<Vec<ApiResult>> {
    match value {
        ApiResult::Array(rows) => Ok(rows),
        other => Err(CsToolsError::response_parsing_error(format!(
            "expected a JSON array of rows, got: {other}"
        ))),
    }
}
