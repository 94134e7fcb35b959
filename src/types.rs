//! Shared value types used across the transport, workflow, and deployment layers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A platform-assigned content identifier.
///
/// The platform mints these; we never generate them locally. Modeled as a
/// newtype over `String` rather than a bare alias so mapping-file keys and
/// TML rewrites can't be accidentally confused with arbitrary strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(pub String);

impl Guid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Metadata object type as the platform names it (`LIVEBOARD`, `ANSWER`, `LOGICAL_TABLE`, ...).
pub type ApiObjectType = String;

/// Uniform per-object outcome, shared by metadata search, TML export/validate/import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TmlStatus {
    Ok,
    Warning,
    Error,
}

impl TmlStatus {
    /// Fold a collection of statuses into the aggregate used for checkpoint/deploy
    /// history records and the tool's process exit code.
    pub fn aggregate<I: IntoIterator<Item = TmlStatus>>(statuses: I) -> TmlStatus {
        let mut seen_warning = false;
        for status in statuses {
            match status {
                TmlStatus::Error => return TmlStatus::Error,
                TmlStatus::Warning => seen_warning = true,
                TmlStatus::Ok => {}
            }
        }
        if seen_warning {
            TmlStatus::Warning
        } else {
            TmlStatus::Ok
        }
    }
}

/// A single row returned by the TML export/validate/import workflows, regardless
/// of which underlying endpoint (metadata or version-control) produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStatusRow {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edoc: Option<String>,
    pub metadata_guid: Guid,
    pub metadata_name: String,
    pub metadata_type: String,
    pub status: TmlStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generic JSON-object row, used for endpoints we don't model as strongly-typed
/// structs yet (mirrors `cs_tools._types.APIResult` in the Python source).
pub type ApiResult = serde_json::Value;

/// Import policy accepted by `metadata/tml/import`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TmlImportPolicy {
    ValidateOnly,
    AllOrNone,
    Partial,
}

/// `{type -> guids}` input shape accepted by the fan-out workflows.
pub type TypedGuids = HashMap<ApiObjectType, Vec<Guid>>;
