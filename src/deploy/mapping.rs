//! The on-disk guid-mapping file that ties a checkpoint to its later deploys.
//!
//! Generalizes `cs_tools/cli/tools/scriptability/app.py`'s `GUIDMappingInfo`:
//! four fields — free-form `metadata`, a `mapping` of old guid to new guid (or
//! `null` until deployed), `additional_mapping` string replacements the user
//! maintains by hand, and a `history` of checkpoint/deploy records.

use crate::error::{CsToolsError, CsToolsResult};
use crate::types::{Guid, TmlStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryMode {
    Export,
    Validate,
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub at_utc: DateTime<Utc>,
    pub by: String,
    pub mode: HistoryMode,
    pub environment: String,
    pub status: TmlStatus,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingFile {
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub mapping: HashMap<Guid, Option<Guid>>,
    #[serde(default)]
    pub additional_mapping: HashMap<String, String>,
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
}

fn mapping_file_path(directory: &Path, environment: &str) -> PathBuf {
    directory.join(".mappings").join(format!("{environment}-guid-mappings.json"))
}

impl MappingFile {
    /// Load the mapping file for `environment`, or create an empty one if it
    /// doesn't exist yet.
    pub async fn open_or_create(directory: &Path, environment: &str) -> CsToolsResult<Self> {
        let path = mapping_file_path(directory, environment);
        tokio::fs::create_dir_all(path.parent().expect("mapping path always has a parent")).await.map_err(|e| {
            CsToolsError::mapping_file_corrupt(path.display().to_string(), format!("could not create .mappings directory: {e}"))
        })?;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut fresh = MappingFile::default();
                fresh.metadata = serde_json::json!({"extract_environment": environment});
                Ok(fresh)
            }
            Err(e) => Err(CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string())),
        }
    }

    /// Load the mapping file for `environment`; error if it doesn't exist —
    /// deploy's precondition that checkpoint has already run.
    pub async fn open_required(directory: &Path, environment: &str) -> CsToolsResult<Self> {
        let path = mapping_file_path(directory, environment);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|_| CsToolsError::mapping_file_missing(environment))?;
        serde_json::from_str(&text).map_err(|e| CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string()))
    }

    pub async fn save(&self, directory: &Path, environment: &str) -> CsToolsResult<()> {
        let path = mapping_file_path(directory, environment);
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string()))?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| CsToolsError::mapping_file_corrupt(path.display().to_string(), e.to_string()))
    }

    /// Merge `other` (typically the source environment's mapping file) into
    /// this one: source guid keys are added if absent, existing keys in
    /// `self` are never overwritten.
    pub fn merge_from(&mut self, other: &MappingFile) {
        for (guid, mapped) in &other.mapping {
            self.mapping.entry(guid.clone()).or_insert_with(|| mapped.clone());
        }
        for (k, v) in &other.additional_mapping {
            self.additional_mapping.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Ensure every guid in `guids` has a (possibly `null`) entry.
    pub fn ensure_keys(&mut self, guids: impl IntoIterator<Item = Guid>) {
        for guid in guids {
            self.mapping.entry(guid).or_insert(None);
        }
    }

    /// Drop mapping entries for guids no longer present in the latest
    /// checkpoint's object set, matching `--delete-aware` pruning. Returns
    /// the guids that were removed so the caller can clean up anything else
    /// keyed on them (their on-disk TML, for instance).
    pub fn prune_to(&mut self, present: &std::collections::HashSet<Guid>) -> Vec<Guid> {
        let pruned: Vec<Guid> = self.mapping.keys().filter(|guid| !present.contains(*guid)).cloned().collect();
        self.mapping.retain(|guid, _| present.contains(guid));
        pruned
    }

    /// Set (or overwrite) a mapping only if it currently has no value.
    /// Deploy never clobbers a guid mapping that was previously resolved.
    pub fn map_guid_if_unset(&mut self, old: &Guid, new: Guid) {
        let entry = self.mapping.entry(old.clone()).or_insert(None);
        if entry.is_none() {
            *entry = Some(new);
        }
    }

    pub fn record_history(
        &mut self,
        by: impl Into<String>,
        mode: HistoryMode,
        environment: impl Into<String>,
        status: TmlStatus,
        details: serde_json::Value,
    ) {
        self.history.push(HistoryRecord {
            at_utc: Utc::now(),
            by: by.into(),
            mode,
            environment: environment.into(),
            status,
            details,
        });
    }

    /// Replace `old` guid occurrences with their mapped `new` guid, then
    /// apply user-maintained string replacements, within a TML document body.
    pub fn rewrite(&self, tml_text: &str) -> String {
        let mut out = tml_text.to_string();
        for (old, new) in &self.mapping {
            if let Some(new) = new {
                out = out.replace(old.as_str(), new.as_str());
            }
        }
        for (from, to) in &self.additional_mapping {
            out = out.replace(from.as_str(), to.as_str());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_never_overwrites_existing_entries() {
        let mut target = MappingFile::default();
        target.mapping.insert(Guid::from("a"), Some(Guid::from("resolved-a")));

        let mut source = MappingFile::default();
        source.mapping.insert(Guid::from("a"), Some(Guid::from("source-a")));
        source.mapping.insert(Guid::from("b"), None);

        target.merge_from(&source);

        assert_eq!(target.mapping.get(&Guid::from("a")).unwrap(), &Some(Guid::from("resolved-a")));
        assert_eq!(target.mapping.get(&Guid::from("b")).unwrap(), &None);
    }

    #[test]
    fn map_guid_if_unset_does_not_clobber() {
        let mut mapping = MappingFile::default();
        mapping.mapping.insert(Guid::from("old"), Some(Guid::from("already-resolved")));

        mapping.map_guid_if_unset(&Guid::from("old"), Guid::from("new-value"));

        assert_eq!(mapping.mapping.get(&Guid::from("old")).unwrap(), &Some(Guid::from("already-resolved")));
    }

    #[test]
    fn rewrite_applies_guid_and_string_mappings() {
        let mut mapping = MappingFile::default();
        mapping.mapping.insert(Guid::from("old-guid"), Some(Guid::from("new-guid")));
        mapping.additional_mapping.insert("dev-schema".into(), "prod-schema".into());

        let result = mapping.rewrite("guid: old-guid\nschema: dev-schema\n");

        assert_eq!(result, "guid: new-guid\nschema: prod-schema\n");
    }

    #[test]
    fn prune_to_removes_stale_entries() {
        let mut mapping = MappingFile::default();
        mapping.mapping.insert(Guid::from("kept"), None);
        mapping.mapping.insert(Guid::from("stale"), None);

        let present: std::collections::HashSet<Guid> = [Guid::from("kept")].into_iter().collect();
        let pruned = mapping.prune_to(&present);

        assert_eq!(pruned, vec![Guid::from("stale")]);
        assert!(mapping.mapping.contains_key(&Guid::from("kept")));
        assert!(!mapping.mapping.contains_key(&Guid::from("stale")));
    }
}
