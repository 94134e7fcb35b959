//! Syncer interface: an abstract way to load and dump tabular data to a
//! storage layer, independent of the analytics platform itself.
//!
//! Generalizes `cs_tools/sync/protocol.py::SyncerProtocol` and the file-based
//! syncers (`parquet`, `excel`) alongside the database ones (`postgres`,
//! `snowflake`). Core code only ever calls [`Syncer::load`] / [`Syncer::dump`];
//! concrete connection details live entirely behind the trait.

use crate::error::{CsToolsError, CsToolsResult};
use crate::logging::{log_debug, log_warn};
use serde_json::{Map, Value};
use std::path::PathBuf;

pub type Record = Map<String, Value>;
pub type RecordBatch = Vec<Record>;

/// Declares a syncer to the outside world, mirroring the `MANIFEST.json`
/// alongside each Python syncer module.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncerManifest {
    pub name: String,
    pub syncer_class: String,
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Core invokes only `load`/`dump`; everything else about how a syncer talks
/// to its backing store is its own business.
pub trait Syncer: Send + Sync {
    fn name(&self) -> &str;

    /// Extract data from the data storage layer. `directive` names the
    /// resource within the storage layer (a file stem, a table name, ...).
    fn load(&self, directive: &str) -> CsToolsResult<RecordBatch>;

    /// Persist data to the data storage layer.
    fn dump(&self, directive: &str, data: &RecordBatch) -> CsToolsResult<()>;
}

/// How [`DatabaseSyncer::dump`] reconciles incoming rows with what's already
/// in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    Append,
    Truncate,
    Upsert,
}

/// Database-backed syncers additionally expose connection metadata and a
/// load strategy; core code still only calls the base [`Syncer`] methods.
pub trait DatabaseSyncer: Syncer {
    fn load_strategy(&self) -> LoadStrategy;
    fn is_database(&self) -> bool {
        true
    }
}

/// Stores each directive as a standalone JSON file: `{directory}/{directive}.json`.
pub struct FileSyncer {
    directory: PathBuf,
}

impl FileSyncer {
    pub fn new(directory: impl Into<PathBuf>) -> CsToolsResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| CsToolsError::configuration_error(format!("could not create syncer directory: {e}")))?;
        Ok(Self { directory })
    }

    fn resolve_path(&self, directive: &str) -> PathBuf {
        self.directory.join(format!("{directive}.json"))
    }
}

impl Syncer for FileSyncer {
    fn name(&self) -> &str {
        "file"
    }

    fn load(&self, directive: &str) -> CsToolsResult<RecordBatch> {
        let path = self.resolve_path(directive);
        let text = std::fs::read_to_string(&path)
            .map_err(|e| CsToolsError::configuration_error(format!("could not read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| CsToolsError::response_parsing_error(format!("{}: {e}", path.display())))
    }

    fn dump(&self, directive: &str, data: &RecordBatch) -> CsToolsResult<()> {
        if data.is_empty() {
            log_warn!(directive, "no data to write to file syncer");
            return Ok(());
        }
        let path = self.resolve_path(directive);
        let text = serde_json::to_string_pretty(data)
            .map_err(|e| CsToolsError::configuration_error(format!("could not serialize records: {e}")))?;
        std::fs::write(&path, text)
            .map_err(|e| CsToolsError::configuration_error(format!("could not write {}: {e}", path.display())))?;
        log_debug!(directive, rows = data.len(), path = %path.display(), "dumped records to file syncer");
        Ok(())
    }
}

/// Stores each directive as a CSV file: `{directory}/{directive}.csv`. Column
/// order is taken from the first record; later records missing a column get
/// an empty cell.
pub struct TabularFileSyncer {
    directory: PathBuf,
}

impl TabularFileSyncer {
    pub fn new(directory: impl Into<PathBuf>) -> CsToolsResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| CsToolsError::configuration_error(format!("could not create syncer directory: {e}")))?;
        Ok(Self { directory })
    }

    fn resolve_path(&self, directive: &str) -> PathBuf {
        self.directory.join(format!("{directive}.csv"))
    }
}

impl Syncer for TabularFileSyncer {
    fn name(&self) -> &str {
        "csv"
    }

    fn load(&self, directive: &str) -> CsToolsResult<RecordBatch> {
        let path = self.resolve_path(directive);
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| CsToolsError::configuration_error(format!("could not open {}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| CsToolsError::response_parsing_error(e.to_string()))?
            .clone();

        let mut out = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| CsToolsError::response_parsing_error(e.to_string()))?;
            let mut row = Record::new();
            for (header, value) in headers.iter().zip(record.iter()) {
                row.insert(header.to_string(), Value::String(value.to_string()));
            }
            out.push(row);
        }
        Ok(out)
    }

    fn dump(&self, directive: &str, data: &RecordBatch) -> CsToolsResult<()> {
        if data.is_empty() {
            log_warn!(directive, "no data to write to tabular syncer");
            return Ok(());
        }

        let path = self.resolve_path(directive);
        let mut writer = csv::Writer::from_path(&path)
            .map_err(|e| CsToolsError::configuration_error(format!("could not create {}: {e}", path.display())))?;

        let mut columns: Vec<String> = Vec::new();
        for key in data[0].keys() {
            columns.push(key.clone());
        }

        writer
            .write_record(&columns)
            .map_err(|e| CsToolsError::configuration_error(e.to_string()))?;

        for row in data {
            let values: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(value_to_cell).unwrap_or_default())
                .collect();
            writer
                .write_record(&values)
                .map_err(|e| CsToolsError::configuration_error(e.to_string()))?;
        }

        writer
            .flush()
            .map_err(|e| CsToolsError::configuration_error(e.to_string()))?;

        log_debug!(directive, rows = data.len(), path = %path.display(), "dumped records to tabular syncer");
        Ok(())
    }
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_syncer_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let syncer = FileSyncer::new(dir.path()).unwrap();

        let data: RecordBatch = vec![json!({"guid": "a", "name": "Alice"}).as_object().unwrap().clone()];
        syncer.dump("users", &data).unwrap();

        let loaded = syncer.load("users").unwrap();
        assert_eq!(loaded, data);
    }

    #[test]
    fn tabular_syncer_round_trips_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let syncer = TabularFileSyncer::new(dir.path()).unwrap();

        let data: RecordBatch = vec![json!({"guid": "a", "count": 3}).as_object().unwrap().clone()];
        syncer.dump("rows", &data).unwrap();

        let loaded = syncer.load("rows").unwrap();
        assert_eq!(loaded[0]["guid"], Value::String("a".into()));
        assert_eq!(loaded[0]["count"], Value::String("3".into()));
    }

    #[test]
    fn dumping_empty_data_is_a_noop_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let syncer = FileSyncer::new(dir.path()).unwrap();
        assert!(syncer.dump("nothing", &Vec::new()).is_ok());
    }
}
