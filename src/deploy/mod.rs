//! The TML deployment engine: checkpoint a set of objects to disk, then
//! deploy them into another environment through a guid-mapping file.

pub mod checkpoint;
pub mod deploy;
pub mod mapping;

pub use checkpoint::{checkpoint, CheckpointFilters};
pub use deploy::{deploy, DeployType};
pub use mapping::{HistoryMode, HistoryRecord, MappingFile};
