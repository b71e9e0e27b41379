//! Durable record of runs, stage executions, artifacts and blessings.

mod file;
mod memory;
mod store;

pub use file::FileMetadataStore;
pub use memory::InMemoryMetadataStore;
pub use store::{MetadataSnapshot, MetadataStore, RunRecord, StageExecution};

use crate::errors::MetadataError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// How to reach the metadata store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum MetadataConnection {
    /// A fresh store living in process memory.
    #[default]
    InMemory,
    /// A JSON file on local disk.
    File {
        /// Path of the metadata file.
        path: PathBuf,
    },
}

impl MetadataConnection {
    /// Opens the store this connection describes.
    ///
    /// # Errors
    ///
    /// Fails if a file store exists but cannot be read.
    pub fn open(&self) -> Result<Arc<dyn MetadataStore>, MetadataError> {
        Ok(match self {
            Self::InMemory => Arc::new(InMemoryMetadataStore::new()),
            Self::File { path } => Arc::new(FileMetadataStore::open(path.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_parses_tagged_json() {
        let conn: MetadataConnection =
            serde_json::from_str(r#"{"kind": "file", "path": "/tmp/metadata.json"}"#).unwrap();
        assert_eq!(
            conn,
            MetadataConnection::File {
                path: PathBuf::from("/tmp/metadata.json")
            }
        );

        let conn: MetadataConnection = serde_json::from_str(r#"{"kind": "in_memory"}"#).unwrap();
        assert_eq!(conn, MetadataConnection::InMemory);
    }

    #[test]
    fn test_connection_rejects_unknown_fields() {
        let parsed = serde_json::from_str::<MetadataConnection>(r#"{"kind": "file", "path": "x", "mode": 1}"#);
        assert!(parsed.is_err());
    }
}
