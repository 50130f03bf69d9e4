//! Versioned dataset snapshot metadata.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::id::{DatasetId, ProjectId};

/// Metadata for one versioned dataset snapshot.
///
/// Snapshots form a version chain through `parent_id`/`child_id`; the
/// annotation payload itself lives behind the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    /// Snapshot identifier.
    pub id: DatasetId,
    /// Human-readable dataset name.
    pub name: String,
    /// Version number within the dataset's chain, starting at 1.
    pub version: u32,
    /// Description of the snapshot contents.
    #[serde(default)]
    pub description: String,
    /// Event ids of the records captured by this snapshot.
    #[serde(default)]
    pub event_ids: Vec<String>,
    /// Owning project.
    pub project_id: ProjectId,
    /// Previous version in the chain, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<DatasetId>,
    /// Next version in the chain, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<DatasetId>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl DatasetSnapshot {
    /// Creates a first-version snapshot.
    pub fn new(name: impl Into<String>, project_id: ProjectId) -> Self {
        Self {
            id: DatasetId::new(),
            name: name.into(),
            version: 1,
            description: String::new(),
            event_ids: Vec::new(),
            project_id,
            parent_id: None,
            child_id: None,
            created_at: Timestamp::now(),
        }
    }

    /// Creates the next version in this snapshot's chain.
    pub fn next_version(&self) -> Self {
        Self {
            id: DatasetId::new(),
            name: self.name.clone(),
            version: self.version + 1,
            description: self.description.clone(),
            event_ids: self.event_ids.clone(),
            project_id: self.project_id,
            parent_id: Some(self.id),
            child_id: None,
            created_at: Timestamp::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_chain() {
        let first = DatasetSnapshot::new("holdout", ProjectId::new());
        let second = first.next_version();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.parent_id, Some(first.id));
        assert_ne!(first.id, second.id);
    }
}
