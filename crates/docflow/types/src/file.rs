//! Versioned instance files
//!
//! Files are immutable records keyed by `(instance_file_id, version)`.
//! Nothing is ever updated in place: a new version is a new record, and the
//! current content of a file is simply its highest version.

use crate::{Identity, InstanceFileId, InstanceTaskId, TaskDefinitionId, WorkflowInstanceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a file version came to exist
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAction {
    Upload,
    Update,
    Consolidate,
}

/// A pointer to one exact file version
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileVersionRef {
    pub instance_file_id: InstanceFileId,
    pub version: u32,
}

impl std::fmt::Display for FileVersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.instance_file_id, self.version)
    }
}

/// One immutable version of an instance file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFile {
    /// Stable identity across versions
    pub instance_file_id: InstanceFileId,
    /// Monotonic per instance-file id, starting at 1
    pub version: u32,
    pub instance_id: WorkflowInstanceId,
    /// The task that produced this version
    pub task_id: InstanceTaskId,
    pub task_definition_id: TaskDefinitionId,
    pub action: FileAction,
    pub file_name: String,
    pub created_by: Identity,
    pub created_at: DateTime<Utc>,
    /// Inputs of a consolidated file
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived_from: Vec<FileVersionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl InstanceFile {
    pub fn version_ref(&self) -> FileVersionRef {
        FileVersionRef {
            instance_file_id: self.instance_file_id.clone(),
            version: self.version,
        }
    }
}

// ── File Arena ───────────────────────────────────────────────────────

/// All file versions of one instance, with a derived current view
#[derive(Clone, Debug, Default)]
pub struct FileArena {
    files: BTreeMap<(InstanceFileId, u32), InstanceFile>,
}

impl FileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files(files: impl IntoIterator<Item = InstanceFile>) -> Self {
        let mut arena = Self::new();
        for file in files {
            arena
                .files
                .insert((file.instance_file_id.clone(), file.version), file);
        }
        arena
    }

    /// Add a new version. Existing versions are never replaced; a collision
    /// is returned as the conflicting reference.
    pub fn insert(&mut self, file: InstanceFile) -> Result<(), FileVersionRef> {
        let key = (file.instance_file_id.clone(), file.version);
        if self.files.contains_key(&key) {
            return Err(file.version_ref());
        }
        self.files.insert(key, file);
        Ok(())
    }

    /// All versions of a file, ascending
    pub fn versions(&self, id: &InstanceFileId) -> Vec<&InstanceFile> {
        self.files
            .range((id.clone(), 0)..=(id.clone(), u32::MAX))
            .map(|(_, file)| file)
            .collect()
    }

    /// The highest version of a file
    pub fn current(&self, id: &InstanceFileId) -> Option<&InstanceFile> {
        self.files
            .range((id.clone(), 0)..=(id.clone(), u32::MAX))
            .next_back()
            .map(|(_, file)| file)
    }

    /// Version number the next update of `id` gets
    pub fn next_version(&self, id: &InstanceFileId) -> u32 {
        self.current(id).map_or(1, |file| file.version + 1)
    }

    /// The current version of every file in the instance
    pub fn current_files(&self) -> Vec<&InstanceFile> {
        let ids: BTreeSet<&InstanceFileId> = self.files.keys().map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| self.current(id)).collect()
    }

    /// Ids of the files a task produced any version of
    pub fn produced_by(&self, task: &InstanceTaskId) -> BTreeSet<InstanceFileId> {
        self.files
            .values()
            .filter(|file| &file.task_id == task)
            .map(|file| file.instance_file_id.clone())
            .collect()
    }

    /// Current versions of the files a task produced
    pub fn visible_from(&self, task: &InstanceTaskId) -> Vec<&InstanceFile> {
        self.produced_by(task)
            .iter()
            .filter_map(|id| self.current(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceFile> {
        self.files.values()
    }
}
