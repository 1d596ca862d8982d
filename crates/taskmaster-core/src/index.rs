use crate::error::Result;
use crate::io;
use crate::paths;
use crate::taskset::TaskSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetStatus {
    Empty,
    Active,
    Complete,
}

impl fmt::Display for SetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetStatus::Empty => "empty",
            SetStatus::Active => "active",
            SetStatus::Complete => "complete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub title: String,
    pub status: SetStatus,
    pub progress: Progress,
    /// `state.json` relative to the project root.
    pub path: String,
}

impl IndexEntry {
    pub fn for_set(set: &TaskSet) -> Self {
        let summary = set.summary();
        let status = if summary.total == 0 {
            SetStatus::Empty
        } else if summary.closed() == summary.total {
            SetStatus::Complete
        } else {
            SetStatus::Active
        };
        Self {
            id: set.slug.clone(),
            title: set.title.clone(),
            status,
            progress: Progress {
                completed: summary.completed,
                total: summary.total,
            },
            path: paths::relative_state_path(&set.slug),
        }
    }
}

/// Cheap listing of every task set, kept beside the per-set state files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub sets: Vec<IndexEntry>,
    pub updated: DateTime<Utc>,
}

impl Default for Index {
    fn default() -> Self {
        Self {
            sets: Vec::new(),
            updated: Utc::now(),
        }
    }
}

impl Index {
    /// Missing file reads as an empty index.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::index_path(root);
        if !path.exists() {
            return Ok(Index::default());
        }
        io::read_json(&path)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        io::write_json(&paths::index_path(root), self)
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.sets.iter().find(|e| e.id == id)
    }

    /// Insert or replace the entry for `set`, keeping entries sorted by id.
    pub fn upsert(&mut self, set: &TaskSet) {
        let entry = IndexEntry::for_set(set);
        match self.sets.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => {
                self.sets.push(entry);
                self.sets.sort_by(|a, b| a.id.cmp(&b.id));
            }
        }
        self.updated = Utc::now();
    }

    pub fn from_sets<'a>(sets: impl IntoIterator<Item = &'a TaskSet>) -> Self {
        let mut index = Index::default();
        for set in sets {
            index.upsert(set);
        }
        index
    }
}
