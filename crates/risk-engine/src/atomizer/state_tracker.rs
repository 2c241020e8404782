// crates/risk-engine/src/atomizer/state_tracker.rs
// State Tracker (§4.5, L5): the only mutable in-memory structure shared
// within a single repository's commit replay (§5 shared-resource policy).
// Scoped per run, passed explicitly into handlers — never a singleton
// (§9 Design Notes).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::db::models::CodeBlock;

/// `(file_path, block_name) -> block_id`, rebuilt from the relational store
/// at the start of each run (§4.5).
pub struct StateTracker {
    index: RwLock<HashMap<(String, String), String>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the tracker from every active block of a repository, as loaded
    /// by `db::writer::load_existing_blocks`.
    pub fn seed(blocks: &[CodeBlock]) -> Self {
        let tracker = Self::new();
        let mut index = tracker.index.write().unwrap_or_else(|e| e.into_inner());
        for block in blocks {
            index.insert((block.file_path.clone(), block.name.clone()), block.id.clone());
        }
        drop(index);
        tracker
    }

    pub fn get(&self, file_path: &str, name: &str) -> Option<String> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(file_path.to_string(), name.to_string()))
            .cloned()
    }

    pub fn set(&self, file_path: &str, name: &str, block_id: &str) {
        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((file_path.to_string(), name.to_string()), block_id.to_string());
    }

    pub fn delete(&self, file_path: &str, name: &str) {
        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(file_path.to_string(), name.to_string()));
    }

    pub fn count(&self) -> usize {
        self.index.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
