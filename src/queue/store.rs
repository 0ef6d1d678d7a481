//! Durable sled-backed instruction store.

use std::path::Path;

use sled::{Db, Tree};

use crate::error::StorageError;
use crate::queue::QueuedInstruction;

const TREE_INSTRUCTIONS: &str = "conductor_instructions";

/// One JSON record per instruction id, rewritten on every queue mutation.
#[derive(Clone)]
pub struct InstructionStore {
    db: Db,
    records: Tree,
}

impl InstructionStore {
    pub fn new(db: Db) -> Result<Self, StorageError> {
        let records = db.open_tree(TREE_INSTRUCTIONS)?;
        Ok(Self { db, records })
    }

    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(sled::open(path)?)
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn put(&self, record: &QueuedInstruction) -> Result<(), StorageError> {
        let value = serde_json::to_vec(record)?;
        self.records.insert(record.id.as_bytes(), value)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<QueuedInstruction>, StorageError> {
        let Some(raw) = self.records.get(id.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn remove(&self, id: &str) -> Result<(), StorageError> {
        self.records.remove(id.as_bytes())?;
        Ok(())
    }

    /// Every stored record in original enqueue order.
    pub fn load_all(&self) -> Result<Vec<QueuedInstruction>, StorageError> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let (_, value) = entry?;
            let record: QueuedInstruction = serde_json::from_slice(&value)?;
            out.push(record);
        }
        out.sort_by_key(|r| r.seq);
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.records.flush()?;
        Ok(())
    }
}
