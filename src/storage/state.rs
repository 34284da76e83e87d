// State store - snapshot-isolated key/value state backing command execution
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("snapshot token is no longer valid")]
    StaleSnapshot,
}

/// Opaque token returned by [`StateStore::create_snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot(usize);

/// Undo record for one mutation; replaying it restores the previous value
enum UndoOp {
    Write { key: Vec<u8>, prev: Option<Vec<u8>> },
}

/// In-memory key/value store with an append-only undo log.
///
/// A snapshot is just the current undo-log length; restoring truncates the
/// log back to that point, replaying the undone writes in reverse. Snapshots
/// therefore nest and must be restored newest-first, which matches the
/// single-writer execution model of the block pipeline.
#[derive(Default)]
pub struct StateStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    undo_log: Vec<UndoOp>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        let prev = self.entries.insert(key.to_vec(), value.to_vec());
        self.undo_log.push(UndoOp::Write {
            key: key.to_vec(),
            prev,
        });
    }

    pub fn del(&mut self, key: &[u8]) {
        if let Some(prev) = self.entries.remove(key) {
            self.undo_log.push(UndoOp::Write {
                key: key.to_vec(),
                prev: Some(prev),
            });
        }
    }

    pub fn create_snapshot(&self) -> StateSnapshot {
        StateSnapshot(self.undo_log.len())
    }

    /// Roll every mutation after `snapshot` back, newest first
    pub fn restore_snapshot(&mut self, snapshot: StateSnapshot) -> Result<(), StoreError> {
        if snapshot.0 > self.undo_log.len() {
            return Err(StoreError::StaleSnapshot);
        }
        while self.undo_log.len() > snapshot.0 {
            // loop condition guarantees the pop succeeds
            if let Some(UndoOp::Write { key, prev }) = self.undo_log.pop() {
                match prev {
                    Some(value) => {
                        self.entries.insert(key, value);
                    }
                    None => {
                        self.entries.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }
}
