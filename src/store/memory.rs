// In-memory backend

use parking_lot::RwLock;
use std::sync::Arc;

use super::{CredentialRecord, StoreBackend};
use crate::error::StoreError;

/// Process-local backend; clones share the same collection
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    records: Arc<RwLock<Option<Vec<CredentialRecord>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the persisted records, ciphertext included
    pub fn records(&self) -> Vec<CredentialRecord> {
        self.records.read().clone().unwrap_or_default()
    }
}

impl StoreBackend for MemoryBackend {
    fn initialize(&self) -> Result<(), StoreError> {
        self.records.write().get_or_insert_with(Vec::new);
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self.records())
    }

    fn write_all(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        *self.records.write() = Some(records.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
