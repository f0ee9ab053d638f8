use crate::common::{KioskError, Result};
use crate::core::embedding::Embedding;
use crate::core::traits::IdentityStore;
use crate::storage::{new_record, Enrollment, IdentityId, IdentityRecord};

/// Volatile store for dry runs; nothing touches disk.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: Vec<IdentityRecord>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn lookup_all_primary(&self) -> Result<Vec<(IdentityId, Embedding)>> {
        Ok(self
            .records
            .iter()
            .map(|r| (r.identity_id.clone(), r.primary_embedding.clone()))
            .collect())
    }

    fn get(&self, identity_id: &IdentityId) -> Result<Option<IdentityRecord>> {
        Ok(self.records.iter().find(|r| &r.identity_id == identity_id).cloned())
    }

    fn enroll(&mut self, enrollment: Enrollment) -> Result<IdentityRecord> {
        let sequence = self.records.len() as u64 + 1;
        let record = new_record(sequence, &enrollment, None);
        self.records.push(record.clone());
        Ok(record)
    }

    fn record_visit(&mut self, identity_id: &IdentityId) -> Result<()> {
        let record = self
            .records
            .iter_mut()
            .find(|r| &r.identity_id == identity_id)
            .ok_or_else(|| KioskError::IdentityNotFound(identity_id.to_string()))?;
        record.total_visits += 1;
        record.last_seen = Some(chrono::Utc::now());
        Ok(())
    }
}
