use crate::common::{KioskError, Result, DevMode};
use crate::core::embedding::Embedding;
use crate::core::traits::IdentityStore;
use crate::storage::{new_record, Enrollment, IdentityId, IdentityRecord};
use std::path::{Path, PathBuf};
use std::fs;

pub const STORAGE_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = "bincode";
const CORRUPT_EXTENSION: &str = "corrupt";

/// One bincode file per identity plus a PNG of the enrollment face crop.
/// Records are cached in enrollment order; the cache only changes after the
/// files on disk have been written. Unreadable records are renamed to
/// `.corrupt` and their ids are never handed out again.
pub struct FileIdentityStore {
    data_dir: PathBuf,
    faces_dir: PathBuf,
    records: Vec<IdentityRecord>,
    highest_sequence: u64,
}

impl FileIdentityStore {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        let faces_dir = data_dir.join("faces");
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&faces_dir)?;

        let mut records = Vec::new();
        let mut highest_sequence = 0;
        for entry in fs::read_dir(&data_dir)? {
            let path = entry?.path();
            let extension = path.extension().and_then(|e| e.to_str());
            if extension != Some(RECORD_EXTENSION) && extension != Some(CORRUPT_EXTENSION) {
                continue;
            }
            if let Some(sequence) = sequence_of(&path) {
                highest_sequence = highest_sequence.max(sequence);
            }
            if extension == Some(CORRUPT_EXTENSION) {
                continue;
            }

            match Self::read_record(&path) {
                Ok(record) => {
                    highest_sequence = highest_sequence.max(record.sequence);
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!("Unreadable identity {:?}: {}", path, e);
                    let quarantine = path.with_extension(CORRUPT_EXTENSION);
                    if let Err(e) = fs::rename(&path, &quarantine) {
                        tracing::warn!("Failed to move {:?} aside: {}", path, e);
                    }
                }
            }
        }
        records.sort_by_key(|r| r.sequence);

        tracing::debug!("Loaded {} identities from {:?}", records.len(), data_dir);

        Ok(Self { data_dir, faces_dir, records, highest_sequence })
    }

    pub fn open_with_dev_mode(dev_mode: &DevMode) -> Result<Self> {
        Self::open(dev_mode.data_dir()?)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[IdentityRecord] {
        &self.records
    }

    fn record_path(&self, identity_id: &IdentityId) -> PathBuf {
        self.data_dir.join(format!("{}.{}", identity_id, RECORD_EXTENSION))
    }

    fn read_record(path: &Path) -> Result<IdentityRecord> {
        let data = fs::read(path)?;
        let mut record: IdentityRecord = bincode::deserialize(&data)
            .map_err(|e| KioskError::Storage(format!("Failed to deserialize: {}", e)))?;

        if record.version < STORAGE_VERSION {
            record.version = STORAGE_VERSION;
        }

        Ok(record)
    }

    /// Temp file plus rename, so readers never see a half-written record.
    fn write_record(&self, record: &IdentityRecord) -> Result<()> {
        let path = self.record_path(&record.identity_id);
        let tmp_path = path.with_extension("tmp");

        let encoded = bincode::serialize(record)
            .map_err(|e| KioskError::Storage(format!("Failed to serialize: {}", e)))?;
        fs::write(&tmp_path, encoded)?;
        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn next_sequence(&self) -> u64 {
        self.highest_sequence + 1
    }
}

fn sequence_of(path: &Path) -> Option<u64> {
    let stem = path.file_stem()?.to_str()?;
    IdentityId::from(stem).sequence()
}

impl IdentityStore for FileIdentityStore {
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
        let sequence = self.next_sequence();
        let identity_id = IdentityId::from_sequence(sequence);

        let face_path = self.faces_dir.join(format!("{}.png", identity_id));
        enrollment
            .face_image
            .save(&face_path)
            .map_err(|e| KioskError::Storage(format!("Failed to save face image: {}", e)))?;

        let record = new_record(sequence, &enrollment, Some(face_path.clone()));
        if let Err(e) = self.write_record(&record) {
            let _ = fs::remove_file(&face_path);
            return Err(KioskError::Storage(format!("Failed to write {}: {}", identity_id, e)));
        }

        tracing::info!("Enrolled identity {}", identity_id);
        self.highest_sequence = sequence;
        self.records.push(record.clone());
        Ok(record)
    }

    fn record_visit(&mut self, identity_id: &IdentityId) -> Result<()> {
        let index = self
            .records
            .iter()
            .position(|r| &r.identity_id == identity_id)
            .ok_or_else(|| KioskError::IdentityNotFound(identity_id.to_string()))?;

        let mut updated = self.records[index].clone();
        updated.total_visits += 1;
        updated.last_seen = Some(chrono::Utc::now());

        self.write_record(&updated)?;
        self.records[index] = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn enrollment(embedding: Embedding) -> Enrollment {
        Enrollment {
            embedding,
            face_image: DynamicImage::ImageRgb8(RgbImage::new(16, 16)),
            confidence: 0.9,
            quality_score: 0.5,
        }
    }

    #[test]
    fn test_enroll_assigns_monotonic_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();

        let first = store.enroll(enrollment(vec![1.0, 0.0])).unwrap();
        let second = store.enroll(enrollment(vec![0.0, 1.0])).unwrap();

        assert_eq!(first.identity_id.as_str(), "P000001");
        assert_eq!(second.identity_id.as_str(), "P000002");
        assert!(first.face_image_path.as_ref().unwrap().exists());
        assert_eq!(first.total_visits, 1);
    }

    #[test]
    fn test_records_survive_reopen_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
            for i in 0..12 {
                store.enroll(enrollment(vec![i as f32, 1.0])).unwrap();
            }
        }

        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        let ids: Vec<_> = store
            .lookup_all_primary()
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0].as_str(), "P000001");
        assert_eq!(ids[11].as_str(), "P000012");

        let next = store.enroll(enrollment(vec![0.5, 0.5])).unwrap();
        assert_eq!(next.sequence, 13);
    }

    #[test]
    fn test_record_visit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        let record = store.enroll(enrollment(vec![1.0, 0.0])).unwrap();

        store.record_visit(&record.identity_id).unwrap();
        store.record_visit(&record.identity_id).unwrap();

        let reopened = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        let loaded = reopened.get(&record.identity_id).unwrap().unwrap();
        assert_eq!(loaded.total_visits, 3);
        assert_eq!(loaded.primary_embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_unknown_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        let missing = IdentityId::from("P999999");

        assert!(store.get(&missing).unwrap().is_none());
        assert!(matches!(store.record_visit(&missing), Err(KioskError::IdentityNotFound(_))));
    }

    #[test]
    fn test_corrupt_record_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
            store.enroll(enrollment(vec![1.0, 0.0])).unwrap();
        }
        fs::write(tmp.path().join("P000777.bincode"), b"not a record").unwrap();

        let store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_corrupt_latest_record_keeps_its_id() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
            store.enroll(enrollment(vec![1.0, 0.0])).unwrap();
            store.enroll(enrollment(vec![0.0, 1.0])).unwrap();
        }
        let damaged = tmp.path().join("P000002.bincode");
        fs::write(&damaged, b"trunc").unwrap();

        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(!damaged.exists());
        assert_eq!(fs::read(tmp.path().join("P000002.corrupt")).unwrap(), b"trunc");

        let next = store.enroll(enrollment(vec![0.6, 0.8])).unwrap();
        assert_eq!(next.identity_id.as_str(), "P000003");
        assert!(tmp.path().join("faces").join("P000002.png").exists());

        // The quarantined id stays retired across restarts
        drop(store);
        let mut store = FileIdentityStore::open(tmp.path().to_path_buf()).unwrap();
        assert_eq!(store.len(), 2);
        let after = store.enroll(enrollment(vec![0.8, 0.6])).unwrap();
        assert_eq!(after.identity_id.as_str(), "P000004");
    }
}
