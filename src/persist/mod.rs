//! Per-node boot cycle records on disk.
//!
//! Layout under the node directory:
//!  - `CurrentBootCycleIndex`: slot being written
//!  - `CurrentBootCycleCount`: cycles recorded so far
//!  - `1` ..= `max_boot_cycle_num`: one boot cycle per slot
//!
//! Every record is written to `<name>.tmp` first and renamed into place,
//! so a reader never observes a half written file.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::debug;

use crate::codes::{BootCycle, RotationState};

pub mod codec;
pub mod error;

use codec::{decode_counter, decode_cycle, encode_counter, encode_cycle};
use error::PersistError;

pub const CURRENT_BOOT_CYCLE_INDEX: &str = "CurrentBootCycleIndex";
pub const CURRENT_BOOT_CYCLE_COUNT: &str = "CurrentBootCycleCount";

#[derive(Debug, Clone)]
pub struct CycleStorage {
    dir: PathBuf,
}

impl CycleStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure_dir(&self) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(PersistError::fs(&self.dir))
    }

    /// Writes the rotation counters and the cycle stored in `slot`
    pub async fn write_cycle(
        &self,
        slot: u16,
        rotation: RotationState,
        cycle: &BootCycle,
    ) -> Result<(), PersistError> {
        let index = encode_counter(rotation.index)?;
        let count = encode_counter(rotation.count)?;
        let entries = encode_cycle(cycle)?;

        self.ensure_dir().await?;
        self.write_record(CURRENT_BOOT_CYCLE_INDEX, &index).await?;
        self.write_record(CURRENT_BOOT_CYCLE_COUNT, &count).await?;
        self.write_record(&slot.to_string(), &entries).await?;

        debug!(slot, entries = cycle.len(), "flushed boot cycle");
        Ok(())
    }

    /// `Ok(None)` on first ever startup, when no index was written yet
    pub async fn read_rotation_state(&self) -> Result<Option<RotationState>, PersistError> {
        let Some(index) = self.read_counter(CURRENT_BOOT_CYCLE_INDEX).await? else {
            return Ok(None);
        };
        let count = self
            .read_counter(CURRENT_BOOT_CYCLE_COUNT)
            .await?
            .unwrap_or_default();

        Ok(Some(RotationState { index, count }))
    }

    /// `Ok(None)` when the slot was never written
    pub async fn read_cycle(&self, slot: u16) -> Result<Option<BootCycle>, PersistError> {
        let name = slot.to_string();
        let Some(bytes) = self.read_record(&name).await? else {
            return Ok(None);
        };
        decode_cycle(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Corrupt {
                path: self.dir.join(name),
                source,
            })
    }

    /// Removes every record and recreates the empty directory.
    /// Returns how many records were deleted. Failures after removal started
    /// are reported as [`PersistError::PartialClear`].
    pub async fn clear(&self) -> Result<usize, PersistError> {
        let removed = match self.count_records().await {
            Ok(n) => n,
            Err(PersistError::FileSystem { source, .. }) if source.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };

        let partial = |source: std::io::Error| PersistError::PartialClear {
            path: self.dir.clone(),
            source,
        };
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(partial(e)),
        }

        fs::create_dir_all(&self.dir).await.map_err(partial)?;
        Ok(removed)
    }

    async fn count_records(&self) -> Result<usize, PersistError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(PersistError::fs(&self.dir))?;
        let mut n = 0;
        while entries
            .next_entry()
            .await
            .map_err(PersistError::fs(&self.dir))?
            .is_some()
        {
            n += 1;
        }
        Ok(n)
    }

    async fn read_counter(&self, name: &str) -> Result<Option<u16>, PersistError> {
        let Some(bytes) = self.read_record(name).await? else {
            return Ok(None);
        };
        decode_counter(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Corrupt {
                path: self.dir.join(name),
                source,
            })
    }

    async fn read_record(&self, name: &str) -> Result<Option<Vec<u8>>, PersistError> {
        let path = self.dir.join(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistError::fs(path)(e)),
        }
    }

    async fn write_record(&self, name: &str, bytes: &[u8]) -> Result<(), PersistError> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, bytes).await.map_err(PersistError::fs(&tmp))?;
        fs::rename(&tmp, &path).await.map_err(PersistError::fs(path))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codes::PostCode;

    fn cycle(primaries: &[u64]) -> BootCycle {
        primaries
            .iter()
            .enumerate()
            .map(|(i, p)| (1_000 + i as u64, PostCode::new(*p, vec![])))
            .collect()
    }

    #[tokio::test]
    async fn test_missing_records_are_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = CycleStorage::new(tmp.path().join("host0"));

        assert!(storage.read_rotation_state().await.unwrap().is_none());
        assert!(storage.read_cycle(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = CycleStorage::new(tmp.path().join("host0"));
        let rotation = RotationState { index: 3, count: 3 };

        storage.write_cycle(3, rotation, &cycle(&[1, 2, 3])).await.unwrap();

        assert_eq!(storage.read_rotation_state().await.unwrap(), Some(rotation));
        assert_eq!(storage.read_cycle(3).await.unwrap(), Some(cycle(&[1, 2, 3])));
        assert!(storage.read_cycle(2).await.unwrap().is_none());
        assert!(!storage.dir().join("3.tmp").exists());
    }

    #[tokio::test]
    async fn test_overwrite_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = CycleStorage::new(tmp.path());
        let rotation = RotationState { index: 1, count: 1 };

        storage.write_cycle(1, rotation, &cycle(&[1])).await.unwrap();
        storage.write_cycle(1, rotation, &cycle(&[1, 2])).await.unwrap();

        assert_eq!(storage.read_cycle(1).await.unwrap(), Some(cycle(&[1, 2])));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = CycleStorage::new(tmp.path());
        std::fs::write(tmp.path().join("1"), b"not json").unwrap();
        std::fs::write(tmp.path().join(CURRENT_BOOT_CYCLE_INDEX), b"[").unwrap();

        assert!(matches!(
            storage.read_cycle(1).await,
            Err(PersistError::Corrupt { .. })
        ));
        assert!(storage.read_rotation_state().await.is_err());
    }

    #[tokio::test]
    async fn test_clear_recreates_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = CycleStorage::new(tmp.path().join("host1"));
        storage
            .write_cycle(1, RotationState { index: 1, count: 1 }, &cycle(&[7]))
            .await
            .unwrap();

        assert_eq!(storage.clear().await.unwrap(), 3);
        assert!(storage.dir().is_dir());
        assert!(storage.read_rotation_state().await.unwrap().is_none());
        assert!(storage.read_cycle(1).await.unwrap().is_none());

        // clearing a directory that is already gone is fine
        std::fs::remove_dir_all(storage.dir()).unwrap();
        assert_eq!(storage.clear().await.unwrap(), 0);
        assert!(storage.dir().is_dir());
    }

    #[tokio::test]
    async fn test_clear_fails_before_removing() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let storage = CycleStorage::new(blocker.join("host0"));

        assert!(matches!(
            storage.clear().await,
            Err(PersistError::FileSystem { .. })
        ));
        assert!(blocker.is_file());
    }
}
