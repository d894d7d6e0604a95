//! Durable set of entity keys that finished enrichment.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{PipelineError, Result};

pub const CHECKPOINT_FILE_NAME: &str = "processed_games.json";

/// Keys of entities already processed, persisted as a JSON array.
///
/// Every `record` rewrites the file (temp file + rename), so an interrupted
/// run loses at most the entity that was in flight.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    processed: BTreeSet<String>,
}

impl CheckpointStore {
    /// Opens the store at `path`. With `resume == false` the on-disk record is
    /// ignored and replaced at the next persist.
    pub fn open(path: &Path, resume: bool) -> Self {
        let processed = if resume {
            Self::load(path)
        } else {
            debug!("Ignoring existing checkpoint at {}", path.display());
            BTreeSet::new()
        };
        Self {
            path: path.to_path_buf(),
            processed,
        }
    }

    /// Reads the persisted key set. Missing file is an empty set; an
    /// unreadable one is reported as corrupt and also treated as empty.
    pub fn load(path: &Path) -> BTreeSet<String> {
        match Self::read_keys(path) {
            Ok(keys) => keys,
            Err(error) => {
                warn!("{error}. Starting with an empty checkpoint.");
                BTreeSet::new()
            }
        }
    }

    fn read_keys(path: &Path) -> Result<BTreeSet<String>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(err) => {
                return Err(PipelineError::CheckpointCorrupt {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                })
            }
        };
        serde_json::from_str::<Vec<String>>(&text)
            .map(|keys| keys.into_iter().collect())
            .map_err(|err| PipelineError::CheckpointCorrupt {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, key: &str) -> bool {
        self.processed.contains(key)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.processed.iter().map(String::as_str)
    }

    /// Adds `key` and persists immediately.
    pub fn record(&mut self, key: &str) -> Result<()> {
        self.processed.insert(key.to_string());
        self.persist()
    }

    /// Forgets every key. The file is rewritten at the next persist.
    pub fn reset(&mut self) {
        self.processed.clear();
    }

    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let keys: Vec<&str> = self.keys().collect();
        let body = serde_json::to_vec(&keys)
            .map_err(|err| PipelineError::decode("checkpoint keys", err))?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, body).map_err(|err| PipelineError::io(&temp_path, err))?;
        if let Err(err) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(PipelineError::io(&self.path, err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{CheckpointStore, CHECKPOINT_FILE_NAME};
    use crate::test_support::scratch_dir;

    #[test]
    fn test_missing_checkpoint_loads_empty() {
        let dir = scratch_dir("checkpoint_missing");
        let store = CheckpointStore::open(&dir.join(CHECKPOINT_FILE_NAME), true);
        assert!(store.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_corrupt_checkpoint_loads_empty() {
        let dir = scratch_dir("checkpoint_corrupt");
        let path = dir.join(CHECKPOINT_FILE_NAME);
        std::fs::write(&path, "[\"zelda\", ").expect("fixture should be writable");

        let store = CheckpointStore::open(&path, true);
        assert!(store.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_record_persists_immediately() {
        let dir = scratch_dir("checkpoint_record");
        let path = dir.join(CHECKPOINT_FILE_NAME);
        let mut store = CheckpointStore::open(&path, true);

        store.record("zelda").expect("record should persist");
        assert_eq!(
            CheckpointStore::load(&path).into_iter().collect::<Vec<_>>(),
            vec!["zelda".to_string()]
        );

        store
            .record("super_mario_bros")
            .expect("second record should persist");
        let reopened = CheckpointStore::open(&path, true);
        assert!(reopened.contains("zelda"));
        assert!(reopened.contains("super_mario_bros"));
        assert_eq!(reopened.len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_no_resume_ignores_existing_file_until_next_persist() {
        let dir = scratch_dir("checkpoint_no_resume");
        let path = dir.join(CHECKPOINT_FILE_NAME);
        std::fs::write(&path, r#"["zelda","metroid"]"#).expect("fixture should be writable");

        let mut store = CheckpointStore::open(&path, false);
        assert!(!store.contains("zelda"));
        assert_eq!(CheckpointStore::load(&path).len(), 2);

        store.record("kirby").expect("record should persist");
        let on_disk = CheckpointStore::load(&path);
        assert_eq!(on_disk.into_iter().collect::<Vec<_>>(), vec!["kirby".to_string()]);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reset_clears_memory_and_disk_on_persist() {
        let dir = scratch_dir("checkpoint_reset");
        let path = dir.join(CHECKPOINT_FILE_NAME);
        let mut store = CheckpointStore::open(&path, true);
        store.record("zelda").expect("record should persist");

        store.reset();
        assert!(store.is_empty());
        assert_eq!(CheckpointStore::load(&path).len(), 1);

        store.persist().expect("persist should succeed");
        assert!(CheckpointStore::load(&path).is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }
}
