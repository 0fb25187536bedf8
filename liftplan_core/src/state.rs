//! Mutable program state persisted with file locking.
//!
//! Enrollments and workout sessions change in place, so unlike the
//! append-only journals they live in a single JSON document that is
//! rewritten atomically (temp file + rename). A sidecar lock file serializes
//! load-modify-save cycles across processes.

use crate::{Enrollment, Error, Result, WorkoutSession};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Everything mutable that the core keeps per installation
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ProgramState {
    #[serde(default)]
    pub enrollments: HashMap<String, Enrollment>,
    #[serde(default)]
    pub sessions: HashMap<Uuid, WorkoutSession>,
}

impl ProgramState {
    /// Load state from a file with shared locking
    ///
    /// Returns default state if the file doesn't exist. A file that exists
    /// but cannot be parsed is an error: silently resetting would drop
    /// every enrollment.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No state file at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let file = File::open(path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let state = serde_json::from_str::<ProgramState>(&contents).map_err(|e| {
            tracing::warn!("Failed to parse state file {:?}: {}", path, e);
            Error::Json(e)
        })?;
        tracing::debug!("Loaded program state from {:?}", path);
        Ok(state)
    }

    /// Save state atomically:
    /// 1. Write to a temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::Internal(format!("state path {:?} has no parent", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved program state to {:?}", path);
        Ok(())
    }

    /// Load, modify and save under an exclusive lock on `<path>.lock`
    pub fn update<F, R>(path: &Path, f: F) -> Result<R>
    where
        F: FnOnce(&mut ProgramState) -> Result<R>,
    {
        let lock = open_lock_file(path)?;
        lock.lock_exclusive()?;

        let result = (|| -> Result<R> {
            let mut state = Self::load(path)?;
            let out = f(&mut state)?;
            state.save(path)?;
            Ok(out)
        })();

        lock.unlock()?;
        result
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    let mut lock_path = PathBuf::from(path);
    lock_path.set_extension("lock");
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompletionStatus, EnrollmentStatus};
    use chrono::Utc;

    fn enrollment(user_id: &str) -> Enrollment {
        Enrollment {
            user_id: user_id.into(),
            program_id: "strength-basics".into(),
            cycle_iteration: 1,
            current_week: 2,
            current_day_index: Some(1),
            enrollment_status: EnrollmentStatus::Active,
            cycle_status: CompletionStatus::Pending,
            week_status: CompletionStatus::Pending,
            meet_date: None,
            enrolled_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let mut state = ProgramState::default();
        state.enrollments.insert("u1".into(), enrollment("u1"));
        state.save(&path).unwrap();

        let loaded = ProgramState::load(&path).unwrap();
        assert_eq!(loaded.enrollments["u1"], state.enrollments["u1"]);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = ProgramState::load(&temp_dir.path().join("missing.json")).unwrap();
        assert!(state.enrollments.is_empty());
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn test_corrupted_state_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        assert!(ProgramState::load(&path).is_err());
    }

    #[test]
    fn test_update_persists_and_returns_value() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");

        let count = ProgramState::update(&path, |state| {
            state.enrollments.insert("u1".into(), enrollment("u1"));
            state.enrollments.insert("u2".into(), enrollment("u2"));
            Ok(state.enrollments.len())
        })
        .unwrap();
        assert_eq!(count, 2);

        let loaded = ProgramState::load(&path).unwrap();
        assert_eq!(loaded.enrollments.len(), 2);
    }

    #[test]
    fn test_failed_update_leaves_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state.json");
        ProgramState::default().save(&path).unwrap();

        let result: Result<()> = ProgramState::update(&path, |state| {
            state.enrollments.insert("u1".into(), enrollment("u1"));
            Err(Error::Conflict("nope".into()))
        });
        assert!(result.is_err());
        assert!(ProgramState::load(&path).unwrap().enrollments.is_empty());
    }
}
