//! File-backed [`TrainingStore`].
//!
//! Layout under the data directory:
//! - `ledger.jsonl`: max history and applied progressions (append-only)
//! - `sets.jsonl`: logged sets (append-only)
//! - `state.json`: enrollments and sessions (rewritten atomically)
//!
//! A progression is a single ledger line carrying both the new max and its
//! audit log, so the pair is written or lost together.

use crate::journal::Journal;
use crate::state::ProgramState;
use crate::store::select_current;
use crate::{
    Enrollment, Error, LiftMax, LoggedSet, MaxLookup, MaxType, ProgressionLog, Result,
    SessionStatus, TrainingStore, WorkoutSession,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LedgerEntry {
    Max(LiftMax),
    Progression { max: LiftMax, log: ProgressionLog },
}

impl LedgerEntry {
    fn max(&self) -> &LiftMax {
        match self {
            LedgerEntry::Max(max) => max,
            LedgerEntry::Progression { max, .. } => max,
        }
    }

    fn log(&self) -> Option<&ProgressionLog> {
        match self {
            LedgerEntry::Max(_) => None,
            LedgerEntry::Progression { log, .. } => Some(log),
        }
    }
}

pub struct FileStore {
    ledger: Journal,
    sets: Journal,
    state_path: PathBuf,
}

impl FileStore {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        tracing::debug!("Opened file store at {:?}", data_dir);
        Ok(Self {
            ledger: Journal::new(data_dir.join("ledger.jsonl")),
            sets: Journal::new(data_dir.join("sets.jsonl")),
            state_path: data_dir.join("state.json"),
        })
    }

    fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.read_all()
    }

    fn series<'a>(
        entries: &'a [LedgerEntry],
        user_id: &'a str,
        lift_id: &'a str,
        max_type: MaxType,
    ) -> impl Iterator<Item = &'a LiftMax> + 'a {
        entries.iter().map(LedgerEntry::max).filter(move |m| {
            m.user_id == user_id && m.lift_id == lift_id && m.max_type == max_type
        })
    }
}

impl MaxLookup for FileStore {
    fn current_max(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
    ) -> Result<Option<LiftMax>> {
        let entries = self.entries()?;
        Ok(select_current(Self::series(&entries, user_id, lift_id, max_type), Utc::now()).cloned())
    }
}

impl TrainingStore for FileStore {
    fn record_max(&self, max: LiftMax) -> Result<()> {
        self.ledger.append(&LedgerEntry::Max(max))
    }

    fn max_history(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
    ) -> Result<Vec<LiftMax>> {
        let entries = self.entries()?;
        let mut history: Vec<LiftMax> = Self::series(&entries, user_id, lift_id, max_type)
            .cloned()
            .collect();
        history.sort_by_key(|m| m.effective_at);
        Ok(history)
    }

    fn lifts_with_max(&self, user_id: &str, max_type: MaxType) -> Result<Vec<String>> {
        let entries = self.entries()?;
        let lifts: BTreeSet<String> = entries
            .iter()
            .map(LedgerEntry::max)
            .filter(|m| m.user_id == user_id && m.max_type == max_type)
            .map(|m| m.lift_id.clone())
            .collect();
        Ok(lifts.into_iter().collect())
    }

    fn commit_progression(
        &self,
        expected_previous: Uuid,
        max: LiftMax,
        log: ProgressionLog,
    ) -> Result<()> {
        let (user_id, lift_id, max_type) = (max.user_id.clone(), max.lift_id.clone(), max.max_type);
        let entry = LedgerEntry::Progression { max, log };

        self.ledger.append_if(&entry, |existing: &[LedgerEntry]| {
            let current = select_current(
                Self::series(existing, &user_id, &lift_id, max_type),
                Utc::now(),
            )
            .map(|m| m.id);

            if current == Some(expected_previous) {
                Ok(())
            } else {
                Err(Error::Conflict(format!(
                    "max for {}/{} changed while progressing",
                    user_id, lift_id
                )))
            }
        })
    }

    fn progression_logs(&self, user_id: &str) -> Result<Vec<ProgressionLog>> {
        let entries = self.entries()?;
        Ok(entries
            .iter()
            .filter_map(LedgerEntry::log)
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect())
    }

    fn progression_applied(
        &self,
        user_id: &str,
        progression_id: &str,
        lift_id: &str,
        trigger_key: &str,
    ) -> Result<bool> {
        let entries = self.entries()?;
        Ok(entries.iter().filter_map(LedgerEntry::log).any(|l| {
            l.user_id == user_id
                && l.progression_id == progression_id
                && l.lift_id == lift_id
                && l.trigger_key == trigger_key
        }))
    }

    fn enrollment(&self, user_id: &str) -> Result<Option<Enrollment>> {
        Ok(ProgramState::load(&self.state_path)?
            .enrollments
            .get(user_id)
            .cloned())
    }

    fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        ProgramState::update(&self.state_path, |state| {
            state
                .enrollments
                .insert(enrollment.user_id.clone(), enrollment.clone());
            Ok(())
        })
    }

    fn update_enrollment(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut Enrollment) -> Result<()>,
    ) -> Result<Enrollment> {
        ProgramState::update(&self.state_path, |state| {
            let enrollment = state
                .enrollments
                .get_mut(user_id)
                .ok_or_else(|| Error::not_found("enrollment", user_id))?;
            f(enrollment)?;
            Ok(enrollment.clone())
        })
    }

    fn delete_enrollment(&self, user_id: &str) -> Result<bool> {
        ProgramState::update(&self.state_path, |state| {
            Ok(state.enrollments.remove(user_id).is_some())
        })
    }

    fn session(&self, session_id: Uuid) -> Result<Option<WorkoutSession>> {
        Ok(ProgramState::load(&self.state_path)?
            .sessions
            .get(&session_id)
            .cloned())
    }

    fn active_session(&self, user_id: &str) -> Result<Option<WorkoutSession>> {
        Ok(ProgramState::load(&self.state_path)?
            .sessions
            .into_values()
            .find(|s| s.user_id == user_id && s.status == SessionStatus::InProgress))
    }

    fn save_session(&self, session: &WorkoutSession) -> Result<()> {
        ProgramState::update(&self.state_path, |state| {
            state.sessions.insert(session.id, session.clone());
            Ok(())
        })
    }

    fn append_set(&self, set: &LoggedSet) -> Result<()> {
        self.sets.append(set)
    }

    fn session_sets(&self, session_id: Uuid) -> Result<Vec<LoggedSet>> {
        let sets: Vec<LoggedSet> = self.sets.read_all()?;
        Ok(sets
            .into_iter()
            .filter(|s| s.session_id == session_id)
            .collect())
    }
}
