//! Persistence seams and the in-memory store.
//!
//! The engine talks to storage only through these traits:
//! - [`LiftLookup`]: read-only lift catalog access
//! - [`MaxLookup`]: "what is this user's current max?"
//! - [`TrainingStore`]: everything the core writes (maxes, progression logs,
//!   enrollments, sessions, logged sets)
//!
//! [`MemoryStore`] backs tests and embedded use; `FileStore` backs the CLI.

use crate::{
    Enrollment, Error, Lift, LiftMax, LoggedSet, MaxType, ProgressionLog, Result, SessionStatus,
    WorkoutSession,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub trait LiftLookup {
    fn get_lift(&self, lift_id: &str) -> Result<Option<Lift>>;
}

pub trait MaxLookup {
    /// Latest max with an effective date at or before now
    fn current_max(&self, user_id: &str, lift_id: &str, max_type: MaxType)
        -> Result<Option<LiftMax>>;
}

/// Everything the core persists
pub trait TrainingStore: MaxLookup + Send + Sync {
    /// Append a max row (history is never rewritten)
    fn record_max(&self, max: LiftMax) -> Result<()>;

    fn max_history(&self, user_id: &str, lift_id: &str, max_type: MaxType)
        -> Result<Vec<LiftMax>>;

    /// Lift ids the user holds at least one max of `max_type` for
    fn lifts_with_max(&self, user_id: &str, max_type: MaxType) -> Result<Vec<String>>;

    /// Write a progressed max and its audit log as one unit.
    ///
    /// Fails with `Conflict` (writing nothing) if the current max for the
    /// lift is no longer the row `expected_previous`.
    fn commit_progression(
        &self,
        expected_previous: Uuid,
        max: LiftMax,
        log: ProgressionLog,
    ) -> Result<()>;

    fn progression_logs(&self, user_id: &str) -> Result<Vec<ProgressionLog>>;

    fn progression_applied(
        &self,
        user_id: &str,
        progression_id: &str,
        lift_id: &str,
        trigger_key: &str,
    ) -> Result<bool>;

    fn enrollment(&self, user_id: &str) -> Result<Option<Enrollment>>;
    fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()>;
    /// Load, modify and save the user's enrollment as one step, so concurrent
    /// transitions never overwrite each other. Fails with `NotFound` if the
    /// user is not enrolled; nothing is saved if `f` fails.
    fn update_enrollment(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut Enrollment) -> Result<()>,
    ) -> Result<Enrollment>;
    /// Returns whether an enrollment existed
    fn delete_enrollment(&self, user_id: &str) -> Result<bool>;

    fn session(&self, session_id: Uuid) -> Result<Option<WorkoutSession>>;
    fn active_session(&self, user_id: &str) -> Result<Option<WorkoutSession>>;
    fn save_session(&self, session: &WorkoutSession) -> Result<()>;
    fn append_set(&self, set: &LoggedSet) -> Result<()>;
    fn session_sets(&self, session_id: Uuid) -> Result<Vec<LoggedSet>>;
}

/// Pick the current max from a history: latest effective date not after
/// `as_of`; among equal dates the row written last wins.
pub fn select_current<'a, I>(rows: I, as_of: DateTime<Utc>) -> Option<&'a LiftMax>
where
    I: IntoIterator<Item = &'a LiftMax>,
{
    rows.into_iter()
        .filter(|m| m.effective_at <= as_of)
        .fold(None::<&'a LiftMax>, |best, candidate| match best {
            Some(b) if candidate.effective_at < b.effective_at => Some(b),
            _ => Some(candidate),
        })
}

fn same_series(m: &LiftMax, user_id: &str, lift_id: &str, max_type: MaxType) -> bool {
    m.user_id == user_id && m.lift_id == lift_id && m.max_type == max_type
}

#[derive(Default)]
struct MemoryState {
    maxes: Vec<LiftMax>,
    logs: Vec<ProgressionLog>,
    enrollments: HashMap<String, Enrollment>,
    sessions: HashMap<Uuid, WorkoutSession>,
    sets: Vec<LoggedSet>,
}

/// Thread-safe in-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }
}

impl MaxLookup for MemoryStore {
    fn current_max(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
    ) -> Result<Option<LiftMax>> {
        let state = self.state()?;
        Ok(select_current(
            state
                .maxes
                .iter()
                .filter(|m| same_series(m, user_id, lift_id, max_type)),
            Utc::now(),
        )
        .cloned())
    }
}

impl TrainingStore for MemoryStore {
    fn record_max(&self, max: LiftMax) -> Result<()> {
        self.state()?.maxes.push(max);
        Ok(())
    }

    fn max_history(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
    ) -> Result<Vec<LiftMax>> {
        let state = self.state()?;
        let mut history: Vec<LiftMax> = state
            .maxes
            .iter()
            .filter(|m| same_series(m, user_id, lift_id, max_type))
            .cloned()
            .collect();
        history.sort_by_key(|m| m.effective_at);
        Ok(history)
    }

    fn lifts_with_max(&self, user_id: &str, max_type: MaxType) -> Result<Vec<String>> {
        let state = self.state()?;
        let lifts: BTreeSet<String> = state
            .maxes
            .iter()
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
        let mut state = self.state()?;

        let current_id = select_current(
            state
                .maxes
                .iter()
                .filter(|m| same_series(m, &max.user_id, &max.lift_id, max.max_type)),
            Utc::now(),
        )
        .map(|m| m.id);

        if current_id != Some(expected_previous) {
            return Err(Error::Conflict(format!(
                "max for {}/{} changed while progressing",
                max.user_id, max.lift_id
            )));
        }

        state.maxes.push(max);
        state.logs.push(log);
        Ok(())
    }

    fn progression_logs(&self, user_id: &str) -> Result<Vec<ProgressionLog>> {
        let state = self.state()?;
        Ok(state
            .logs
            .iter()
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
        let state = self.state()?;
        Ok(state.logs.iter().any(|l| {
            l.user_id == user_id
                && l.progression_id == progression_id
                && l.lift_id == lift_id
                && l.trigger_key == trigger_key
        }))
    }

    fn enrollment(&self, user_id: &str) -> Result<Option<Enrollment>> {
        Ok(self.state()?.enrollments.get(user_id).cloned())
    }

    fn save_enrollment(&self, enrollment: &Enrollment) -> Result<()> {
        self.state()?
            .enrollments
            .insert(enrollment.user_id.clone(), enrollment.clone());
        Ok(())
    }

    fn update_enrollment(
        &self,
        user_id: &str,
        f: &mut dyn FnMut(&mut Enrollment) -> Result<()>,
    ) -> Result<Enrollment> {
        let mut state = self.state()?;
        let current = state
            .enrollments
            .get(user_id)
            .ok_or_else(|| Error::not_found("enrollment", user_id))?;

        let mut updated = current.clone();
        f(&mut updated)?;
        state
            .enrollments
            .insert(user_id.to_string(), updated.clone());
        Ok(updated)
    }

    fn delete_enrollment(&self, user_id: &str) -> Result<bool> {
        Ok(self.state()?.enrollments.remove(user_id).is_some())
    }

    fn session(&self, session_id: Uuid) -> Result<Option<WorkoutSession>> {
        Ok(self.state()?.sessions.get(&session_id).cloned())
    }

    fn active_session(&self, user_id: &str) -> Result<Option<WorkoutSession>> {
        let state = self.state()?;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.status == SessionStatus::InProgress)
            .cloned())
    }

    fn save_session(&self, session: &WorkoutSession) -> Result<()> {
        self.state()?.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn append_set(&self, set: &LoggedSet) -> Result<()> {
        self.state()?.sets.push(set.clone());
        Ok(())
    }

    fn session_sets(&self, session_id: Uuid) -> Result<Vec<LoggedSet>> {
        let state = self.state()?;
        Ok(state
            .sets
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }
}
