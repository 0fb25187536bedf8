//! Workout sessions: the sets a user actually performs.
//!
//! Logging a set publishes `SET_LOGGED`, which is what drives per-session
//! progressions. Finishing a session moves the enrollment to the next
//! scheduled day of the week.

use crate::events::{Event, EventBus, EventType};
use crate::workout::select_day;
use crate::{
    Catalog, Enrollment, Error, FieldError, LoggedSet, Result, SessionStatus, SetScheme,
    TrainingStore, WorkoutSession,
};
use chrono::Utc;
use uuid::Uuid;

pub struct SessionService<'a> {
    catalog: &'a Catalog,
    store: &'a dyn TrainingStore,
    bus: &'a EventBus,
}

impl<'a> SessionService<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a dyn TrainingStore, bus: &'a EventBus) -> Self {
        Self {
            catalog,
            store,
            bus,
        }
    }

    /// Open a session for the given day, or the enrollment's current one
    pub fn start(&self, user_id: &str, week: Option<u32>, day: Option<&str>) -> Result<WorkoutSession> {
        let enrollment = self
            .store
            .enrollment(user_id)?
            .ok_or_else(|| Error::not_found("enrollment", user_id))?;
        enrollment.require_active("start session")?;

        if let Some(open) = self.store.active_session(user_id)? {
            return Err(Error::Conflict(format!(
                "session {} is already in progress",
                open.id
            )));
        }

        let (week_number, day_slug) = select_day(self.catalog, &enrollment, week, day)?;
        let session = WorkoutSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            program_id: enrollment.program_id.clone(),
            cycle_iteration: enrollment.cycle_iteration,
            week_number,
            day_slug,
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.store.save_session(&session)?;

        tracing::info!(
            "Started session {} for {} ({} week {})",
            session.id,
            user_id,
            session.day_slug,
            week_number
        );
        self.bus.publish(Event::new(
            EventType::SessionStarted,
            user_id,
            &session.program_id,
            serde_json::json!({
                "session_id": session.id,
                "week_number": session.week_number,
                "day_slug": session.day_slug,
            }),
        ));
        Ok(session)
    }

    /// Record one performed set
    pub fn log_set(
        &self,
        user_id: &str,
        session_id: Uuid,
        prescription_id: &str,
        set_number: u32,
        weight: f64,
        reps_performed: u32,
    ) -> Result<LoggedSet> {
        let session = self.owned_session(user_id, session_id)?;
        if session.status != SessionStatus::InProgress {
            return Err(Error::InvalidState {
                action: "log set",
                current_state: format!("{:?}", session.status),
            });
        }

        let mut errors = Vec::new();
        if set_number < 1 {
            errors.push(FieldError::new("set_number", "must be >= 1"));
        }
        if !(weight.is_finite() && weight >= 0.0) {
            errors.push(FieldError::new("weight", format!("must be >= 0, got {}", weight)));
        }
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        let prescription = self.catalog.prescription(prescription_id)?;
        let target_reps = match &prescription.set_scheme {
            SetScheme::Fixed { reps, .. } => Some(*reps),
            SetScheme::Ramp { steps, .. } => steps
                .get(set_number as usize - 1)
                .map(|step| step.reps),
        };

        let set = LoggedSet {
            id: Uuid::new_v4(),
            session_id,
            user_id: user_id.to_string(),
            prescription_id: prescription.id.clone(),
            lift_id: prescription.lift_id.clone(),
            set_number,
            weight,
            target_reps,
            reps_performed,
            logged_at: Utc::now(),
        };
        self.store.append_set(&set)?;

        tracing::debug!(
            "Logged {} set {}: {} x {}",
            prescription_id,
            set_number,
            weight,
            reps_performed
        );
        self.bus.publish(Event::new(
            EventType::SetLogged,
            user_id,
            &session.program_id,
            serde_json::json!({
                "session_id": session_id.to_string(),
                "lift_id": set.lift_id,
                "prescription_id": set.prescription_id,
                "set_number": set_number,
            }),
        ));
        Ok(set)
    }

    /// Complete the session and move the enrollment to the next day
    pub fn finish(&self, user_id: &str, session_id: Uuid) -> Result<WorkoutSession> {
        let session = self.close(user_id, session_id, SessionStatus::Completed)?;

        // The enrollment may have moved on (or gone) since the session began
        let advanced = self.store.update_enrollment(user_id, &mut |enrollment: &mut Enrollment| {
            if enrollment.program_id == session.program_id
                && enrollment.cycle_iteration == session.cycle_iteration
                && enrollment.current_week == session.week_number
            {
                enrollment.current_day_index =
                    Some(enrollment.current_day_index.unwrap_or(0) + 1);
                enrollment.updated_at = Utc::now();
            }
            Ok(())
        });
        match advanced {
            Ok(_) | Err(Error::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let sets_logged = self.store.session_sets(session_id)?.len();
        self.bus.publish(Event::new(
            EventType::SessionCompleted,
            user_id,
            &session.program_id,
            serde_json::json!({
                "session_id": session_id,
                "sets_logged": sets_logged,
            }),
        ));
        Ok(session)
    }

    /// Close the session without advancing the schedule
    pub fn abandon(&self, user_id: &str, session_id: Uuid) -> Result<WorkoutSession> {
        self.close(user_id, session_id, SessionStatus::Abandoned)
    }

    fn close(&self, user_id: &str, session_id: Uuid, status: SessionStatus) -> Result<WorkoutSession> {
        let mut session = self.owned_session(user_id, session_id)?;
        if session.status != SessionStatus::InProgress {
            return Err(Error::InvalidState {
                action: "close session",
                current_state: format!("{:?}", session.status),
            });
        }

        session.status = status;
        session.finished_at = Some(Utc::now());
        self.store.save_session(&session)?;
        tracing::info!("Session {} for {} is now {:?}", session_id, user_id, status);
        Ok(session)
    }

    /// Sessions of other users are reported as missing
    fn owned_session(&self, user_id: &str, session_id: Uuid) -> Result<WorkoutSession> {
        self.store
            .session(session_id)?
            .filter(|s| s.user_id == user_id)
            .ok_or_else(|| Error::not_found("session", session_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_default_catalog, Enrollment, ErrorKind, MemoryStore};

    fn setup() -> (Catalog, MemoryStore, EventBus) {
        let store = MemoryStore::new();
        store
            .save_enrollment(&Enrollment::start("u1", "strength-basics", Utc::now()))
            .unwrap();
        (build_default_catalog(), store, EventBus::new())
    }

    #[test]
    fn test_start_uses_current_day_and_rejects_second_session() {
        let (catalog, store, bus) = setup();
        let sessions = SessionService::new(&catalog, &store, &bus);

        let session = sessions.start("u1", None, None).unwrap();
        assert_eq!(session.day_slug, "lower");
        assert_eq!(session.week_number, 1);

        let err = sessions.start("u1", None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_log_set_publishes_set_logged() {
        let (catalog, store, bus) = setup();
        let sessions = SessionService::new(&catalog, &store, &bus);
        let session = sessions.start("u1", None, None).unwrap();

        let set = sessions
            .log_set("u1", session.id, "squat-ramp", 3, 255.0, 5)
            .unwrap();
        assert_eq!(set.lift_id, "squat");
        assert_eq!(set.target_reps, Some(5));

        let last = bus.recent().pop().unwrap();
        assert_eq!(last.event_type, EventType::SetLogged);
        assert_eq!(last.payload["session_id"], session.id.to_string());
        assert_eq!(last.payload["lift_id"], "squat");
    }

    #[test]
    fn test_log_set_checks_ownership_and_status() {
        let (catalog, store, bus) = setup();
        let sessions = SessionService::new(&catalog, &store, &bus);
        let session = sessions.start("u1", None, None).unwrap();

        let err = sessions
            .log_set("someone-else", session.id, "squat-ramp", 1, 200.0, 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = sessions
            .log_set("u1", session.id, "squat-ramp", 0, -1.0, 5)
            .unwrap_err();
        match err {
            Error::Validation(fields) => assert_eq!(fields.len(), 2),
            other => panic!("expected Validation, got {:?}", other),
        }

        sessions.finish("u1", session.id).unwrap();
        let err = sessions
            .log_set("u1", session.id, "squat-ramp", 1, 200.0, 5)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_finish_advances_day() {
        let (catalog, store, bus) = setup();
        let sessions = SessionService::new(&catalog, &store, &bus);

        let first = sessions.start("u1", None, None).unwrap();
        sessions.log_set("u1", first.id, "squat-ramp", 1, 200.0, 5).unwrap();
        let done = sessions.finish("u1", first.id).unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert!(done.finished_at.is_some());

        let enrollment = store.enrollment("u1").unwrap().unwrap();
        assert_eq!(enrollment.current_day_index, Some(1));

        let second = sessions.start("u1", None, None).unwrap();
        assert_eq!(second.day_slug, "upper");

        let completed = bus
            .recent()
            .into_iter()
            .find(|e| e.event_type == EventType::SessionCompleted)
            .unwrap();
        assert_eq!(completed.payload["sets_logged"], 1);
    }

    #[test]
    fn test_abandon_keeps_position() {
        let (catalog, store, bus) = setup();
        let sessions = SessionService::new(&catalog, &store, &bus);

        let session = sessions.start("u1", None, None).unwrap();
        let abandoned = sessions.abandon("u1", session.id).unwrap();
        assert_eq!(abandoned.status, SessionStatus::Abandoned);
        assert_eq!(store.enrollment("u1").unwrap().unwrap().current_day_index, None);
        assert!(store.active_session("u1").unwrap().is_none());
    }

    #[test]
    fn test_start_without_enrollment() {
        let catalog = build_default_catalog();
        let store = MemoryStore::new();
        let bus = EventBus::new();
        let err = SessionService::new(&catalog, &store, &bus)
            .start("u1", None, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
