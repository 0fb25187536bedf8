//! Enrollment state machine.
//!
//! ```text
//!            enroll
//!              |
//!              v
//!   +------> ACTIVE --advance_week (last week)--> BETWEEN_CYCLES
//!   |          |  ^                                    |
//!   |          +--+ advance_week (week < length)       |
//!   +------------------- next_cycle -------------------+
//! ```
//!
//! Transitions here only mutate the value and describe the events to emit.
//! Persisting and publishing (in that order) is the engine's job.

use crate::events::{Event, EventType};
use crate::{CompletionStatus, Enrollment, EnrollmentStatus, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress snapshot emitted with `QUIT`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompletionSummary {
    pub cycle_iteration: u32,
    pub current_week: u32,
    pub cycles_completed: u32,
    pub weeks_completed: u32,
}

impl Enrollment {
    /// Fresh enrollment at week 1 of cycle 1
    pub fn start(user_id: &str, program_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            program_id: program_id.to_string(),
            cycle_iteration: 1,
            current_week: 1,
            current_day_index: None,
            enrollment_status: EnrollmentStatus::Active,
            cycle_status: CompletionStatus::Pending,
            week_status: CompletionStatus::Pending,
            meet_date: None,
            enrolled_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.enrollment_status == EnrollmentStatus::Active
    }

    /// Fail with `InvalidState` unless the enrollment is ACTIVE
    pub fn require_active(&self, action: &'static str) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::InvalidState {
                action,
                current_state: self.enrollment_status.to_string(),
            })
        }
    }

    pub fn enrolled_event(&self) -> Event {
        Event::new(
            EventType::Enrolled,
            &self.user_id,
            &self.program_id,
            serde_json::json!({
                "cycle_iteration": self.cycle_iteration,
                "week_number": self.current_week,
            }),
        )
    }

    /// Complete the current week.
    ///
    /// Before the last week: move to the next week. On the last week: stop
    /// at the cycle boundary and additionally emit `CYCLE_BOUNDARY_REACHED`.
    pub fn advance_week(&mut self, cycle_length_weeks: u32, now: DateTime<Utc>) -> Result<Vec<Event>> {
        self.require_active("advance week")?;

        let completed_week = self.current_week;
        let week_payload = serde_json::json!({
            "cycle_iteration": self.cycle_iteration,
            "week_number": completed_week,
        });

        let mut events = Vec::new();
        if self.current_week < cycle_length_weeks {
            self.current_week += 1;
            self.week_status = CompletionStatus::Pending;
            self.current_day_index = None;
            self.updated_at = now;

            events.push(Event::new(
                EventType::WeekCompleted,
                &self.user_id,
                &self.program_id,
                week_payload,
            ));
        } else {
            self.enrollment_status = EnrollmentStatus::BetweenCycles;
            self.cycle_status = CompletionStatus::Completed;
            self.week_status = CompletionStatus::Completed;
            self.updated_at = now;

            events.push(Event::new(
                EventType::WeekCompleted,
                &self.user_id,
                &self.program_id,
                week_payload,
            ));
            events.push(Event::new(
                EventType::CycleBoundaryReached,
                &self.user_id,
                &self.program_id,
                serde_json::json!({
                    "cycle_iteration": self.cycle_iteration,
                    "cycle_length_weeks": cycle_length_weeks,
                }),
            ));
        }

        tracing::info!(
            "User {} advanced past week {} of cycle {} ({})",
            self.user_id,
            completed_week,
            self.cycle_iteration,
            self.enrollment_status
        );
        Ok(events)
    }

    /// Leave the cycle boundary and start the next cycle at week 1
    pub fn next_cycle(&mut self, now: DateTime<Utc>) -> Result<Vec<Event>> {
        if self.enrollment_status != EnrollmentStatus::BetweenCycles {
            return Err(Error::InvalidState {
                action: "start next cycle",
                current_state: self.enrollment_status.to_string(),
            });
        }

        self.enrollment_status = EnrollmentStatus::Active;
        self.cycle_iteration += 1;
        self.current_week = 1;
        self.current_day_index = None;
        self.cycle_status = CompletionStatus::Pending;
        self.week_status = CompletionStatus::Pending;
        self.updated_at = now;

        tracing::info!(
            "User {} started cycle {}",
            self.user_id,
            self.cycle_iteration
        );
        Ok(vec![Event::new(
            EventType::CycleStarted,
            &self.user_id,
            &self.program_id,
            serde_json::json!({ "cycle_iteration": self.cycle_iteration }),
        )])
    }

    fn at_cycle_boundary(&self) -> bool {
        self.enrollment_status == EnrollmentStatus::BetweenCycles
            || self.cycle_status == CompletionStatus::Completed
    }

    /// How far the user got, for the `QUIT` snapshot
    pub fn completion_summary(&self, cycle_length_weeks: u32) -> CompletionSummary {
        let at_boundary = self.at_cycle_boundary();
        let cycles_completed = if at_boundary {
            self.cycle_iteration
        } else {
            self.cycle_iteration.saturating_sub(1)
        };

        // Weeks before the current one are done; the current one only counts
        // once marked completed. At the boundary the whole cycle is already
        // counted in cycles_completed.
        let weeks_in_current_cycle = if at_boundary {
            0
        } else {
            let finished_current = u32::from(self.week_status == CompletionStatus::Completed);
            self.current_week.saturating_sub(1) + finished_current
        };

        CompletionSummary {
            cycle_iteration: self.cycle_iteration,
            current_week: self.current_week,
            cycles_completed,
            weeks_completed: cycles_completed * cycle_length_weeks + weeks_in_current_cycle,
        }
    }

    pub fn quit_event(&self, summary: &CompletionSummary) -> Event {
        Event::new(
            EventType::Quit,
            &self.user_id,
            &self.program_id,
            serde_json::json!({
                "cycle_iteration": summary.cycle_iteration,
                "current_week": summary.current_week,
                "cycles_completed": summary.cycles_completed,
                "weeks_completed": summary.weeks_completed,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrolled() -> Enrollment {
        Enrollment::start("u1", "strength-basics", Utc::now())
    }

    #[test]
    fn test_start_state() {
        let e = enrolled();
        assert_eq!(e.cycle_iteration, 1);
        assert_eq!(e.current_week, 1);
        assert_eq!(e.enrollment_status, EnrollmentStatus::Active);
        assert_eq!(e.cycle_status, CompletionStatus::Pending);
        assert_eq!(e.week_status, CompletionStatus::Pending);
        assert_eq!(e.enrolled_event().event_type, EventType::Enrolled);
    }

    #[test]
    fn test_advance_week_mid_cycle() {
        let mut e = enrolled();
        e.current_week = 2;
        e.current_day_index = Some(1);

        let events = e.advance_week(4, Utc::now()).unwrap();

        assert_eq!(e.current_week, 3);
        assert_eq!(e.enrollment_status, EnrollmentStatus::Active);
        assert_eq!(e.week_status, CompletionStatus::Pending);
        assert_eq!(e.current_day_index, None);
        let types: Vec<EventType> = events.iter().map(|ev| ev.event_type).collect();
        assert_eq!(types, vec![EventType::WeekCompleted]);
        assert_eq!(events[0].payload["week_number"], 2);
    }

    #[test]
    fn test_advance_last_week_reaches_boundary() {
        let mut e = enrolled();
        e.current_week = 4;

        let events = e.advance_week(4, Utc::now()).unwrap();

        assert_eq!(e.current_week, 4);
        assert_eq!(e.enrollment_status, EnrollmentStatus::BetweenCycles);
        assert_eq!(e.cycle_status, CompletionStatus::Completed);
        assert_eq!(e.week_status, CompletionStatus::Completed);
        let types: Vec<EventType> = events.iter().map(|ev| ev.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::WeekCompleted, EventType::CycleBoundaryReached]
        );
    }

    #[test]
    fn test_advance_week_between_cycles_is_invalid() {
        let mut e = enrolled();
        e.current_week = 4;
        e.advance_week(4, Utc::now()).unwrap();

        let err = e.advance_week(4, Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
    }

    #[test]
    fn test_next_cycle_from_active_is_invalid() {
        let mut e = enrolled();
        let err = e.next_cycle(Utc::now()).unwrap_err();
        match err {
            Error::InvalidState { current_state, .. } => assert_eq!(current_state, "ACTIVE"),
            other => panic!("expected InvalidState, got {:?}", other),
        }
    }

    #[test]
    fn test_next_cycle_resets_position() {
        let mut e = enrolled();
        e.current_week = 4;
        e.current_day_index = Some(0);
        e.advance_week(4, Utc::now()).unwrap();

        let events = e.next_cycle(Utc::now()).unwrap();

        assert_eq!(e.cycle_iteration, 2);
        assert_eq!(e.current_week, 1);
        assert_eq!(e.current_day_index, None);
        assert_eq!(e.enrollment_status, EnrollmentStatus::Active);
        assert_eq!(e.cycle_status, CompletionStatus::Pending);
        assert_eq!(events[0].event_type, EventType::CycleStarted);
    }

    #[test]
    fn test_summary_mid_cycle_pending_week() {
        let mut e = enrolled();
        e.current_week = 3;
        let summary = e.completion_summary(4);
        assert_eq!(summary.cycles_completed, 0);
        assert_eq!(summary.weeks_completed, 2);
    }

    #[test]
    fn test_summary_counts_completed_current_week() {
        let mut e = enrolled();
        e.cycle_iteration = 2;
        e.current_week = 3;
        e.week_status = CompletionStatus::Completed;
        let summary = e.completion_summary(4);
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(summary.weeks_completed, 4 + 3);
    }

    #[test]
    fn test_summary_at_boundary() {
        let mut e = enrolled();
        e.current_week = 4;
        e.advance_week(4, Utc::now()).unwrap();
        let summary = e.completion_summary(4);
        assert_eq!(summary.cycles_completed, 1);
        assert_eq!(summary.weeks_completed, 4);
    }
}
