//! Progression engine: advancing a user's max when a trigger fires.
//!
//! Triggers arrive two ways:
//! - automatically, as events from the bus (`SET_LOGGED`, `WEEK_COMPLETED`,
//!   `CYCLE_BOUNDARY_REACHED`)
//! - manually, through [`ProgressionEngine::trigger`]
//!
//! Every application is keyed by (user, progression, lift, trigger key) and
//! is skipped if that key was already applied, unless forced. The trigger key
//! is the session id for `AFTER_SESSION`, `c{cycle}:w{week}` for `AFTER_WEEK`
//! and `c{cycle}` for `AFTER_CYCLE`.
//!
//! Applications for one (user, lift) are serialized in-process, and the store
//! rejects a commit whose previous max is stale, so concurrent writers never
//! lose an increment.

use crate::events::{Event, EventConsumer, EventType};
use crate::{
    Catalog, Enrollment, Error, FieldError, LiftMax, Progression, ProgressionConfig,
    ProgressionLog, Result, TrainingStore, TriggerType,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Applied,
    Skipped,
    Error,
}

/// What happened for one lift
#[derive(Clone, Debug, Serialize)]
pub struct LiftOutcome {
    pub lift_id: String,
    pub progression_id: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProgressionLog>,
}

#[derive(Clone, Debug, Serialize, Default)]
pub struct TriggerReport {
    pub results: Vec<LiftOutcome>,
    pub total_applied: usize,
    pub total_skipped: usize,
    pub total_errors: usize,
}

impl TriggerReport {
    fn push(&mut self, outcome: LiftOutcome) {
        match outcome.status {
            OutcomeStatus::Applied => self.total_applied += 1,
            OutcomeStatus::Skipped => self.total_skipped += 1,
            OutcomeStatus::Error => self.total_errors += 1,
        }
        self.results.push(outcome);
    }
}

/// One (config, lift) pair to evaluate
struct Target<'c> {
    config: &'c ProgressionConfig,
    progression: &'c Progression,
    lift_id: String,
}

/// Where a trigger came from, recorded in the audit log
struct Trigger<'a> {
    trigger_type: TriggerType,
    key: String,
    force: bool,
    context: serde_json::Value,
    user_id: &'a str,
}

pub fn week_key(cycle_iteration: u32, week_number: u32) -> String {
    format!("c{}:w{}", cycle_iteration, week_number)
}

pub fn cycle_key(cycle_iteration: u32) -> String {
    format!("c{}", cycle_iteration)
}

pub struct ProgressionEngine {
    catalog: Arc<Catalog>,
    store: Arc<dyn TrainingStore>,
    locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    max_retries: u32,
}

impl ProgressionEngine {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn TrainingStore>) -> Self {
        Self {
            catalog,
            store,
            locks: Mutex::new(HashMap::new()),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Apply a progression on request.
    ///
    /// Without `lift_id`, every lift the progression covers for the user's
    /// program is evaluated and reported separately.
    pub fn trigger(
        &self,
        user_id: &str,
        progression_id: &str,
        lift_id: Option<&str>,
        force: bool,
    ) -> Result<TriggerReport> {
        let progression = self.catalog.progression(progression_id)?;
        let enrollment = self
            .store
            .enrollment(user_id)?
            .ok_or_else(|| Error::not_found("enrollment", user_id))?;

        let configs: Vec<&ProgressionConfig> = self
            .catalog
            .enabled_configs(&enrollment.program_id)
            .into_iter()
            .filter(|c| c.progression_id == progression_id)
            .collect();
        if configs.is_empty() {
            return Err(Error::invalid(
                "progression_id",
                format!(
                    "'{}' is not configured for program '{}'",
                    progression_id, enrollment.program_id
                ),
            ));
        }

        let targets = match lift_id {
            Some(lift) => {
                // An explicitly named lift is evaluated even without a max,
                // so the caller sees why it failed
                let config = configs
                    .iter()
                    .find(|c| c.lift_id.as_deref() == Some(lift))
                    .or_else(|| configs.iter().find(|c| c.lift_id.is_none()))
                    .copied()
                    .ok_or_else(|| {
                        Error::Validation(vec![FieldError::new(
                            "lift_id",
                            format!("'{}' is not covered by '{}'", lift, progression_id),
                        )])
                    })?;
                vec![Target {
                    config,
                    progression,
                    lift_id: lift.to_string(),
                }]
            }
            None => self.expand(user_id, &configs)?,
        };

        let trigger_type = progression.rule.trigger_type();
        let key = self.manual_key(&enrollment, trigger_type)?;
        let trigger = Trigger {
            trigger_type,
            key,
            force,
            context: serde_json::json!({
                "manual": true,
                "force": force,
                "cycle_iteration": enrollment.cycle_iteration,
                "week_number": enrollment.current_week,
            }),
            user_id,
        };

        Ok(self.run(&targets, &trigger))
    }

    /// Evaluate the progressions an event triggers
    pub fn handle_event(&self, event: &Event) -> Result<TriggerReport> {
        let (trigger_type, key, only_lift) = match event.event_type {
            EventType::SetLogged => {
                let session_id = payload_str(event, "session_id")?;
                let lift_id = payload_str(event, "lift_id")?;
                (TriggerType::AfterSession, session_id, Some(lift_id))
            }
            EventType::WeekCompleted => {
                let cycle = payload_u32(event, "cycle_iteration")?;
                let week = payload_u32(event, "week_number")?;
                (TriggerType::AfterWeek, week_key(cycle, week), None)
            }
            EventType::CycleBoundaryReached => {
                let cycle = payload_u32(event, "cycle_iteration")?;
                (TriggerType::AfterCycle, cycle_key(cycle), None)
            }
            _ => return Ok(TriggerReport::default()),
        };

        let configs: Vec<&ProgressionConfig> = self
            .catalog
            .enabled_configs(&event.program_id)
            .into_iter()
            .filter(|c| {
                self.catalog
                    .progression(&c.progression_id)
                    .map(|p| p.rule.trigger_type() == trigger_type)
                    .unwrap_or(false)
            })
            .collect();
        if configs.is_empty() {
            return Ok(TriggerReport::default());
        }

        let mut targets = self.expand(&event.user_id, &configs)?;
        if let Some(lift) = &only_lift {
            targets.retain(|t| &t.lift_id == lift);
        }

        let trigger = Trigger {
            trigger_type,
            key,
            force: false,
            context: serde_json::json!({
                "manual": false,
                "force": false,
                "event_id": event.id,
                "event_type": event.event_type,
            }),
            user_id: &event.user_id,
        };

        Ok(self.run(&targets, &trigger))
    }

    /// Expand configs into (config, lift) targets in priority order.
    ///
    /// A wildcard config covers every lift the user holds a max of the
    /// progression's max type for, except lifts that have their own config
    /// for the same progression.
    fn expand<'s>(
        &'s self,
        user_id: &str,
        configs: &[&'s ProgressionConfig],
    ) -> Result<Vec<Target<'s>>> {
        let specific: HashSet<(&str, &str)> = configs
            .iter()
            .filter_map(|c| c.lift_id.as_deref().map(|l| (c.progression_id.as_str(), l)))
            .collect();

        let mut targets = Vec::new();
        for &config in configs {
            let Some(progression) = self.catalog.progressions.get(&config.progression_id) else {
                tracing::warn!(
                    "Config for {} references unknown progression",
                    config.progression_id
                );
                continue;
            };

            match &config.lift_id {
                Some(lift) => targets.push(Target {
                    config,
                    progression,
                    lift_id: lift.clone(),
                }),
                None => {
                    for lift in self
                        .store
                        .lifts_with_max(user_id, progression.rule.max_type())?
                    {
                        if specific.contains(&(config.progression_id.as_str(), lift.as_str())) {
                            continue;
                        }
                        targets.push(Target {
                            config,
                            progression,
                            lift_id: lift,
                        });
                    }
                }
            }
        }
        Ok(targets)
    }

    fn manual_key(&self, enrollment: &Enrollment, trigger_type: TriggerType) -> Result<String> {
        Ok(match trigger_type {
            TriggerType::AfterSession => match self.store.active_session(&enrollment.user_id)? {
                Some(session) => session.id.to_string(),
                None => format!(
                    "manual:{}",
                    week_key(enrollment.cycle_iteration, enrollment.current_week)
                ),
            },
            TriggerType::AfterWeek => week_key(enrollment.cycle_iteration, enrollment.current_week),
            TriggerType::AfterCycle => cycle_key(enrollment.cycle_iteration),
        })
    }

    fn run(&self, targets: &[Target<'_>], trigger: &Trigger<'_>) -> TriggerReport {
        let mut report = TriggerReport::default();
        for target in targets {
            let outcome = match self.apply(target, trigger) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        "Progression {} failed for {}/{}: {}",
                        target.progression.id,
                        trigger.user_id,
                        target.lift_id,
                        e
                    );
                    LiftOutcome {
                        lift_id: target.lift_id.clone(),
                        progression_id: target.progression.id.clone(),
                        status: OutcomeStatus::Error,
                        reason: Some(e.public_message()),
                        result: None,
                    }
                }
            };
            report.push(outcome);
        }
        report
    }

    fn lock_for(&self, user_id: &str, lift_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::Internal("progression lock table poisoned".into()))?;
        Ok(locks
            .entry((user_id.to_string(), lift_id.to_string()))
            .or_default()
            .clone())
    }

    fn apply(&self, target: &Target<'_>, trigger: &Trigger<'_>) -> Result<LiftOutcome> {
        let user_id = trigger.user_id;
        let lift_id = target.lift_id.as_str();
        let increment = target
            .config
            .override_increment
            .unwrap_or_else(|| target.progression.rule.increment());

        let lock = self.lock_for(user_id, lift_id)?;
        let outcome = match lock.lock() {
            Ok(_guard) => self.apply_locked(target, trigger, increment),
            Err(_) => Err(Error::Internal(format!(
                "lock for {}/{} poisoned",
                user_id, lift_id
            ))),
        };
        self.release_lock(user_id, lift_id, lock);
        outcome
    }

    /// Drop the table entry unless another apply still holds or waits on it
    fn release_lock(&self, user_id: &str, lift_id: &str, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // One reference in the table, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&(user_id.to_string(), lift_id.to_string()));
        }
    }

    fn apply_locked(
        &self,
        target: &Target<'_>,
        trigger: &Trigger<'_>,
        increment: f64,
    ) -> Result<LiftOutcome> {
        let progression = target.progression;
        let user_id = trigger.user_id;
        let lift_id = target.lift_id.as_str();
        let max_type = progression.rule.max_type();

        let mut attempt = 0;
        loop {
            if !trigger.force
                && self
                    .store
                    .progression_applied(user_id, &progression.id, lift_id, &trigger.key)?
            {
                tracing::debug!(
                    "Skipping {} for {}/{}: already applied for {}",
                    progression.id,
                    user_id,
                    lift_id,
                    trigger.key
                );
                return Ok(LiftOutcome {
                    lift_id: lift_id.to_string(),
                    progression_id: progression.id.clone(),
                    status: OutcomeStatus::Skipped,
                    reason: Some(format!("already applied for {}", trigger.key)),
                    result: None,
                });
            }

            let current = self
                .store
                .current_max(user_id, lift_id, max_type)?
                .ok_or_else(|| {
                    Error::not_found("max", format!("{}/{}/{}", user_id, lift_id, max_type))
                })?;

            let now = Utc::now();
            let new_value = current.value + increment;
            let max = LiftMax::new(user_id, lift_id, max_type, new_value, now);
            let log = ProgressionLog {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                progression_id: progression.id.clone(),
                lift_id: lift_id.to_string(),
                previous_value: current.value,
                new_value,
                delta: increment,
                trigger_type: trigger.trigger_type,
                trigger_key: trigger.key.clone(),
                trigger_context: trigger.context.clone(),
                applied_at: now,
            };

            match self.store.commit_progression(current.id, max, log.clone()) {
                Ok(()) => {
                    tracing::info!(
                        "Applied {} to {}/{}: {} -> {} ({})",
                        progression.id,
                        user_id,
                        lift_id,
                        current.value,
                        new_value,
                        trigger.key
                    );
                    return Ok(LiftOutcome {
                        lift_id: lift_id.to_string(),
                        progression_id: progression.id.clone(),
                        status: OutcomeStatus::Applied,
                        reason: None,
                        result: Some(log),
                    });
                }
                Err(Error::Conflict(msg)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(
                        "Retrying {} for {}/{} (attempt {}): {}",
                        progression.id,
                        user_id,
                        lift_id,
                        attempt,
                        msg
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl EventConsumer for ProgressionEngine {
    fn name(&self) -> &str {
        "progression"
    }

    fn interested_in(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::SetLogged | EventType::WeekCompleted | EventType::CycleBoundaryReached
        )
    }

    fn handle(&self, event: &Event) -> Result<()> {
        let report = self.handle_event(event)?;
        if report.total_applied > 0 {
            tracing::info!(
                "{} progression(s) applied after {} for {}",
                report.total_applied,
                event.event_type,
                event.user_id
            );
        }
        if report.total_errors > 0 {
            return Err(Error::Internal(format!(
                "{} progression(s) failed after {}",
                report.total_errors, event.event_type
            )));
        }
        Ok(())
    }
}

fn payload_str(event: &Event, field: &str) -> Result<String> {
    event
        .payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Internal(format!("{} event missing {}", event.event_type, field)))
}

fn payload_u32(event: &Event, field: &str) -> Result<u32> {
    event
        .payload
        .get(field)
        .and_then(|v| v.as_u64())
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Error::Internal(format!("{} event missing {}", event.event_type, field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build_default_catalog, ErrorKind, FileStore, MaxType, MemoryStore, ProgressionRule,
        SessionStatus, WorkoutSession,
    };
    use chrono::Duration;

    fn catalog() -> Catalog {
        let mut catalog = build_default_catalog();
        catalog.progressions.insert(
            "squat-session".into(),
            Progression {
                id: "squat-session".into(),
                name: "Squat +5 per session".into(),
                rule: ProgressionRule::Linear {
                    increment: 5.0,
                    max_type: MaxType::TrainingMax,
                    trigger_type: TriggerType::AfterSession,
                },
            },
        );
        catalog.progression_configs.push(ProgressionConfig {
            program_id: "strength-basics".into(),
            progression_id: "squat-session".into(),
            lift_id: Some("squat".into()),
            priority: 0,
            enabled: true,
            override_increment: None,
        });
        catalog
    }

    fn seeded(store: &dyn TrainingStore, maxes: &[(&str, f64)]) {
        for (lift, value) in maxes {
            store
                .record_max(LiftMax::new(
                    "u1",
                    *lift,
                    MaxType::TrainingMax,
                    *value,
                    Utc::now() - Duration::days(1),
                ))
                .unwrap();
        }
        store
            .save_enrollment(&Enrollment::start("u1", "strength-basics", Utc::now()))
            .unwrap();
    }

    fn engine_with(catalog: Catalog, maxes: &[(&str, f64)]) -> (ProgressionEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        seeded(store.as_ref(), maxes);
        (ProgressionEngine::new(Arc::new(catalog), store.clone()), store)
    }

    fn tm(store: &dyn TrainingStore, lift: &str) -> f64 {
        store
            .current_max("u1", lift, MaxType::TrainingMax)
            .unwrap()
            .unwrap()
            .value
    }

    fn start_session(store: &dyn TrainingStore) -> Uuid {
        let session = WorkoutSession {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            program_id: "strength-basics".into(),
            cycle_iteration: 1,
            week_number: 1,
            day_slug: "lower".into(),
            status: SessionStatus::InProgress,
            started_at: Utc::now(),
            finished_at: None,
        };
        store.save_session(&session).unwrap();
        session.id
    }

    #[test]
    fn test_same_session_applies_once() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0)]);
        let session_id = start_session(store.as_ref());

        let first = engine.trigger("u1", "squat-session", Some("squat"), false).unwrap();
        assert_eq!(first.total_applied, 1);
        let log = first.results[0].result.as_ref().unwrap();
        assert_eq!(log.trigger_key, session_id.to_string());
        assert_eq!(log.trigger_context["manual"], true);
        assert_eq!(log.trigger_context["force"], false);

        let second = engine.trigger("u1", "squat-session", Some("squat"), false).unwrap();
        assert_eq!(second.total_applied, 0);
        assert_eq!(second.total_skipped, 1);
        assert_eq!(second.results[0].status, OutcomeStatus::Skipped);
        assert_eq!(tm(store.as_ref(), "squat"), 305.0);
    }

    #[test]
    fn test_force_accumulates() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0)]);
        start_session(store.as_ref());

        engine.trigger("u1", "squat-session", Some("squat"), true).unwrap();
        assert_eq!(tm(store.as_ref(), "squat"), 305.0);
        engine.trigger("u1", "squat-session", Some("squat"), true).unwrap();
        assert_eq!(tm(store.as_ref(), "squat"), 310.0);

        let logs = store.progression_logs("u1").unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].previous_value, 305.0);
        assert_eq!(logs[1].delta, 5.0);
    }

    #[test]
    fn test_manual_without_lift_covers_every_configured_lift() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0), ("deadlift", 400.0)]);

        let report = engine.trigger("u1", "lower-cycle", None, false).unwrap();

        assert_eq!(report.total_applied, 2);
        assert_eq!(report.results.len(), 2);
        let lifts: Vec<&str> = report.results.iter().map(|r| r.lift_id.as_str()).collect();
        assert!(lifts.contains(&"squat") && lifts.contains(&"deadlift"));
        assert_eq!(tm(store.as_ref(), "squat"), 310.0);
        assert_eq!(tm(store.as_ref(), "deadlift"), 410.0);
    }

    #[test]
    fn test_wildcard_expands_to_lifts_with_max() {
        let mut catalog = catalog();
        catalog.progressions.insert(
            "all-cycle".into(),
            Progression {
                id: "all-cycle".into(),
                name: "Everything +1".into(),
                rule: ProgressionRule::Cycle {
                    increment: 1.0,
                    max_type: MaxType::TrainingMax,
                },
            },
        );
        catalog.progression_configs.push(ProgressionConfig {
            program_id: "strength-basics".into(),
            progression_id: "all-cycle".into(),
            lift_id: None,
            priority: 5,
            enabled: true,
            override_increment: Some(2.0),
        });
        let (engine, store) = engine_with(
            catalog,
            &[("squat", 300.0), ("bench-press", 200.0), ("deadlift", 400.0)],
        );

        let report = engine.trigger("u1", "all-cycle", None, false).unwrap();

        assert_eq!(report.total_applied, 3);
        // Override beats the rule's own increment
        assert_eq!(tm(store.as_ref(), "bench-press"), 202.0);
    }

    #[test]
    fn test_cycle_event_applies_in_priority_order_and_is_idempotent() {
        let mut catalog = catalog();
        catalog.progressions.insert(
            "squat-bonus".into(),
            Progression {
                id: "squat-bonus".into(),
                name: "Squat bonus".into(),
                rule: ProgressionRule::Cycle {
                    increment: 2.5,
                    max_type: MaxType::TrainingMax,
                },
            },
        );
        catalog.progression_configs.push(ProgressionConfig {
            program_id: "strength-basics".into(),
            progression_id: "squat-bonus".into(),
            lift_id: Some("squat".into()),
            priority: 0,
            enabled: true,
            override_increment: None,
        });
        let (engine, store) = engine_with(catalog, &[("squat", 300.0), ("bench-press", 200.0)]);

        let event = Event::new(
            EventType::CycleBoundaryReached,
            "u1",
            "strength-basics",
            serde_json::json!({ "cycle_iteration": 1, "cycle_length_weeks": 4 }),
        );
        let report = engine.handle_event(&event).unwrap();

        // squat-bonus (0) before lower-cycle (1); deadlift and press have no max
        let applied: Vec<(&str, &str)> = report
            .results
            .iter()
            .filter(|r| r.status == OutcomeStatus::Applied)
            .map(|r| (r.progression_id.as_str(), r.lift_id.as_str()))
            .collect();
        assert_eq!(applied[0], ("squat-bonus", "squat"));
        assert!(applied.contains(&("lower-cycle", "squat")));
        assert!(applied.contains(&("upper-cycle", "bench-press")));
        assert_eq!(tm(store.as_ref(), "squat"), 312.5);

        let again = engine.handle_event(&event).unwrap();
        assert_eq!(again.total_applied, 0);
        assert_eq!(tm(store.as_ref(), "squat"), 312.5);
    }

    #[test]
    fn test_set_logged_only_touches_logged_lift() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0), ("deadlift", 400.0)]);
        let session_id = Uuid::new_v4();
        let event = Event::new(
            EventType::SetLogged,
            "u1",
            "strength-basics",
            serde_json::json!({
                "session_id": session_id.to_string(),
                "lift_id": "squat",
                "prescription_id": "squat-ramp",
            }),
        );

        let report = engine.handle_event(&event).unwrap();
        assert_eq!(report.total_applied, 1);
        assert_eq!(report.results[0].lift_id, "squat");

        // A second set in the same session does not progress again
        let report = engine.handle_event(&event).unwrap();
        assert_eq!(report.total_skipped, 1);
        assert_eq!(tm(store.as_ref(), "squat"), 305.0);
        assert_eq!(tm(store.as_ref(), "deadlift"), 400.0);
    }

    #[test]
    fn test_week_event_uses_week_key() {
        let mut catalog = catalog();
        for config in &mut catalog.progression_configs {
            if config.progression_id == "press-weekly" {
                config.enabled = true;
            }
        }
        let (engine, store) = engine_with(catalog, &[("overhead-press", 120.0)]);
        let event = Event::new(
            EventType::WeekCompleted,
            "u1",
            "strength-basics",
            serde_json::json!({ "cycle_iteration": 2, "week_number": 3 }),
        );

        let report = engine.handle_event(&event).unwrap();

        assert_eq!(report.total_applied, 1);
        assert_eq!(report.results[0].result.as_ref().unwrap().trigger_key, "c2:w3");
        assert_eq!(tm(store.as_ref(), "overhead-press"), 122.5);
    }

    #[test]
    fn test_manual_trigger_errors() {
        let (engine, _store) = engine_with(catalog(), &[("squat", 300.0)]);

        let err = engine.trigger("u1", "nope", None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = engine.trigger("nobody", "lower-cycle", None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // Disabled for the program
        let err = engine.trigger("u1", "press-weekly", None, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .trigger("u1", "lower-cycle", Some("bench-press"), false)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_missing_max_reported_per_lift() {
        let (engine, _store) = engine_with(catalog(), &[("squat", 300.0)]);

        let report = engine.trigger("u1", "lower-cycle", Some("deadlift"), false).unwrap();

        assert_eq!(report.total_errors, 1);
        assert_eq!(report.results[0].status, OutcomeStatus::Error);
        assert!(report.results[0].reason.as_ref().unwrap().contains("max"));
    }

    fn assert_gap_free(store: &dyn TrainingStore, base: f64, increment: f64, n: usize) {
        assert_eq!(tm(store, "squat"), base + increment * n as f64);

        let mut logs = store.progression_logs("u1").unwrap();
        assert_eq!(logs.len(), n);
        logs.sort_by(|a, b| a.previous_value.total_cmp(&b.previous_value));
        assert_eq!(logs[0].previous_value, base);
        for pair in logs.windows(2) {
            assert_eq!(pair[0].new_value, pair[1].previous_value);
        }
    }

    #[test]
    fn test_concurrent_forced_triggers_lose_nothing() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0)]);
        let engine = Arc::new(engine);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine.trigger("u1", "lower-cycle", Some("squat"), true).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().total_applied, 1);
        }

        assert_gap_free(store.as_ref(), 300.0, 10.0, 8);
    }

    #[test]
    fn test_lock_table_is_empty_once_applies_finish() {
        let (engine, store) = engine_with(catalog(), &[("squat", 300.0), ("deadlift", 400.0)]);
        let engine = Arc::new(engine);

        engine.trigger("u1", "lower-cycle", None, true).unwrap();
        assert!(engine.locks.lock().unwrap().is_empty());

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine.trigger("u1", "lower-cycle", Some("squat"), true).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(engine.locks.lock().unwrap().is_empty());
        assert_eq!(tm(store.as_ref(), "squat"), 370.0);
    }

    #[test]
    fn test_lock_entry_kept_while_held() {
        let (engine, _store) = engine_with(catalog(), &[("squat", 300.0)]);
        let held = engine.lock_for("u1", "squat").unwrap();

        let report = engine.trigger("u1", "lower-cycle", Some("squat"), true).unwrap();
        assert_eq!(report.total_applied, 1);
        // The outstanding handle keeps the entry shared with later applies
        let again = engine.lock_for("u1", "squat").unwrap();
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[test]
    fn test_separate_engines_on_one_file_store_lose_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn TrainingStore> = Arc::new(FileStore::open(temp_dir.path()).unwrap());
        seeded(store.as_ref(), &[("squat", 300.0)]);
        let catalog = Arc::new(catalog());

        // Two engines stand in for two processes: no shared in-process lock
        let engines: Vec<Arc<ProgressionEngine>> = (0..2)
            .map(|_| {
                Arc::new(ProgressionEngine::new(catalog.clone(), store.clone()).with_max_retries(100))
            })
            .collect();

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let engine = engines[i % 2].clone();
                std::thread::spawn(move || {
                    engine.trigger("u1", "lower-cycle", Some("squat"), true).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().total_applied, 1);
        }

        assert_gap_free(store.as_ref(), 300.0, 10.0, 6);
    }
}
