//! Core domain types for liftplan.
//!
//! This module defines the fundamental records used throughout the system:
//! - Lifts and the append-only max history
//! - Program structure (programs, cycles, weeks, days, prescriptions)
//! - Enrollment state
//! - Progression rules, their per-program configuration and the audit log
//! - Workout sessions and logged sets

use crate::{LoadStrategy, SetScheme};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Lifts and Maxes
// ============================================================================

/// A lift from the catalog (e.g., "Back Squat")
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Lift {
    pub id: String,
    pub name: String,
    pub slug: String,
}

/// Which max a value refers to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaxType {
    OneRm,
    TrainingMax,
}

impl MaxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxType::OneRm => "ONE_RM",
            MaxType::TrainingMax => "TRAINING_MAX",
        }
    }
}

impl fmt::Display for MaxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MaxType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "ONE_RM" | "1RM" => Ok(MaxType::OneRm),
            "TRAINING_MAX" | "TM" => Ok(MaxType::TrainingMax),
            _ => Err(crate::Error::invalid(
                "max_type",
                format!("unknown max type '{}'", s),
            )),
        }
    }
}

/// One row of a user's max history. Rows are never updated in place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LiftMax {
    pub id: Uuid,
    pub user_id: String,
    pub lift_id: String,
    pub max_type: MaxType,
    pub value: f64,
    pub effective_at: DateTime<Utc>,
}

impl LiftMax {
    pub fn new(
        user_id: impl Into<String>,
        lift_id: impl Into<String>,
        max_type: MaxType,
        value: f64,
        effective_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            lift_id: lift_id.into(),
            max_type,
            value,
            effective_at,
        }
    }
}

// ============================================================================
// Program Structure (catalog, read-only)
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Program {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub cycle_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Cycle {
    pub id: String,
    pub name: String,
    pub length_weeks: u32,
}

/// The days scheduled in one week of a cycle, in training order
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Week {
    pub cycle_id: String,
    pub week_number: u32,
    pub days: Vec<String>,
}

/// A workout template: the prescriptions performed on that day
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Day {
    pub slug: String,
    pub name: String,
    pub prescriptions: Vec<String>,
}

/// A planned exercise: lift + how heavy + how many
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    pub lift_id: String,
    pub load_strategy: LoadStrategy,
    pub set_scheme: SetScheme,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub rest_seconds: Option<u32>,
}

// ============================================================================
// Enrollment
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    Active,
    BetweenCycles,
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrollmentStatus::Active => f.write_str("ACTIVE"),
            EnrollmentStatus::BetweenCycles => f.write_str("BETWEEN_CYCLES"),
        }
    }
}

/// Completion state shared by cycles and weeks
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Pending,
    Completed,
}

/// A user's position within a program. At most one per user.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Enrollment {
    pub user_id: String,
    pub program_id: String,
    pub cycle_iteration: u32,
    pub current_week: u32,
    pub current_day_index: Option<usize>,
    pub enrollment_status: EnrollmentStatus,
    pub cycle_status: CompletionStatus,
    pub week_status: CompletionStatus,
    pub meet_date: Option<NaiveDate>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Progressions
// ============================================================================

/// The event class that makes a progression evaluate
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    AfterSession,
    AfterWeek,
    AfterCycle,
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerType::AfterSession => f.write_str("AFTER_SESSION"),
            TriggerType::AfterWeek => f.write_str("AFTER_WEEK"),
            TriggerType::AfterCycle => f.write_str("AFTER_CYCLE"),
        }
    }
}

/// Progression rule variants, selected by the `type` field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressionRule {
    /// Add `increment` after every session or every week
    Linear {
        increment: f64,
        max_type: MaxType,
        trigger_type: TriggerType,
    },
    /// Add `increment` once per completed cycle
    Cycle { increment: f64, max_type: MaxType },
}

impl ProgressionRule {
    pub fn increment(&self) -> f64 {
        match self {
            ProgressionRule::Linear { increment, .. } | ProgressionRule::Cycle { increment, .. } => {
                *increment
            }
        }
    }

    pub fn max_type(&self) -> MaxType {
        match self {
            ProgressionRule::Linear { max_type, .. } | ProgressionRule::Cycle { max_type, .. } => {
                *max_type
            }
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        match self {
            ProgressionRule::Linear { trigger_type, .. } => *trigger_type,
            ProgressionRule::Cycle { .. } => TriggerType::AfterCycle,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Progression {
    pub id: String,
    pub name: String,
    pub rule: ProgressionRule,
}

/// Binds a progression to a program, optionally narrowed to one lift
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressionConfig {
    pub program_id: String,
    pub progression_id: String,
    /// `None` applies to every lift the user holds a max for
    #[serde(default)]
    pub lift_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub override_increment: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

/// Immutable audit record of one applied progression
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProgressionLog {
    pub id: Uuid,
    pub user_id: String,
    pub progression_id: String,
    pub lift_id: String,
    pub previous_value: f64,
    pub new_value: f64,
    pub delta: f64,
    pub trigger_type: TriggerType,
    /// Idempotency key (session id, week or cycle position)
    pub trigger_key: String,
    pub trigger_context: serde_json::Value,
    pub applied_at: DateTime<Utc>,
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSession {
    pub id: Uuid,
    pub user_id: String,
    pub program_id: String,
    pub cycle_iteration: u32,
    pub week_number: u32,
    pub day_slug: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A set the user actually performed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoggedSet {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    pub prescription_id: String,
    pub lift_id: String,
    pub set_number: u32,
    pub weight: f64,
    pub target_reps: Option<u32>,
    pub reps_performed: u32,
    pub logged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MaxType::OneRm).unwrap(),
            "\"ONE_RM\""
        );
        assert_eq!(
            serde_json::to_string(&MaxType::TrainingMax).unwrap(),
            "\"TRAINING_MAX\""
        );
        assert_eq!("tm".parse::<MaxType>().unwrap(), MaxType::TrainingMax);
        assert_eq!("one-rm".parse::<MaxType>().unwrap(), MaxType::OneRm);
        assert!("heaviest".parse::<MaxType>().is_err());
    }

    #[test]
    fn test_cycle_rule_always_fires_after_cycle() {
        let rule = ProgressionRule::Cycle {
            increment: 10.0,
            max_type: MaxType::TrainingMax,
        };
        assert_eq!(rule.trigger_type(), TriggerType::AfterCycle);
        assert_eq!(rule.increment(), 10.0);
    }

    #[test]
    fn test_progression_rule_tagged_by_type() {
        let json = r#"{"type":"LINEAR","increment":2.5,"max_type":"TRAINING_MAX","trigger_type":"AFTER_SESSION"}"#;
        let rule: ProgressionRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.trigger_type(), TriggerType::AfterSession);
        assert_eq!(rule.max_type(), MaxType::TrainingMax);
    }

    #[test]
    fn test_config_defaults_to_enabled_wildcard() {
        let json = r#"{"program_id":"p","progression_id":"lin"}"#;
        let config: ProgressionConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert!(config.lift_id.is_none());
        assert_eq!(config.priority, 0);
    }
}
