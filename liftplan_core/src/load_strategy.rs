//! Load strategies: turning a user's reference max into a working weight.

use crate::{Error, FieldError, MaxLookup, MaxType, Result};
use serde::{Deserialize, Serialize};

/// How a raw weight snaps to the nearest loadable increment
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingDirection {
    #[default]
    Nearest,
    Up,
    Down,
}

/// Load strategy variants, selected by the `type` field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadStrategy {
    /// A percentage of the user's current max of `reference_type`
    PercentOf {
        reference_type: MaxType,
        percentage: f64,
        #[serde(default)]
        rounding_increment: Option<f64>,
        #[serde(default)]
        rounding_direction: Option<RoundingDirection>,
    },
}

impl LoadStrategy {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        match self {
            LoadStrategy::PercentOf {
                percentage,
                rounding_increment,
                ..
            } => {
                if !(percentage.is_finite() && *percentage > 0.0) {
                    errors.push(FieldError::new(
                        "load_strategy.percentage",
                        format!("must be > 0, got {}", percentage),
                    ));
                }
                if let Some(increment) = rounding_increment {
                    if !(increment.is_finite() && *increment > 0.0) {
                        errors.push(FieldError::new(
                            "load_strategy.rounding_increment",
                            format!("must be > 0, got {}", increment),
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// The max type this strategy reads
    pub fn reference_type(&self) -> MaxType {
        match self {
            LoadStrategy::PercentOf { reference_type, .. } => *reference_type,
        }
    }

    /// The strategy's own percentage
    pub fn percentage(&self) -> f64 {
        match self {
            LoadStrategy::PercentOf { percentage, .. } => *percentage,
        }
    }

    /// Weight for this prescription
    pub fn weight(&self, lookup: &dyn MaxLookup, user_id: &str, lift_id: &str) -> Result<f64> {
        self.weight_at(lookup, user_id, lift_id, self.percentage())
    }

    /// Weight at an arbitrary percentage, through the same max and rounding
    /// pipeline. Ramp set schemes use this for each step.
    pub fn weight_at(
        &self,
        lookup: &dyn MaxLookup,
        user_id: &str,
        lift_id: &str,
        percentage: f64,
    ) -> Result<f64> {
        match self {
            LoadStrategy::PercentOf {
                reference_type,
                rounding_increment,
                rounding_direction,
                ..
            } => {
                let max = lookup
                    .current_max(user_id, lift_id, *reference_type)?
                    .ok_or_else(|| Error::MaxNotFound {
                        user_id: user_id.to_string(),
                        lift_id: lift_id.to_string(),
                        max_type: *reference_type,
                    })?;

                let raw = max.value * percentage / 100.0;
                let weight = round_weight(raw, *rounding_increment, *rounding_direction);

                tracing::debug!(
                    "{}% of {} {} ({}) = {} (raw {})",
                    percentage,
                    reference_type,
                    lift_id,
                    max.value,
                    weight,
                    raw
                );
                Ok(weight)
            }
        }
    }
}

/// Snap `raw` to a multiple of `increment`. No increment means no rounding.
pub fn round_weight(
    raw: f64,
    increment: Option<f64>,
    direction: Option<RoundingDirection>,
) -> f64 {
    let Some(increment) = increment.filter(|i| *i > 0.0) else {
        return raw;
    };

    let steps = raw / increment;
    let snapped = match direction.unwrap_or_default() {
        RoundingDirection::Nearest => steps.round(),
        RoundingDirection::Up => steps.ceil(),
        RoundingDirection::Down => steps.floor(),
    };
    snapped * increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LiftMax, MemoryStore, TrainingStore};
    use chrono::Utc;

    fn store_with_max(value: f64) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .record_max(LiftMax::new(
                "u1",
                "squat",
                MaxType::TrainingMax,
                value,
                Utc::now(),
            ))
            .unwrap();
        store
    }

    fn percent_of(
        percentage: f64,
        increment: Option<f64>,
        direction: Option<RoundingDirection>,
    ) -> LoadStrategy {
        LoadStrategy::PercentOf {
            reference_type: MaxType::TrainingMax,
            percentage,
            rounding_increment: increment,
            rounding_direction: direction,
        }
    }

    #[test]
    fn test_percent_of_without_rounding() {
        let store = store_with_max(300.0);
        let weight = percent_of(75.0, None, None)
            .weight(&store, "u1", "squat")
            .unwrap();
        assert_eq!(weight, 225.0);
    }

    #[test]
    fn test_rounding_directions() {
        assert_eq!(
            round_weight(307.4, Some(5.0), Some(RoundingDirection::Nearest)),
            305.0
        );
        assert_eq!(
            round_weight(307.4, Some(5.0), Some(RoundingDirection::Up)),
            310.0
        );
        assert_eq!(
            round_weight(307.4, Some(5.0), Some(RoundingDirection::Down)),
            305.0
        );
        assert_eq!(round_weight(307.4, None, Some(RoundingDirection::Up)), 307.4);
    }

    #[test]
    fn test_increment_without_direction_rounds_nearest() {
        assert_eq!(round_weight(308.0, Some(5.0), None), 310.0);
    }

    #[test]
    fn test_weight_uses_rounding_pipeline() {
        // 88% of 350 = 308 -> nearest 2.5 = 307.5
        let store = store_with_max(350.0);
        let weight = percent_of(88.0, Some(2.5), Some(RoundingDirection::Nearest))
            .weight(&store, "u1", "squat")
            .unwrap();
        assert_eq!(weight, 307.5);
    }

    #[test]
    fn test_missing_max_is_max_not_found() {
        let store = MemoryStore::new();
        let err = percent_of(75.0, None, None)
            .weight(&store, "u1", "squat")
            .unwrap_err();
        assert!(matches!(err, Error::MaxNotFound { .. }));
    }

    #[test]
    fn test_missing_max_of_other_type_is_not_used() {
        let store = MemoryStore::new();
        store
            .record_max(LiftMax::new("u1", "squat", MaxType::OneRm, 400.0, Utc::now()))
            .unwrap();
        let result = percent_of(75.0, None, None).weight(&store, "u1", "squat");
        assert!(matches!(result, Err(Error::MaxNotFound { .. })));
    }

    #[test]
    fn test_deserialize_by_discriminator() {
        let strategy: LoadStrategy = serde_json::from_value(serde_json::json!({
            "type": "PERCENT_OF",
            "reference_type": "ONE_RM",
            "percentage": 80.0,
            "rounding_increment": 5.0,
            "rounding_direction": "DOWN"
        }))
        .unwrap();
        strategy.validate().unwrap();
        assert_eq!(strategy.reference_type(), MaxType::OneRm);
        assert_eq!(strategy.percentage(), 80.0);
    }

    #[test]
    fn test_unknown_type_does_not_deserialize() {
        let result = serde_json::from_value::<LoadStrategy>(serde_json::json!({
            "type": "RPE_TARGET",
            "rpe": 8
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_percentage() {
        let strategy: LoadStrategy = serde_json::from_value(serde_json::json!({
            "type": "PERCENT_OF",
            "reference_type": "TRAINING_MAX",
            "percentage": 0.0,
            "rounding_increment": -5.0
        }))
        .unwrap();
        match strategy.validate().unwrap_err() {
            Error::Validation(fields) => assert_eq!(fields.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
