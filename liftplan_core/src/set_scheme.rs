//! Set schemes: turning a prescription into an ordered list of sets.

use crate::{Error, FieldError, Result};
use serde::{Deserialize, Serialize};

/// One step of a ramp, as a percentage of the reference max
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RampStep {
    pub percentage: f64,
    pub reps: u32,
}

/// Set scheme variants, selected by the `type` field
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetScheme {
    /// `sets` x `reps` at the prescribed weight
    Fixed { sets: u32, reps: u32 },
    /// Ascending sets; steps at or above the threshold are work sets
    Ramp {
        steps: Vec<RampStep>,
        work_set_threshold: f64,
    },
}

/// Which weight a set needs from the load pipeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SetLoad {
    /// The prescription's own load strategy output
    Prescribed,
    /// The same pipeline at a different percentage
    Percent(f64),
}

/// A concrete set with weight and target reps
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlannedSet {
    pub set_number: u32,
    pub weight: f64,
    pub target_reps: u32,
    pub is_work_set: bool,
}

impl SetScheme {
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        match self {
            SetScheme::Fixed { sets, reps } => {
                if *sets == 0 {
                    errors.push(FieldError::new("set_scheme.sets", "must be > 0"));
                }
                if *reps == 0 {
                    errors.push(FieldError::new("set_scheme.reps", "must be > 0"));
                }
            }
            SetScheme::Ramp {
                steps,
                work_set_threshold,
            } => {
                if steps.is_empty() {
                    errors.push(FieldError::new("set_scheme.steps", "must not be empty"));
                }
                for (i, step) in steps.iter().enumerate() {
                    if !(step.percentage.is_finite() && step.percentage > 0.0) {
                        errors.push(FieldError::new(
                            format!("set_scheme.steps[{}].percentage", i),
                            "must be > 0",
                        ));
                    }
                    if step.reps == 0 {
                        errors.push(FieldError::new(
                            format!("set_scheme.steps[{}].reps", i),
                            "must be > 0",
                        ));
                    }
                }
                if !work_set_threshold.is_finite() || *work_set_threshold < 0.0 {
                    errors.push(FieldError::new(
                        "set_scheme.work_set_threshold",
                        "must be a non-negative percentage",
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Expand into concrete sets, asking `weight_for` for each weight
    pub fn generate<F>(&self, mut weight_for: F) -> Result<Vec<PlannedSet>>
    where
        F: FnMut(SetLoad) -> Result<f64>,
    {
        match self {
            SetScheme::Fixed { sets, reps } => {
                let weight = weight_for(SetLoad::Prescribed)?;
                Ok((1..=*sets)
                    .map(|set_number| PlannedSet {
                        set_number,
                        weight,
                        target_reps: *reps,
                        is_work_set: true,
                    })
                    .collect())
            }
            SetScheme::Ramp {
                steps,
                work_set_threshold,
            } => steps
                .iter()
                .enumerate()
                .map(|(i, step)| -> Result<PlannedSet> {
                    Ok(PlannedSet {
                        set_number: i as u32 + 1,
                        weight: weight_for(SetLoad::Percent(step.percentage))?,
                        target_reps: step.reps,
                        is_work_set: step.percentage >= *work_set_threshold,
                    })
                })
                .collect(),
        }
    }
}
