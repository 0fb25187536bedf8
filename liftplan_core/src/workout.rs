//! Workout generation: a scheduled day resolved into concrete sets for one user.

use crate::resolver::{resolve_with, CachedMaxLookup, ResolvedPrescription};
use crate::{
    meet_countdown, Catalog, Cycle, Enrollment, Error, FieldError, MaxLookup, Prescription,
    Result, TaperPhase,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;

/// Which day to generate. Unset fields fall back to the enrollment's position.
#[derive(Clone, Debug, Default)]
pub struct WorkoutRequest {
    pub week: Option<u32>,
    pub day: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Serialize)]
pub struct GeneratedWorkout {
    pub user_id: String,
    pub program_id: String,
    pub cycle_iteration: u32,
    pub week_number: u32,
    pub day_slug: String,
    pub day_name: String,
    pub date: NaiveDate,
    pub phase: TaperPhase,
    pub days_out: Option<i64>,
    pub taper_multiplier: f64,
    pub exercises: Vec<ResolvedPrescription>,
}

pub struct WorkoutGenerator<'a> {
    catalog: &'a Catalog,
    maxes: &'a dyn MaxLookup,
    apply_taper: bool,
}

impl<'a> WorkoutGenerator<'a> {
    pub fn new(catalog: &'a Catalog, maxes: &'a dyn MaxLookup) -> Self {
        Self {
            catalog,
            maxes,
            apply_taper: true,
        }
    }

    /// Report the taper phase but leave weights unscaled when `false`
    pub fn with_taper(mut self, apply_taper: bool) -> Self {
        self.apply_taper = apply_taper;
        self
    }

    /// Workout for the requested day, defaulting to the enrollment's current one
    pub fn generate(&self, enrollment: &Enrollment, request: &WorkoutRequest) -> Result<GeneratedWorkout> {
        enrollment.require_active("generate workout")?;
        let (week_number, day_slug) =
            select_day(self.catalog, enrollment, request.week, request.day.as_deref())?;
        self.build(enrollment, week_number, &day_slug, request.date)
    }

    /// Any week and day of the cycle, for planning ahead.
    ///
    /// Unlike `generate`, the day only has to appear somewhere in the cycle,
    /// not in the requested week, so a day can be tried at another week's
    /// position (e.g. next week's heavy day at deload timing).
    pub fn preview(
        &self,
        enrollment: &Enrollment,
        week_number: u32,
        day_slug: &str,
        date: Option<NaiveDate>,
    ) -> Result<GeneratedWorkout> {
        enrollment.require_active("preview workout")?;
        let cycle = self.catalog.cycle_for_program(&enrollment.program_id)?;
        check_week(cycle, week_number)?;

        let in_cycle = self
            .catalog
            .weeks
            .iter()
            .filter(|w| w.cycle_id == cycle.id)
            .any(|w| w.days.iter().any(|d| d == day_slug));
        if !in_cycle {
            return Err(Error::invalid(
                "day",
                format!("'{}' is not scheduled in cycle {}", day_slug, cycle.id),
            ));
        }

        self.build(enrollment, week_number, day_slug, date)
    }

    fn build(
        &self,
        enrollment: &Enrollment,
        week_number: u32,
        day_slug: &str,
        date: Option<NaiveDate>,
    ) -> Result<GeneratedWorkout> {
        let day = self.catalog.day(day_slug)?;
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let countdown = meet_countdown(enrollment.meet_date, date);
        let multiplier = if self.apply_taper {
            countdown.taper_multiplier
        } else {
            1.0
        };

        let mut prescriptions: Vec<&Prescription> = day
            .prescriptions
            .iter()
            .map(|id| self.catalog.prescription(id))
            .collect::<Result<_>>()?;
        prescriptions.sort_by_key(|p| p.order);

        let cached = CachedMaxLookup::new(self.maxes);
        let mut exercises = Vec::with_capacity(prescriptions.len());
        for prescription in prescriptions {
            let mut resolved = resolve_with(self.catalog, &cached, prescription, &enrollment.user_id)?;
            for set in &mut resolved.sets {
                set.weight *= multiplier;
            }
            exercises.push(resolved);
        }

        tracing::info!(
            "Generated {} for {} (week {}, cycle {}, phase {}, x{})",
            day_slug,
            enrollment.user_id,
            week_number,
            enrollment.cycle_iteration,
            countdown.phase,
            multiplier
        );

        Ok(GeneratedWorkout {
            user_id: enrollment.user_id.clone(),
            program_id: enrollment.program_id.clone(),
            cycle_iteration: enrollment.cycle_iteration,
            week_number,
            day_slug: day.slug.clone(),
            day_name: day.name.clone(),
            date,
            phase: countdown.phase,
            days_out: countdown.days_out,
            taper_multiplier: multiplier,
            exercises,
        })
    }
}

fn check_week(cycle: &Cycle, week_number: u32) -> Result<()> {
    if week_number < 1 || week_number > cycle.length_weeks {
        return Err(Error::Validation(vec![FieldError::new(
            "week",
            format!("must be between 1 and {}, got {}", cycle.length_weeks, week_number),
        )]));
    }
    Ok(())
}

/// Pick the (week, day) to train: explicit values win, otherwise the
/// enrollment's current week and day index. The week must exist in the
/// program's cycle and the day must be scheduled in it.
pub(crate) fn select_day(
    catalog: &Catalog,
    enrollment: &Enrollment,
    week: Option<u32>,
    day: Option<&str>,
) -> Result<(u32, String)> {
    let cycle = catalog.cycle_for_program(&enrollment.program_id)?;
    let week_number = week.unwrap_or(enrollment.current_week);
    check_week(cycle, week_number)?;
    let days = catalog
        .week(&cycle.id, week_number)
        .map(|w| w.days.as_slice())
        .ok_or_else(|| {
            Error::invalid(
                "week",
                format!("week {} is not defined for cycle {}", week_number, cycle.id),
            )
        })?;

    let day_slug = match day {
        Some(slug) => {
            if !days.iter().any(|d| d == slug) {
                return Err(Error::invalid(
                    "day",
                    format!("'{}' is not scheduled in week {}", slug, week_number),
                ));
            }
            slug.to_string()
        }
        None => {
            let index = enrollment.current_day_index.unwrap_or(0);
            days.get(index).cloned().ok_or_else(|| {
                Error::invalid(
                    "current_day_index",
                    format!(
                        "all {} days of week {} are done; advance the week",
                        days.len(),
                        week_number
                    ),
                )
            })?
        }
    };
    Ok((week_number, day_slug))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_default_catalog, ErrorKind, LiftMax, MaxType, MemoryStore, TrainingStore};
    use chrono::Duration;

    fn setup() -> (Catalog, MemoryStore, Enrollment) {
        let catalog = build_default_catalog();
        let store = MemoryStore::new();
        for (lift, value) in [
            ("squat", 300.0),
            ("deadlift", 400.0),
            ("bench-press", 200.0),
            ("overhead-press", 120.0),
        ] {
            store
                .record_max(LiftMax::new(
                    "u1",
                    lift,
                    MaxType::TrainingMax,
                    value,
                    Utc::now() - Duration::days(1),
                ))
                .unwrap();
        }
        let enrollment = Enrollment::start("u1", "strength-basics", Utc::now());
        (catalog, store, enrollment)
    }

    #[test]
    fn test_current_day_in_prescription_order() {
        let (catalog, store, enrollment) = setup();
        let workout = WorkoutGenerator::new(&catalog, &store)
            .generate(&enrollment, &WorkoutRequest::default())
            .unwrap();

        assert_eq!(workout.day_slug, "lower");
        assert_eq!(workout.week_number, 1);
        let order: Vec<&str> = workout
            .exercises
            .iter()
            .map(|e| e.prescription_id.as_str())
            .collect();
        assert_eq!(order, vec!["squat-ramp", "deadlift-ramp", "squat-volume"]);
        assert_eq!(workout.phase, TaperPhase::OffSeason);
        assert_eq!(workout.taper_multiplier, 1.0);
    }

    #[test]
    fn test_current_day_index_selects_day() {
        let (catalog, store, mut enrollment) = setup();
        enrollment.current_day_index = Some(1);
        let workout = WorkoutGenerator::new(&catalog, &store)
            .generate(&enrollment, &WorkoutRequest::default())
            .unwrap();
        assert_eq!(workout.day_slug, "upper");
    }

    #[test]
    fn test_taper_scales_weights() {
        let (catalog, store, mut enrollment) = setup();
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        enrollment.meet_date = Some(today + Duration::days(5));

        let request = WorkoutRequest {
            date: Some(today),
            ..Default::default()
        };
        let workout = WorkoutGenerator::new(&catalog, &store)
            .generate(&enrollment, &request)
            .unwrap();

        assert_eq!(workout.phase, TaperPhase::MeetWeek);
        assert_eq!(workout.days_out, Some(5));
        // Top squat set: 255 * 0.40
        let top = workout.exercises[0].sets.last().unwrap();
        assert!((top.weight - 102.0).abs() < 1e-9);

        let unscaled = WorkoutGenerator::new(&catalog, &store)
            .with_taper(false)
            .generate(&enrollment, &request)
            .unwrap();
        assert_eq!(unscaled.exercises[0].sets.last().unwrap().weight, 255.0);
        assert_eq!(unscaled.phase, TaperPhase::MeetWeek);
    }

    #[test]
    fn test_unscheduled_day_is_validation() {
        let (catalog, store, enrollment) = setup();
        let request = WorkoutRequest {
            week: Some(4),
            day: Some("lower".into()),
            date: None,
        };
        let err = WorkoutGenerator::new(&catalog, &store)
            .generate(&enrollment, &request)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_preview_any_cycle_day_at_any_week() {
        let (catalog, store, enrollment) = setup();
        let generator = WorkoutGenerator::new(&catalog, &store);

        // "lower" is not scheduled in week 4, but preview allows it
        let workout = generator.preview(&enrollment, 4, "lower", None).unwrap();
        assert_eq!(workout.week_number, 4);
        assert_eq!(workout.day_slug, "lower");

        let err = generator.preview(&enrollment, 2, "arms", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_week_out_of_range_is_validation() {
        let (catalog, store, enrollment) = setup();
        let err = WorkoutGenerator::new(&catalog, &store)
            .preview(&enrollment, 5, "lower", None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_preview_future_week() {
        let (catalog, store, enrollment) = setup();
        let workout = WorkoutGenerator::new(&catalog, &store)
            .preview(&enrollment, 4, "deload", None)
            .unwrap();
        assert_eq!(workout.week_number, 4);
        // 40% of 300, rounded down to 5
        assert_eq!(workout.exercises[0].sets[0].weight, 120.0);
    }

    #[test]
    fn test_between_cycles_is_invalid_state() {
        let (catalog, store, mut enrollment) = setup();
        enrollment.current_week = 4;
        enrollment.advance_week(4, Utc::now()).unwrap();

        let err = WorkoutGenerator::new(&catalog, &store)
            .generate(&enrollment, &WorkoutRequest::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_missing_max_aborts_workout() {
        let (catalog, _, enrollment) = setup();
        let empty = MemoryStore::new();
        let err = WorkoutGenerator::new(&catalog, &empty)
            .generate(&enrollment, &WorkoutRequest::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unprocessable);
    }
}
