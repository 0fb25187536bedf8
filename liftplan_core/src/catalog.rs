//! Program catalog: lifts, programs, cycles, weeks, days, prescriptions and
//! progression rules.
//!
//! The catalog is read-only to the core. It comes from a TOML file or from the
//! built-in default below.

use crate::types::*;
use crate::{
    Error, FieldError, LiftLookup, LoadStrategy, RampStep, Result, RoundingDirection, SetScheme,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// On-disk form of a catalog
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct CatalogFile {
    #[serde(default)]
    pub lifts: Vec<Lift>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub cycles: Vec<Cycle>,
    #[serde(default)]
    pub weeks: Vec<Week>,
    #[serde(default)]
    pub days: Vec<Day>,
    #[serde(default)]
    pub prescriptions: Vec<Prescription>,
    #[serde(default)]
    pub progressions: Vec<Progression>,
    #[serde(default)]
    pub progression_configs: Vec<ProgressionConfig>,
}

/// Indexed catalog
#[derive(Clone, Debug, Default, Serialize)]
pub struct Catalog {
    pub lifts: HashMap<String, Lift>,
    pub programs: HashMap<String, Program>,
    pub cycles: HashMap<String, Cycle>,
    pub weeks: Vec<Week>,
    pub days: HashMap<String, Day>,
    pub prescriptions: HashMap<String, Prescription>,
    pub progressions: HashMap<String, Progression>,
    pub progression_configs: Vec<ProgressionConfig>,
}

impl From<CatalogFile> for Catalog {
    fn from(file: CatalogFile) -> Self {
        Catalog {
            lifts: file.lifts.into_iter().map(|l| (l.id.clone(), l)).collect(),
            programs: file.programs.into_iter().map(|p| (p.id.clone(), p)).collect(),
            cycles: file.cycles.into_iter().map(|c| (c.id.clone(), c)).collect(),
            weeks: file.weeks,
            days: file.days.into_iter().map(|d| (d.slug.clone(), d)).collect(),
            prescriptions: file
                .prescriptions
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            progressions: file
                .progressions
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            progression_configs: file.progression_configs,
        }
    }
}

impl Catalog {
    /// Load and validate a catalog from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = Self::from_toml_str(&contents)?;
        tracing::info!(
            "Loaded catalog from {:?}: {} programs, {} prescriptions",
            path,
            catalog.programs.len(),
            catalog.prescriptions.len()
        );
        Ok(catalog)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(contents)?;
        let catalog = Catalog::from(file);

        let duplicates = catalog.duplicate_configs();
        if !duplicates.is_empty() {
            return Err(Error::Conflict(duplicates.join("; ")));
        }

        let errors = catalog.validate();
        if !errors.is_empty() {
            return Err(Error::Validation(
                errors
                    .into_iter()
                    .map(|message| FieldError::new("catalog", message))
                    .collect(),
            ));
        }
        Ok(catalog)
    }

    pub fn lift(&self, lift_id: &str) -> Result<&Lift> {
        self.lifts
            .get(lift_id)
            .ok_or_else(|| Error::not_found("lift", lift_id))
    }

    pub fn program(&self, program_id: &str) -> Result<&Program> {
        self.programs
            .get(program_id)
            .ok_or_else(|| Error::not_found("program", program_id))
    }

    pub fn cycle_for_program(&self, program_id: &str) -> Result<&Cycle> {
        let program = self.program(program_id)?;
        self.cycles
            .get(&program.cycle_id)
            .ok_or_else(|| Error::not_found("cycle", program.cycle_id.as_str()))
    }

    pub fn week(&self, cycle_id: &str, week_number: u32) -> Option<&Week> {
        self.weeks
            .iter()
            .find(|w| w.cycle_id == cycle_id && w.week_number == week_number)
    }

    pub fn day(&self, slug: &str) -> Result<&Day> {
        self.days
            .get(slug)
            .ok_or_else(|| Error::not_found("day", slug))
    }

    pub fn prescription(&self, prescription_id: &str) -> Result<&Prescription> {
        self.prescriptions
            .get(prescription_id)
            .ok_or_else(|| Error::not_found("prescription", prescription_id))
    }

    pub fn progression(&self, progression_id: &str) -> Result<&Progression> {
        self.progressions
            .get(progression_id)
            .ok_or_else(|| Error::not_found("progression", progression_id))
    }

    /// Enabled configs for a program, lowest priority value first
    pub fn enabled_configs(&self, program_id: &str) -> Vec<&ProgressionConfig> {
        let mut configs: Vec<&ProgressionConfig> = self
            .progression_configs
            .iter()
            .filter(|c| c.program_id == program_id && c.enabled)
            .collect();
        configs.sort_by_key(|c| c.priority);
        configs
    }

    /// Configs binding the same (program, progression, lift) more than once
    fn duplicate_configs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.progression_configs
            .iter()
            .filter(|c| {
                !seen.insert((
                    c.program_id.as_str(),
                    c.progression_id.as_str(),
                    c.lift_id.as_deref(),
                ))
            })
            .map(|c| {
                format!(
                    "Duplicate progression config: program '{}', progression '{}', lift '{}'",
                    c.program_id,
                    c.progression_id,
                    c.lift_id.as_deref().unwrap_or("*")
                )
            })
            .collect()
    }

    /// Check referential integrity and parameter ranges
    ///
    /// Returns a list of problems, or an empty Vec if the catalog is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, program) in &self.programs {
            if !self.cycles.contains_key(&program.cycle_id) {
                errors.push(format!(
                    "Program '{}' references non-existent cycle '{}'",
                    id, program.cycle_id
                ));
            }
        }

        for (id, cycle) in &self.cycles {
            if cycle.length_weeks == 0 {
                errors.push(format!("Cycle '{}' has zero weeks", id));
            }
        }

        for week in &self.weeks {
            match self.cycles.get(&week.cycle_id) {
                None => errors.push(format!(
                    "Week {} references non-existent cycle '{}'",
                    week.week_number, week.cycle_id
                )),
                Some(cycle) => {
                    if week.week_number == 0 || week.week_number > cycle.length_weeks {
                        errors.push(format!(
                            "Week {} is outside cycle '{}' (1..={})",
                            week.week_number, cycle.id, cycle.length_weeks
                        ));
                    }
                }
            }
            for slug in &week.days {
                if !self.days.contains_key(slug) {
                    errors.push(format!(
                        "Week {} of '{}' schedules non-existent day '{}'",
                        week.week_number, week.cycle_id, slug
                    ));
                }
            }
        }

        for (slug, day) in &self.days {
            for prescription_id in &day.prescriptions {
                if !self.prescriptions.contains_key(prescription_id) {
                    errors.push(format!(
                        "Day '{}' references non-existent prescription '{}'",
                        slug, prescription_id
                    ));
                }
            }
        }

        for (id, prescription) in &self.prescriptions {
            if !self.lifts.contains_key(&prescription.lift_id) {
                errors.push(format!(
                    "Prescription '{}' references non-existent lift '{}'",
                    id, prescription.lift_id
                ));
            }
            if let Err(Error::Validation(fields)) = prescription.load_strategy.validate() {
                errors.extend(fields.iter().map(|f| format!("Prescription '{}': {}", id, f)));
            }
            if let Err(Error::Validation(fields)) = prescription.set_scheme.validate() {
                errors.extend(fields.iter().map(|f| format!("Prescription '{}': {}", id, f)));
            }
        }

        for (id, progression) in &self.progressions {
            let increment = progression.rule.increment();
            if !(increment.is_finite() && increment > 0.0) {
                errors.push(format!(
                    "Progression '{}': increment must be > 0, got {}",
                    id, increment
                ));
            }
            if let ProgressionRule::Linear {
                trigger_type: TriggerType::AfterCycle,
                ..
            } = progression.rule
            {
                errors.push(format!(
                    "Progression '{}': linear rules fire AFTER_SESSION or AFTER_WEEK; use a CYCLE rule",
                    id
                ));
            }
        }

        errors.extend(self.duplicate_configs());

        for config in &self.progression_configs {
            if !self.programs.contains_key(&config.program_id) {
                errors.push(format!(
                    "Progression config references non-existent program '{}'",
                    config.program_id
                ));
            }
            if !self.progressions.contains_key(&config.progression_id) {
                errors.push(format!(
                    "Progression config references non-existent progression '{}'",
                    config.progression_id
                ));
            }
            if let Some(lift_id) = &config.lift_id {
                if !self.lifts.contains_key(lift_id) {
                    errors.push(format!(
                        "Progression config '{}' references non-existent lift '{}'",
                        config.progression_id, lift_id
                    ));
                }
            }
            if let Some(increment) = config.override_increment {
                if !(increment.is_finite() && increment > 0.0) {
                    errors.push(format!(
                        "Progression config '{}': override increment must be > 0",
                        config.progression_id
                    ));
                }
            }
        }

        errors
    }
}

impl LiftLookup for Catalog {
    fn get_lift(&self, lift_id: &str) -> Result<Option<Lift>> {
        Ok(self.lifts.get(lift_id).cloned())
    }
}

/// Builds the default catalog: a four-week wave over the four main lifts
///
/// **Note**: For production use, prefer `get_default_catalog()` which returns a
/// cached reference.
pub fn build_default_catalog() -> Catalog {
    let lift = |id: &str, name: &str| Lift {
        id: id.into(),
        name: name.into(),
        slug: id.into(),
    };

    let ramp = |id: &str, lift_id: &str, order: u32| Prescription {
        id: id.into(),
        lift_id: lift_id.into(),
        load_strategy: LoadStrategy::PercentOf {
            reference_type: MaxType::TrainingMax,
            percentage: 85.0,
            rounding_increment: Some(5.0),
            rounding_direction: Some(RoundingDirection::Nearest),
        },
        set_scheme: SetScheme::Ramp {
            steps: vec![
                RampStep { percentage: 65.0, reps: 5 },
                RampStep { percentage: 75.0, reps: 5 },
                RampStep { percentage: 85.0, reps: 5 },
            ],
            work_set_threshold: 80.0,
        },
        order,
        notes: String::new(),
        rest_seconds: Some(180),
    };

    let fixed = |id: &str, lift_id: &str, pct: f64, sets: u32, reps: u32, order: u32| Prescription {
        id: id.into(),
        lift_id: lift_id.into(),
        load_strategy: LoadStrategy::PercentOf {
            reference_type: MaxType::TrainingMax,
            percentage: pct,
            rounding_increment: Some(5.0),
            rounding_direction: Some(RoundingDirection::Down),
        },
        set_scheme: SetScheme::Fixed { sets, reps },
        order,
        notes: String::new(),
        rest_seconds: Some(90),
    };

    let mut squat_volume = fixed("squat-volume", "squat", 50.0, 5, 10, 3);
    squat_volume.notes = "Same weight every set; keep rest short".into();

    let day = |slug: &str, name: &str, prescriptions: &[&str]| Day {
        slug: slug.into(),
        name: name.into(),
        prescriptions: prescriptions.iter().map(|p| p.to_string()).collect(),
    };

    let week = |n: u32, days: &[&str]| Week {
        cycle_id: "four-week-wave".into(),
        week_number: n,
        days: days.iter().map(|d| d.to_string()).collect(),
    };

    let cycle_rule = |id: &str, name: &str, increment: f64| Progression {
        id: id.into(),
        name: name.into(),
        rule: ProgressionRule::Cycle {
            increment,
            max_type: MaxType::TrainingMax,
        },
    };

    let config = |progression_id: &str, lift_id: &str, priority: i32, enabled: bool| {
        ProgressionConfig {
            program_id: "strength-basics".into(),
            progression_id: progression_id.into(),
            lift_id: Some(lift_id.into()),
            priority,
            enabled,
            override_increment: None,
        }
    };

    let file = CatalogFile {
        lifts: vec![
            lift("squat", "Back Squat"),
            lift("bench-press", "Bench Press"),
            lift("deadlift", "Deadlift"),
            lift("overhead-press", "Overhead Press"),
        ],
        programs: vec![Program {
            id: "strength-basics".into(),
            name: "Strength Basics".into(),
            slug: "strength-basics".into(),
            cycle_id: "four-week-wave".into(),
        }],
        cycles: vec![Cycle {
            id: "four-week-wave".into(),
            name: "Four-Week Wave".into(),
            length_weeks: 4,
        }],
        weeks: vec![
            week(1, &["lower", "upper"]),
            week(2, &["lower", "upper"]),
            week(3, &["lower", "upper"]),
            week(4, &["deload"]),
        ],
        days: vec![
            day("lower", "Lower Body", &["squat-ramp", "deadlift-ramp", "squat-volume"]),
            day("upper", "Upper Body", &["bench-ramp", "press-ramp"]),
            day("deload", "Deload", &["squat-deload", "bench-deload"]),
        ],
        prescriptions: vec![
            ramp("squat-ramp", "squat", 1),
            ramp("deadlift-ramp", "deadlift", 2),
            squat_volume,
            ramp("bench-ramp", "bench-press", 1),
            ramp("press-ramp", "overhead-press", 2),
            fixed("squat-deload", "squat", 40.0, 3, 5, 1),
            fixed("bench-deload", "bench-press", 40.0, 3, 5, 2),
        ],
        progressions: vec![
            cycle_rule("lower-cycle", "Lower body +10 per cycle", 10.0),
            cycle_rule("upper-cycle", "Upper body +5 per cycle", 5.0),
            Progression {
                id: "press-weekly".into(),
                name: "Press +2.5 per week".into(),
                rule: ProgressionRule::Linear {
                    increment: 2.5,
                    max_type: MaxType::TrainingMax,
                    trigger_type: TriggerType::AfterWeek,
                },
            },
        ],
        progression_configs: vec![
            config("lower-cycle", "squat", 1, true),
            config("lower-cycle", "deadlift", 1, true),
            config("upper-cycle", "bench-press", 1, true),
            config("upper-cycle", "overhead-press", 1, true),
            config("press-weekly", "overhead-press", 2, false),
        ],
    };

    Catalog::from(file)
}
