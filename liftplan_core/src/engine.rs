//! The engine: every external operation, wired to one catalog, store and bus.
//!
//! State changes are written to the store first and their events published
//! afterwards, so consumers (the progression engine among them) always see
//! committed state, and a consumer failure never undoes the change.

use crate::events::{Event, EventBus};
use crate::resolver::{BatchItem, PrescriptionResolver};
use crate::workout::{GeneratedWorkout, WorkoutGenerator, WorkoutRequest};
use crate::{
    get_default_catalog, meet_countdown, Catalog, CompletionSummary, Config, Enrollment, Error,
    FileStore, LiftMax, MaxType, MeetCountdown, ProgressionEngine, ProgressionLog, Result,
    SessionService, TrainingStore, TriggerReport,
};
use chrono::{NaiveDate, TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;

pub struct Engine {
    catalog: Arc<Catalog>,
    store: Arc<dyn TrainingStore>,
    bus: Arc<EventBus>,
    progression: Arc<ProgressionEngine>,
    apply_taper: bool,
}

impl Engine {
    /// Build an engine and register the progression engine on the bus
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn TrainingStore>, bus: Arc<EventBus>) -> Self {
        Self::with_options(catalog, store, bus, true, Config::default().progression.max_retries)
    }

    fn with_options(
        catalog: Arc<Catalog>,
        store: Arc<dyn TrainingStore>,
        bus: Arc<EventBus>,
        apply_taper: bool,
        max_retries: u32,
    ) -> Self {
        let progression = Arc::new(
            ProgressionEngine::new(catalog.clone(), store.clone()).with_max_retries(max_retries),
        );
        bus.register(progression.clone());

        Self {
            catalog,
            store,
            bus,
            progression,
            apply_taper,
        }
    }

    /// File-backed engine as configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = match &config.catalog.path {
            Some(path) => Catalog::load_from(path)?,
            None => get_default_catalog().clone(),
        };
        let store = FileStore::open(&config.data.data_dir)?;

        Ok(Self::with_options(
            Arc::new(catalog),
            Arc::new(store),
            Arc::new(EventBus::new()),
            config.workout.apply_taper,
            config.progression.max_retries,
        ))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &dyn TrainingStore {
        self.store.as_ref()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn publish_all(&self, events: Vec<Event>) {
        for event in events {
            self.bus.publish(event);
        }
    }

    fn require_enrollment(&self, user_id: &str) -> Result<Enrollment> {
        self.store
            .enrollment(user_id)?
            .ok_or_else(|| Error::not_found("enrollment", user_id))
    }

    fn cycle_length(&self, enrollment: &Enrollment) -> Result<u32> {
        Ok(self
            .catalog
            .cycle_for_program(&enrollment.program_id)?
            .length_weeks)
    }

    // ------------------------------------------------------------------
    // Enrollment
    // ------------------------------------------------------------------

    /// Enroll in a program, replacing any existing enrollment
    pub fn enroll(&self, user_id: &str, program_id: &str) -> Result<Enrollment> {
        self.catalog.cycle_for_program(program_id)?;

        if self.store.delete_enrollment(user_id)? {
            tracing::info!("Replacing existing enrollment for {}", user_id);
        }
        let enrollment = Enrollment::start(user_id, program_id, Utc::now());
        self.store.save_enrollment(&enrollment)?;

        tracing::info!("User {} enrolled in {}", user_id, program_id);
        self.bus.publish(enrollment.enrolled_event());
        Ok(enrollment)
    }

    pub fn enrollment(&self, user_id: &str) -> Result<Enrollment> {
        self.require_enrollment(user_id)
    }

    /// Leave the program; returns how far the user got
    pub fn unenroll(&self, user_id: &str) -> Result<CompletionSummary> {
        let enrollment = self.require_enrollment(user_id)?;
        let summary = enrollment.completion_summary(self.cycle_length(&enrollment)?);

        self.store.delete_enrollment(user_id)?;
        tracing::info!(
            "User {} left {} after {} weeks",
            user_id,
            enrollment.program_id,
            summary.weeks_completed
        );
        self.bus.publish(enrollment.quit_event(&summary));
        Ok(summary)
    }

    pub fn advance_week(&self, user_id: &str) -> Result<Enrollment> {
        let now = Utc::now();
        let mut events = Vec::new();
        let enrollment = self.store.update_enrollment(user_id, &mut |enrollment: &mut Enrollment| {
            let cycle_length = self.cycle_length(enrollment)?;
            events = enrollment.advance_week(cycle_length, now)?;
            Ok(())
        })?;
        self.publish_all(events);
        Ok(enrollment)
    }

    pub fn next_cycle(&self, user_id: &str) -> Result<Enrollment> {
        let now = Utc::now();
        let mut events = Vec::new();
        let enrollment = self.store.update_enrollment(user_id, &mut |enrollment: &mut Enrollment| {
            events = enrollment.next_cycle(now)?;
            Ok(())
        })?;
        self.publish_all(events);
        Ok(enrollment)
    }

    pub fn set_meet_date(&self, user_id: &str, meet_date: Option<NaiveDate>) -> Result<Enrollment> {
        let now = Utc::now();
        let enrollment = self.store.update_enrollment(user_id, &mut |enrollment: &mut Enrollment| {
            enrollment.meet_date = meet_date;
            enrollment.updated_at = now;
            Ok(())
        })?;
        tracing::info!("Meet date for {} set to {:?}", user_id, meet_date);
        Ok(enrollment)
    }

    pub fn countdown(&self, user_id: &str, today: Option<NaiveDate>) -> Result<MeetCountdown> {
        let enrollment = self.require_enrollment(user_id)?;
        let today = today.unwrap_or_else(|| Utc::now().date_naive());
        Ok(meet_countdown(enrollment.meet_date, today))
    }

    // ------------------------------------------------------------------
    // Workouts
    // ------------------------------------------------------------------

    fn generator(&self) -> WorkoutGenerator<'_> {
        WorkoutGenerator::new(&self.catalog, self.store.as_ref()).with_taper(self.apply_taper)
    }

    pub fn workout(&self, user_id: &str, request: &WorkoutRequest) -> Result<GeneratedWorkout> {
        let enrollment = self.require_enrollment(user_id)?;
        self.generator().generate(&enrollment, request)
    }

    pub fn preview(
        &self,
        user_id: &str,
        week_number: u32,
        day_slug: &str,
        date: Option<NaiveDate>,
    ) -> Result<GeneratedWorkout> {
        let enrollment = self.require_enrollment(user_id)?;
        self.generator().preview(&enrollment, week_number, day_slug, date)
    }

    pub fn resolve(&self, user_id: &str, prescription_ids: &[String]) -> Vec<BatchItem> {
        PrescriptionResolver::new(&self.catalog, self.store.as_ref())
            .resolve_batch(prescription_ids, user_id)
    }

    pub fn sessions(&self) -> SessionService<'_> {
        SessionService::new(&self.catalog, self.store.as_ref(), &self.bus)
    }

    // ------------------------------------------------------------------
    // Maxes and progressions
    // ------------------------------------------------------------------

    /// Record a max. Dated today or undated means effective now; other
    /// dates take effect at midnight UTC.
    pub fn record_max(
        &self,
        user_id: &str,
        lift_id: &str,
        max_type: MaxType,
        value: f64,
        date: Option<NaiveDate>,
    ) -> Result<LiftMax> {
        self.catalog.lift(lift_id)?;
        if !(value.is_finite() && value > 0.0) {
            return Err(Error::invalid("value", format!("must be > 0, got {}", value)));
        }

        let now = Utc::now();
        let effective_at = match date {
            Some(d) if d != now.date_naive() => {
                let midnight = d
                    .and_hms_opt(0, 0, 0)
                    .ok_or_else(|| Error::invalid("date", format!("invalid date {}", d)))?;
                Utc.from_utc_datetime(&midnight)
            }
            _ => now,
        };

        let max = LiftMax::new(user_id, lift_id, max_type, value, effective_at);
        self.store.record_max(max.clone())?;
        tracing::info!("Recorded {} {} = {} for {}", lift_id, max_type, value, user_id);
        Ok(max)
    }

    pub fn current_max(&self, user_id: &str, lift_id: &str, max_type: MaxType) -> Result<LiftMax> {
        self.store
            .current_max(user_id, lift_id, max_type)?
            .ok_or_else(|| Error::not_found("max", format!("{}/{}/{}", user_id, lift_id, max_type)))
    }

    pub fn max_history(&self, user_id: &str, lift_id: &str, max_type: MaxType) -> Result<Vec<LiftMax>> {
        self.catalog.lift(lift_id)?;
        self.store.max_history(user_id, lift_id, max_type)
    }

    pub fn trigger(
        &self,
        user_id: &str,
        progression_id: &str,
        lift_id: Option<&str>,
        force: bool,
    ) -> Result<TriggerReport> {
        self.progression.trigger(user_id, progression_id, lift_id, force)
    }

    pub fn progression_logs(&self, user_id: &str) -> Result<Vec<ProgressionLog>> {
        self.store.progression_logs(user_id)
    }

    pub fn export(&self, user_id: &str, csv_path: &Path) -> Result<usize> {
        let logs = self.store.progression_logs(user_id)?;
        crate::export_progressions(&logs, csv_path)
    }
}
