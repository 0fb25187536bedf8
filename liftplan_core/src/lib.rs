#![forbid(unsafe_code)]

//! Core domain model and business logic for the liftplan system.
//!
//! This crate provides:
//! - Domain types (lifts, maxes, prescriptions, enrollments, progressions)
//! - Load strategy and set scheme calculators
//! - Prescription resolution and workout generation
//! - The enrollment state machine and meet-date taper phases
//! - The progression engine and its event bus wiring
//! - Persistence (in-memory and file-backed stores, CSV export)

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod load_strategy;
pub mod set_scheme;
pub mod taper;
pub mod store;
pub mod journal;
pub mod state;
pub mod file_store;
pub mod events;
pub mod enrollment;
pub mod resolver;
pub mod workout;
pub mod progression;
pub mod session;
pub mod export;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, ErrorKind, FieldError, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog, Catalog};
pub use config::Config;
pub use load_strategy::{round_weight, LoadStrategy, RoundingDirection};
pub use set_scheme::{PlannedSet, RampStep, SetLoad, SetScheme};
pub use taper::{meet_countdown, MeetCountdown, TaperPhase};
pub use store::{LiftLookup, MaxLookup, MemoryStore, TrainingStore};
pub use file_store::FileStore;
pub use events::{Event, EventBus, EventConsumer, EventType};
pub use enrollment::CompletionSummary;
pub use resolver::{BatchItem, CachedMaxLookup, PrescriptionResolver, ResolvedPrescription};
pub use workout::{GeneratedWorkout, WorkoutGenerator, WorkoutRequest};
pub use progression::{LiftOutcome, ProgressionEngine, TriggerReport};
pub use session::SessionService;
pub use export::export_progressions;
pub use engine::Engine;
