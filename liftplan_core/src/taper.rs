//! Meet-date taper phases.
//!
//! As a competition approaches, training load drops. The phase is a pure
//! function of the meet date and the day being trained:
//!
//! | days out | phase | multiplier |
//! |----------|-------|------------|
//! | <= 7     | meet_week | 0.40 |
//! | <= 14    | peak      | 0.60 |
//! | <= 21    | peak      | 0.75 |
//! | <= 28    | taper     | 0.85 |
//! | <= 56    | prep_2    | 1.0  |
//! | <= 84    | prep_1    | 1.0  |
//! | beyond   | base      | 1.0  |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaperPhase {
    OffSeason,
    Base,
    #[serde(rename = "prep_1")]
    Prep1,
    #[serde(rename = "prep_2")]
    Prep2,
    Taper,
    Peak,
    MeetWeek,
}

impl TaperPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaperPhase::OffSeason => "off_season",
            TaperPhase::Base => "base",
            TaperPhase::Prep1 => "prep_1",
            TaperPhase::Prep2 => "prep_2",
            TaperPhase::Taper => "taper",
            TaperPhase::Peak => "peak",
            TaperPhase::MeetWeek => "meet_week",
        }
    }
}

impl fmt::Display for TaperPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the phase calculation for one day
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeetCountdown {
    pub meet_date: Option<NaiveDate>,
    pub days_out: Option<i64>,
    pub phase: TaperPhase,
    pub taper_multiplier: f64,
}

impl MeetCountdown {
    pub fn off_season() -> Self {
        Self {
            meet_date: None,
            days_out: None,
            phase: TaperPhase::OffSeason,
            taper_multiplier: 1.0,
        }
    }
}

/// Compute the taper phase for `today` given an optional meet date
pub fn meet_countdown(meet_date: Option<NaiveDate>, today: NaiveDate) -> MeetCountdown {
    let Some(meet) = meet_date else {
        return MeetCountdown::off_season();
    };

    let days_out = (meet - today).num_days();
    let (phase, taper_multiplier) = phase_for_days_out(days_out);

    MeetCountdown {
        meet_date: Some(meet),
        days_out: Some(days_out),
        phase,
        taper_multiplier,
    }
}

fn phase_for_days_out(days_out: i64) -> (TaperPhase, f64) {
    // A meet in the past no longer shapes training
    if days_out < 0 {
        return (TaperPhase::OffSeason, 1.0);
    }

    match days_out {
        0..=7 => (TaperPhase::MeetWeek, 0.40),
        8..=14 => (TaperPhase::Peak, 0.60),
        15..=21 => (TaperPhase::Peak, 0.75),
        22..=28 => (TaperPhase::Taper, 0.85),
        29..=56 => (TaperPhase::Prep2, 1.0),
        57..=84 => (TaperPhase::Prep1, 1.0),
        _ => (TaperPhase::Base, 1.0),
    }
}
