use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use liftplan_core::*;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "liftplan")]
#[command(about = "Strength program tracking and progression", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// User the command acts for
    #[arg(long, global = true, default_value = "default")]
    user: String,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Load the program catalog from this TOML file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Today's workout (current day unless --week/--day are given)
    Workout {
        #[arg(long)]
        week: Option<u32>,
        #[arg(long)]
        day: Option<String>,
        /// Date the workout is for (YYYY-MM-DD), drives the taper phase
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Any week/day of the current cycle, for planning ahead
    Preview {
        #[arg(long)]
        week: u32,
        #[arg(long)]
        day: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Enroll in a program, replacing any current enrollment
    Enroll {
        #[arg(long)]
        program: String,
    },

    /// Show the current enrollment
    Enrollment,

    /// Leave the current program
    Unenroll,

    /// Start the next cycle after a cycle boundary
    NextCycle,

    /// Mark the current week complete
    AdvanceWeek,

    /// Set or clear the meet date
    MeetDate {
        #[command(subcommand)]
        action: MeetDateAction,
    },

    /// Days to the meet and the current taper phase
    Countdown {
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// Apply a progression manually
    Trigger {
        #[arg(long)]
        progression: String,
        /// Only this lift (default: every lift the progression covers)
        #[arg(long)]
        lift: Option<String>,
        /// Apply even if already applied for the current position
        #[arg(long)]
        force: bool,
    },

    /// Resolve prescriptions into concrete sets
    Resolve {
        #[arg(required = true)]
        prescriptions: Vec<String>,
    },

    /// Record or inspect maxes
    Max {
        #[command(subcommand)]
        action: MaxAction,
    },

    /// Workout session logging
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Applied progressions, oldest first
    History,

    /// Append the progression history to a CSV file
    Export {
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum MeetDateAction {
    Set { date: NaiveDate },
    Clear,
}

#[derive(Subcommand)]
enum MaxAction {
    /// Record a new max
    Set {
        lift: String,
        value: f64,
        /// tm or 1rm
        #[arg(long = "type", default_value = "tm")]
        max_type: String,
        /// Effective date (default: now)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the current max
    Show {
        lift: String,
        #[arg(long = "type", default_value = "tm")]
        max_type: String,
        /// Show every recorded value
        #[arg(long)]
        history: bool,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    Start {
        #[arg(long)]
        week: Option<u32>,
        #[arg(long)]
        day: Option<String>,
    },
    LogSet {
        #[arg(long)]
        session: Uuid,
        #[arg(long)]
        prescription: String,
        #[arg(long = "set")]
        set_number: u32,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        reps: u32,
    },
    Finish {
        #[arg(long)]
        session: Uuid,
    },
    Abandon {
        #[arg(long)]
        session: Uuid,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            liftplan_core::logging::init();
            return report_error(&e);
        }
    };
    liftplan_core::logging::init_with_level(&config.logging.level);

    match run(cli, &config) {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => report_error(&Error::Json(e)),
        },
        Err(e) => report_error(&e),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = &cli.data_dir {
        config.data.data_dir = data_dir.clone();
    }
    if let Some(catalog) = &cli.catalog {
        config.catalog.path = Some(catalog.clone());
    }
    Ok(config)
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Validation => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::InvalidState => 5,
        ErrorKind::Unprocessable => 6,
    }
}

fn report_error(error: &Error) -> ExitCode {
    if error.kind() == ErrorKind::Internal {
        tracing::error!("{}", error);
    }

    let mut body = json!({
        "error": {
            "kind": error.kind(),
            "message": error.public_message(),
        }
    });
    if let Error::Validation(fields) = error {
        body["error"]["fields"] = json!(fields);
    }
    eprintln!("{}", body);
    ExitCode::from(exit_code(error.kind()))
}

fn run(cli: Cli, config: &Config) -> Result<Value> {
    let engine = Engine::from_config(config)?;
    let user = cli.user.as_str();

    let output = match cli.command {
        Commands::Workout { week, day, date } => {
            let request = WorkoutRequest { week, day, date };
            serde_json::to_value(engine.workout(user, &request)?)?
        }
        Commands::Preview { week, day, date } => {
            serde_json::to_value(engine.preview(user, week, &day, date)?)?
        }
        Commands::Enroll { program } => serde_json::to_value(engine.enroll(user, &program)?)?,
        Commands::Enrollment => serde_json::to_value(engine.enrollment(user)?)?,
        Commands::Unenroll => serde_json::to_value(engine.unenroll(user)?)?,
        Commands::NextCycle => serde_json::to_value(engine.next_cycle(user)?)?,
        Commands::AdvanceWeek => serde_json::to_value(engine.advance_week(user)?)?,
        Commands::MeetDate { action } => {
            let date = match action {
                MeetDateAction::Set { date } => Some(date),
                MeetDateAction::Clear => None,
            };
            serde_json::to_value(engine.set_meet_date(user, date)?)?
        }
        Commands::Countdown { today } => serde_json::to_value(engine.countdown(user, today)?)?,
        Commands::Trigger {
            progression,
            lift,
            force,
        } => serde_json::to_value(engine.trigger(user, &progression, lift.as_deref(), force)?)?,
        Commands::Resolve { prescriptions } => {
            serde_json::to_value(engine.resolve(user, &prescriptions))?
        }
        Commands::Max { action } => cmd_max(&engine, user, action)?,
        Commands::Session { action } => cmd_session(&engine, user, action)?,
        Commands::History => serde_json::to_value(engine.progression_logs(user)?)?,
        Commands::Export { output } => {
            let rows = engine.export(user, &output)?;
            json!({ "rows_written": rows, "path": output.display().to_string() })
        }
    };
    Ok(output)
}

fn cmd_max(engine: &Engine, user: &str, action: MaxAction) -> Result<Value> {
    match action {
        MaxAction::Set {
            lift,
            value,
            max_type,
            date,
        } => {
            let max_type: MaxType = max_type.parse()?;
            Ok(serde_json::to_value(
                engine.record_max(user, &lift, max_type, value, date)?,
            )?)
        }
        MaxAction::Show {
            lift,
            max_type,
            history,
        } => {
            let max_type: MaxType = max_type.parse()?;
            if history {
                Ok(serde_json::to_value(engine.max_history(user, &lift, max_type)?)?)
            } else {
                Ok(serde_json::to_value(engine.current_max(user, &lift, max_type)?)?)
            }
        }
    }
}

fn cmd_session(engine: &Engine, user: &str, action: SessionAction) -> Result<Value> {
    let sessions = engine.sessions();
    let value = match action {
        SessionAction::Start { week, day } => {
            serde_json::to_value(sessions.start(user, week, day.as_deref())?)?
        }
        SessionAction::LogSet {
            session,
            prescription,
            set_number,
            weight,
            reps,
        } => serde_json::to_value(sessions.log_set(
            user,
            session,
            &prescription,
            set_number,
            weight,
            reps,
        )?)?,
        SessionAction::Finish { session } => serde_json::to_value(sessions.finish(user, session)?)?,
        SessionAction::Abandon { session } => {
            serde_json::to_value(sessions.abandon(user, session)?)?
        }
    };
    Ok(value)
}
