//! CSV export of the progression audit log.

use crate::{ProgressionLog, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    applied_at: String,
    progression_id: String,
    lift_id: String,
    trigger_type: String,
    trigger_key: String,
    previous_value: f64,
    new_value: f64,
    delta: f64,
    manual: bool,
    force: bool,
}

impl From<&ProgressionLog> for CsvRow {
    fn from(log: &ProgressionLog) -> Self {
        let flag = |name: &str| {
            log.trigger_context
                .get(name)
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
        };
        CsvRow {
            id: log.id.to_string(),
            applied_at: log.applied_at.to_rfc3339(),
            progression_id: log.progression_id.clone(),
            lift_id: log.lift_id.clone(),
            trigger_type: log.trigger_type.to_string(),
            trigger_key: log.trigger_key.clone(),
            previous_value: log.previous_value,
            new_value: log.new_value,
            delta: log.delta,
            manual: flag("manual"),
            force: flag("force"),
        }
    }
}

/// Ids already present in an export file's first column
fn exported_ids(csv_path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path)?;
    let mut ids = HashSet::new();
    for record in reader.records() {
        if let Some(id) = record?.get(0) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// Append progression logs to a CSV file
///
/// Headers are written only when the file is new or empty. Logs whose id is
/// already in the file are skipped, so re-exporting the same history adds
/// nothing. The file is synced before returning. Returns the number of rows
/// written.
pub fn export_progressions(logs: &[ProgressionLog], csv_path: &Path) -> Result<usize> {
    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;
    let needs_headers = file.metadata()?.len() == 0;
    let existing = if needs_headers {
        HashSet::new()
    } else {
        exported_ids(csv_path)?
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    let mut written = 0;
    for log in logs {
        if existing.contains(&log.id.to_string()) {
            continue;
        }
        writer.serialize(CsvRow::from(log))?;
        written += 1;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!(
        "Exported {} progression logs to {:?} ({} already present)",
        written,
        csv_path,
        logs.len() - written
    );
    Ok(written)
}
