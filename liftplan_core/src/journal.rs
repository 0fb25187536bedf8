//! Append-only JSONL journals.
//!
//! Each record is one JSON line. Writers hold an exclusive file lock for the
//! duration of the append so concurrent processes never interleave lines;
//! readers take a shared lock.

use crate::Result;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A JSONL file of records of one type
#[derive(Clone, Debug)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn open_for_append(&self) -> Result<File> {
        self.ensure_parent_dir()?;
        Ok(OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?)
    }

    /// Append one record
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        let file = self.open_for_append()?;
        file.lock_exclusive()?;
        let result = write_line(&file, record);
        file.unlock()?;
        result?;

        tracing::debug!("Appended record to {:?}", self.path);
        Ok(())
    }

    /// Append one record only if `check` accepts the records already present.
    ///
    /// The exclusive lock is held across the read, the check and the write,
    /// so no other writer can slip a record in between.
    pub fn append_if<T, F>(&self, record: &T, check: F) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&[T]) -> Result<()>,
    {
        let mut file = self.open_for_append()?;
        file.lock_exclusive()?;

        let result = (|| -> Result<()> {
            file.seek(SeekFrom::Start(0))?;
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let existing: Vec<T> = parse_lines(&contents, &self.path);
            check(&existing)?;
            write_line(&file, record)
        })();

        file.unlock()?;
        result
    }

    /// Read every parseable record. Corrupt lines are skipped with a warning.
    pub fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        let records = parse_lines(&contents, &self.path);
        tracing::debug!("Read {} records from {:?}", records.len(), self.path);
        Ok(records)
    }
}

fn write_line<T: Serialize>(file: &File, record: &T) -> Result<()> {
    let mut writer = std::io::BufWriter::new(file);
    let line = serde_json::to_string(record)?;
    writer.write_all(line.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn parse_lines<T: DeserializeOwned>(contents: &str, path: &Path) -> Vec<T> {
    let mut records = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    "Skipping unreadable record at {:?} line {}: {}",
                    path,
                    line_num + 1,
                    e
                );
            }
        }
    }
    records
}
