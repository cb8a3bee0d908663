//! Persistent frequency cache.
//!
//! Each line of the store file is `identifier count YYYY-MM-DD`. The whole file
//! is loaded into memory once, and every mutation rewrites it sorted by
//! identifier through a temp file + rename so an interrupted run never leaves a
//! half-written store behind.

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::workdir::CleanupGuard;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyRecord {
    pub identifier: String,
    pub count: u64,
    pub observed_at: NaiveDate,
}

impl FrequencyRecord {
    /// Whole days between the observation and `today`. Future dates count as 0.
    pub fn age_in_days(&self, today: NaiveDate) -> i64 {
        (today - self.observed_at).num_days().max(0)
    }

    pub fn is_stale(&self, today: NaiveDate, age_limit_days: u32) -> bool {
        self.age_in_days(today) > i64::from(age_limit_days)
    }

    fn to_line(&self) -> String {
        format!(
            "{} {} {}",
            self.identifier,
            self.count,
            self.observed_at.format(DATE_FORMAT)
        )
    }
}

#[derive(Debug)]
pub struct FrequencyStore {
    path: PathBuf,
    records: BTreeMap<String, FrequencyRecord>,
}

impl FrequencyStore {
    /// Loads an existing store. The file must exist.
    pub fn load(path: PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read frequency store: {}", path.display()))?;
        let records = parse_records(&text)
            .with_context(|| format!("Invalid frequency store: {}", path.display()))?;
        Ok(Self { path, records })
    }

    /// Loads the store if present, otherwise creates an empty one on disk.
    pub fn open_or_create(path: PathBuf) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let store = Self {
            path,
            records: BTreeMap::new(),
        };
        store.persist()?;
        tracing::info!(path = %store.path.display(), "created empty frequency store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn lookup(&self, identifier: &str) -> Option<&FrequencyRecord> {
        self.records.get(identifier)
    }

    pub fn upsert(&mut self, identifier: &str, count: u64, observed_at: NaiveDate) -> Result<()> {
        self.records.insert(
            identifier.to_string(),
            FrequencyRecord {
                identifier: identifier.to_string(),
                count,
                observed_at,
            },
        );
        self.persist()
    }

    /// Returns whether a record was removed. The store is only rewritten when it was.
    pub fn remove(&mut self, identifier: &str) -> Result<bool> {
        if self.records.remove(identifier).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn persist(&self) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;

        let temp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        let _guard = CleanupGuard::register(temp.path().to_path_buf());
        {
            let mut writer = BufWriter::new(temp.as_file());
            for record in self.records.values() {
                writeln!(writer, "{}", record.to_line())?;
            }
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).with_context(|| {
            format!(
                "Failed to atomically replace frequency store: {}",
                self.path.display()
            )
        })?;
        Ok(())
    }

    pub fn stats(&self, today: NaiveDate, age_limit_days: u32) -> StoreStats {
        let stale = self
            .records
            .values()
            .filter(|r| r.is_stale(today, age_limit_days))
            .count();
        StoreStats {
            store_path: self.path.to_string_lossy().to_string(),
            records: self.records.len(),
            fresh: self.records.len() - stale,
            stale,
            age_limit_days,
            oldest: self
                .records
                .values()
                .map(|r| r.observed_at)
                .min()
                .map(|d| d.format(DATE_FORMAT).to_string()),
            newest: self
                .records
                .values()
                .map(|r| r.observed_at)
                .max()
                .map(|d| d.format(DATE_FORMAT).to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub store_path: String,
    pub records: usize,
    pub fresh: usize,
    pub stale: usize,
    pub age_limit_days: u32,
    pub oldest: Option<String>,
    pub newest: Option<String>,
}

fn parse_records(text: &str) -> Result<BTreeMap<String, FrequencyRecord>> {
    let mut records = BTreeMap::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let record = parse_line(line).with_context(|| format!("line {}: {line:?}", idx + 1))?;
        records.insert(record.identifier.clone(), record);
    }
    Ok(records)
}

fn parse_line(line: &str) -> Result<FrequencyRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [identifier, count, date] = fields.as_slice() else {
        bail!("expected `identifier count date`, found {} fields", fields.len());
    };
    let count = count
        .parse::<u64>()
        .with_context(|| format!("invalid count {count:?}"))?;
    let observed_at = NaiveDate::parse_from_str(date, DATE_FORMAT)
        .with_context(|| format!("invalid date {date:?}"))?;
    Ok(FrequencyRecord {
        identifier: identifier.to_string(),
        count,
        observed_at,
    })
}
