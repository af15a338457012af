//! Attendance ledger: one CSV table per calendar day.
//!
//! Each registered student has one record per day that moves forward only:
//! `Absent → CheckedIn → CheckedOut`. The first sighting stamps the in-time,
//! every later sighting overwrites the out-time. The table is rewritten to
//! disk after every mutation.

use crate::persist::write_atomic;
use crate::roster::Roster;
use crate::types::StudentId;
use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Literal stored in a time column before the student has been seen.
pub const ABSENT: &str = "Absent";

/// Format of the `In-Time` / `Out-Time` columns.
pub const TIME_FORMAT: &str = "%H:%M:%S";

const HEADER: [&str; 5] = ["Date", "Name", "ID", "In-Time", "Out-Time"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("ledger encode: {0}")]
    Csv(#[from] csv::Error),
    #[error("ledger {} is unreadable: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Value of a time column: `Absent` or a wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Absent,
    At(NaiveTime),
}

impl Mark {
    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            Mark::Absent => None,
            Mark::At(t) => Some(*t),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Mark::Absent)
    }
}

impl fmt::Display for Mark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mark::Absent => f.write_str(ABSENT),
            Mark::At(t) => write!(f, "{}", t.format(TIME_FORMAT)),
        }
    }
}

impl FromStr for Mark {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == ABSENT {
            return Ok(Mark::Absent);
        }
        NaiveTime::parse_from_str(s, TIME_FORMAT).map(Mark::At)
    }
}

impl Serialize for Mark {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Mark {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    Absent,
    CheckedIn,
    CheckedOut,
}

/// One row of the daily table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ID")]
    pub id: StudentId,
    #[serde(rename = "In-Time")]
    pub in_time: Mark,
    #[serde(rename = "Out-Time")]
    pub out_time: Mark,
}

impl AttendanceRecord {
    pub fn absent(date: NaiveDate, name: impl Into<String>, id: StudentId) -> Self {
        Self {
            date,
            name: name.into(),
            id,
            in_time: Mark::Absent,
            out_time: Mark::Absent,
        }
    }

    pub fn state(&self) -> AttendanceState {
        match (self.in_time, self.out_time) {
            (Mark::Absent, _) => AttendanceState::Absent,
            (Mark::At(_), Mark::Absent) => AttendanceState::CheckedIn,
            (Mark::At(_), Mark::At(_)) => AttendanceState::CheckedOut,
        }
    }
}

/// Result of applying one sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SightingOutcome {
    /// No record for the id; nothing changed and nothing was written.
    Unregistered,
    CheckedIn { at: NaiveTime },
    /// `previous` is the out-time that was overwritten, if any.
    CheckedOut { at: NaiveTime, previous: Option<NaiveTime> },
}

/// How [`LedgerStore::initialize`] obtained the day's table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerInit {
    /// An existing, readable file was loaded unchanged.
    Loaded,
    /// No file existed; a fresh table was written from the roster.
    Created,
    /// The file was empty or unreadable and was rebuilt from the roster.
    /// Any in-progress attendance for the day is lost.
    Recovered { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSummary {
    pub present: usize,
    pub absent: usize,
    pub total: usize,
}

/// The in-memory table for one day, bound to its file.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    date: NaiveDate,
    path: PathBuf,
    records: Vec<AttendanceRecord>,
}

impl AttendanceLedger {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    /// First record for `id`. Ids are assumed unique per day; with duplicates
    /// only the first one is ever updated.
    pub fn find(&self, id: &StudentId) -> Option<&AttendanceRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// Apply a sighting of `id` at `now` and persist the table.
    ///
    /// An absent record gets its in-time; any later sighting overwrites the
    /// out-time. Unknown ids are ignored without touching the file.
    pub fn record_sighting(
        &mut self,
        id: &StudentId,
        now: NaiveTime,
    ) -> Result<SightingOutcome, LedgerError> {
        let now = now.with_nanosecond(0).unwrap_or(now);

        let Some(record) = self.records.iter_mut().find(|r| &r.id == id) else {
            tracing::debug!(id = %id, "sighting for id not on today's ledger; ignored");
            return Ok(SightingOutcome::Unregistered);
        };

        let outcome = match record.in_time {
            Mark::Absent => {
                record.in_time = Mark::At(now);
                SightingOutcome::CheckedIn { at: now }
            }
            Mark::At(_) => {
                let previous = record.out_time.time();
                record.out_time = Mark::At(now);
                SightingOutcome::CheckedOut { at: now, previous }
            }
        };

        tracing::info!(id = %id, name = %record.name, ?outcome, "attendance updated");
        self.save()?;
        Ok(outcome)
    }

    /// Rewrite the whole table to disk.
    pub fn save(&self) -> Result<(), LedgerError> {
        let bytes = encode(&self.records)?;
        write_atomic(&self.path, &bytes).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn summary(&self) -> LedgerSummary {
        let present = self.records.iter().filter(|r| !r.in_time.is_absent()).count();
        LedgerSummary {
            present,
            absent: self.records.len() - present,
            total: self.records.len(),
        }
    }
}

/// Directory of daily ledger files.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    dir: PathBuf,
}

impl LedgerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("attendance_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Open the ledger for `date`, building it from `roster` when needed.
    ///
    /// A readable, non-empty file is returned as-is. A missing, empty or
    /// unparsable file is replaced by one `Absent/Absent` record per roster
    /// entry. Corruption never blocks startup, but it does discard that day's
    /// existing records.
    pub fn initialize(
        &self,
        date: NaiveDate,
        roster: &Roster,
    ) -> Result<(AttendanceLedger, LedgerInit), LedgerError> {
        let path = self.path_for(date);

        let init = match read_records(&path) {
            Ok(Some(records)) if !records.is_empty() => {
                tracing::info!(path = %path.display(), records = records.len(), "ledger loaded");
                return Ok((
                    AttendanceLedger {
                        date,
                        path,
                        records,
                    },
                    LedgerInit::Loaded,
                ));
            }
            Ok(Some(_)) => LedgerInit::Recovered {
                reason: "file has no records".into(),
            },
            Ok(None) => LedgerInit::Created,
            Err(ReadFailure::Io(source)) => return Err(LedgerError::Io { path, source }),
            Err(ReadFailure::Malformed(reason)) => LedgerInit::Recovered { reason },
        };

        if let LedgerInit::Recovered { reason } = &init {
            tracing::warn!(
                path = %path.display(),
                reason = %reason,
                "ledger unreadable; rebuilding from roster and discarding today's records"
            );
        }

        let records = roster
            .entries()
            .iter()
            .map(|identity| AttendanceRecord::absent(date, identity.name.clone(), identity.id.clone()))
            .collect();
        let ledger = AttendanceLedger {
            date,
            path,
            records,
        };
        ledger.save()?;

        tracing::info!(
            path = %ledger.path.display(),
            records = ledger.records.len(),
            "ledger created from roster"
        );
        Ok((ledger, init))
    }

    /// Read the ledger for `date` without creating or repairing it.
    pub fn load(&self, date: NaiveDate) -> Result<Option<AttendanceLedger>, LedgerError> {
        let path = self.path_for(date);
        match read_records(&path) {
            Ok(Some(records)) => Ok(Some(AttendanceLedger {
                date,
                path,
                records,
            })),
            Ok(None) => Ok(None),
            Err(ReadFailure::Io(source)) => Err(LedgerError::Io { path, source }),
            Err(ReadFailure::Malformed(reason)) => Err(LedgerError::Corrupt { path, reason }),
        }
    }
}

enum ReadFailure {
    Io(io::Error),
    Malformed(String),
}

/// `Ok(None)` when the file does not exist.
fn read_records(path: &Path) -> Result<Option<Vec<AttendanceRecord>>, ReadFailure> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ReadFailure::Io(e)),
    };

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers = reader
        .headers()
        .map_err(|e| ReadFailure::Malformed(e.to_string()))?;
    if headers.is_empty() {
        return Ok(Some(Vec::new()));
    }
    // Rows deserialize by column name; order and extra columns do not matter.
    if let Some(missing) = HEADER.iter().find(|&&col| !headers.iter().any(|h| h == col)) {
        return Err(ReadFailure::Malformed(format!("missing column {missing:?}")));
    }

    let mut records = Vec::new();
    for row in reader.deserialize::<AttendanceRecord>() {
        let record = row.map_err(|e| ReadFailure::Malformed(e.to_string()))?;
        if record.in_time.is_absent() && !record.out_time.is_absent() {
            tracing::warn!(
                path = %path.display(),
                id = %record.id,
                "record has an out-time without an in-time; keeping it as absent"
            );
        }
        records.push(record);
    }
    Ok(Some(records))
}

fn encode(records: &[AttendanceRecord]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer
        .into_inner()
        .map_err(|e| LedgerError::Csv(csv::Error::from(e.into_error())))
}
