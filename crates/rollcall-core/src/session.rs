//! Process-wide attendance context: the gallery and today's ledger, loaded
//! once at startup and passed explicitly to whatever drives recognition.

use crate::gallery::{Gallery, GalleryError, GalleryStore};
use crate::ledger::{AttendanceLedger, LedgerError, LedgerInit, LedgerStore};
use crate::roster::Roster;
use chrono::NaiveDate;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Gallery(#[from] GalleryError),
    #[error("scan dataset directory {}: {source}", dir.display())]
    Roster {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Where a fresh day's ledger takes its identities from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterSource {
    /// Scan `{name}_{id}` folders in a dataset directory.
    Dataset(PathBuf),
    /// Use the distinct identities in the gallery.
    Gallery,
}

impl RosterSource {
    pub fn resolve(&self, gallery: &Gallery) -> Result<Roster, SessionError> {
        match self {
            RosterSource::Dataset(dir) => Roster::scan(dir).map_err(|source| SessionError::Roster {
                dir: dir.clone(),
                source,
            }),
            RosterSource::Gallery => Ok(Roster::from_gallery(gallery)),
        }
    }
}

pub struct AttendanceSession {
    pub gallery: Gallery,
    pub ledger: AttendanceLedger,
    /// How today's ledger was obtained; `Recovered` means data was discarded.
    pub ledger_init: LedgerInit,
}

impl AttendanceSession {
    /// Load the gallery and open (or create) the ledger for `date`.
    ///
    /// A corrupt gallery is fatal. A corrupt ledger is rebuilt.
    pub fn open(
        gallery_store: &GalleryStore,
        ledger_store: &LedgerStore,
        roster_source: &RosterSource,
        date: NaiveDate,
    ) -> Result<Self, SessionError> {
        let gallery = gallery_store.load()?;
        let roster = roster_source.resolve(&gallery)?;
        let (ledger, ledger_init) = ledger_store.initialize(date, &roster)?;

        tracing::info!(
            date = %date,
            gallery_rows = gallery.len(),
            roster = roster.len(),
            ledger = ?ledger_init,
            "attendance session opened"
        );

        Ok(Self {
            gallery,
            ledger,
            ledger_init,
        })
    }

    /// Build a session from already-loaded parts.
    pub fn from_parts(gallery: Gallery, ledger: AttendanceLedger, ledger_init: LedgerInit) -> Self {
        Self {
            gallery,
            ledger,
            ledger_init,
        }
    }
}
