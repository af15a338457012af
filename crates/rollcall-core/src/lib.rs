//! rollcall-core: Face-matching attendance engine.
//!
//! Holds the enrolled-face gallery, cosine matching against it, the daily
//! CSV attendance ledger, and the recognition loop that ties them to a
//! frame source. Camera access and the command line live in sibling crates.

pub mod detector;
pub mod enrollment;
pub mod gallery;
pub mod ledger;
pub mod matcher;
pub mod recognition;
pub mod recognizer;
pub mod roster;
pub mod session;
pub mod source;
pub mod types;

mod persist;

pub use enrollment::{EnrollError, EnrollResult, EnrollmentPipeline};
pub use gallery::{Gallery, GalleryError, GalleryStore};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, LedgerInit, LedgerStore, Mark};
pub use matcher::{CosineMatcher, MatchOutcome, MatchResult, Matcher, DEFAULT_THRESHOLD};
pub use recognition::{RecognitionError, RecognitionLoop, RecognitionReport, StopReason};
pub use roster::Roster;
pub use session::{AttendanceSession, RosterSource, SessionError};
pub use source::{Annotation, Clock, FrameSink, FrameSource, SourceError, SystemClock};
pub use types::{BoundingBox, Embedding, Identity, StudentId};
