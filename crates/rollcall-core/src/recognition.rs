//! Recognition loop: frames in, ledger updates and annotated frames out.
//!
//! Single-threaded and synchronous. The loop blocks on frame acquisition,
//! checks the stop flag once per frame, and never preempts a frame midway.
//! Detector and embedder failures only cost the affected frame or crop.

use crate::detector::{crop_face, FaceDetector};
use crate::ledger::{LedgerError, SightingOutcome};
use crate::matcher::{CosineMatcher, MatchOutcome, Matcher, DEFAULT_THRESHOLD};
use crate::recognizer::FaceEmbedder;
use crate::session::AttendanceSession;
use crate::source::{Annotation, Clock, FrameSink, FrameSource, Label, SourceError, SystemClock};
use image::GrayImage;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("video source failed to open: {0}")]
    SourceOpen(#[source] SourceError),
    #[error("attendance ledger: {0}")]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The stop flag was raised.
    Signal,
    EndOfStream,
    /// The source failed mid-session.
    SourceFailure(String),
}

/// Counters for one recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionReport {
    pub frames: usize,
    pub faces: usize,
    /// Matches that changed the ledger.
    pub sightings: usize,
    /// Matches whose id has no record in today's ledger.
    pub unregistered: usize,
    pub unknown_faces: usize,
    pub detection_failures: usize,
    pub embedding_failures: usize,
    pub stop_reason: StopReason,
}

impl RecognitionReport {
    fn new() -> Self {
        Self {
            frames: 0,
            faces: 0,
            sightings: 0,
            unregistered: 0,
            unknown_faces: 0,
            detection_failures: 0,
            embedding_failures: 0,
            stop_reason: StopReason::EndOfStream,
        }
    }
}

pub struct RecognitionLoop<D, E, K, C = SystemClock, M = CosineMatcher> {
    detector: D,
    embedder: E,
    sink: K,
    clock: C,
    matcher: M,
    threshold: f32,
    state: LoopState,
}

impl<D, E, K> RecognitionLoop<D, E, K>
where
    D: FaceDetector,
    E: FaceEmbedder,
    K: FrameSink,
{
    pub fn new(detector: D, embedder: E, sink: K) -> Self {
        Self::with_clock(detector, embedder, sink, SystemClock)
    }
}

impl<D, E, K, C> RecognitionLoop<D, E, K, C>
where
    D: FaceDetector,
    E: FaceEmbedder,
    K: FrameSink,
    C: Clock,
{
    pub fn with_clock(detector: D, embedder: E, sink: K, clock: C) -> Self {
        Self {
            detector,
            embedder,
            sink,
            clock,
            matcher: CosineMatcher,
            threshold: DEFAULT_THRESHOLD,
            state: LoopState::Idle,
        }
    }
}

impl<D, E, K, C, M> RecognitionLoop<D, E, K, C, M>
where
    D: FaceDetector,
    E: FaceEmbedder,
    K: FrameSink,
    C: Clock,
    M: Matcher,
{
    /// Swap the identity matcher, keeping every other setting.
    pub fn with_matcher<N: Matcher>(self, matcher: N) -> RecognitionLoop<D, E, K, C, N> {
        RecognitionLoop {
            detector: self.detector,
            embedder: self.embedder,
            sink: self.sink,
            clock: self.clock,
            matcher,
            threshold: self.threshold,
            state: self.state,
        }
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Open the source and process frames until `stop` is raised or the
    /// source ends.
    ///
    /// If `open` fails the loop goes straight from `Idle` to `Stopped` and the
    /// failure is returned. Otherwise the ledger is flushed once more on the
    /// way out.
    pub fn run<S, O>(
        &mut self,
        open: O,
        session: &mut AttendanceSession,
        stop: &AtomicBool,
    ) -> Result<RecognitionReport, RecognitionError>
    where
        S: FrameSource,
        O: FnOnce() -> Result<S, SourceError>,
    {
        let mut source = match open() {
            Ok(source) => source,
            Err(e) => {
                self.state = LoopState::Stopped;
                tracing::error!(error = %e, "video source unavailable; recognition not started");
                return Err(RecognitionError::SourceOpen(e));
            }
        };

        self.state = LoopState::Running;
        tracing::info!(
            threshold = self.threshold,
            gallery_rows = session.gallery.len(),
            ledger = %session.ledger.path().display(),
            "recognition started"
        );

        let mut report = RecognitionReport::new();
        let outcome = self.drive(&mut source, session, stop, &mut report);
        drop(source);
        self.state = LoopState::Stopped;

        report.stop_reason = outcome?;
        session.ledger.save()?;

        tracing::info!(
            frames = report.frames,
            faces = report.faces,
            sightings = report.sightings,
            unknown = report.unknown_faces,
            reason = ?report.stop_reason,
            "recognition stopped"
        );
        Ok(report)
    }

    fn drive<S: FrameSource>(
        &mut self,
        source: &mut S,
        session: &mut AttendanceSession,
        stop: &AtomicBool,
        report: &mut RecognitionReport,
    ) -> Result<StopReason, RecognitionError> {
        loop {
            let frame = match source.read() {
                Ok(frame) => frame,
                Err(SourceError::EndOfStream) => return Ok(StopReason::EndOfStream),
                Err(e) => {
                    tracing::warn!(error = %e, "frame acquisition failed; stopping");
                    return Ok(StopReason::SourceFailure(e.to_string()));
                }
            };
            report.frames += 1;

            let annotations = self.process_frame(&frame, session, report)?;
            self.sink.present(&frame, &annotations);

            if stop.load(Ordering::SeqCst) {
                return Ok(StopReason::Signal);
            }
        }
    }

    fn process_frame(
        &mut self,
        frame: &GrayImage,
        session: &mut AttendanceSession,
        report: &mut RecognitionReport,
    ) -> Result<Vec<Annotation>, LedgerError> {
        let faces = match self.detector.detect(frame) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, frame = report.frames, "detection failed; skipping frame");
                report.detection_failures += 1;
                Vec::new()
            }
        };

        let mut annotations = Vec::with_capacity(faces.len());
        for face in faces {
            report.faces += 1;

            let Some(crop) = crop_face(frame, &face) else {
                tracing::debug!(?face, "face box outside frame; skipping");
                report.embedding_failures += 1;
                continue;
            };
            let embedding = match self.embedder.embed(&crop) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed; skipping face");
                    report.embedding_failures += 1;
                    continue;
                }
            };

            let outcome = self.matcher.best_match(&embedding, &session.gallery, self.threshold);
            let label = match outcome {
                MatchOutcome::Known(m) => {
                    match session.ledger.record_sighting(&m.id, self.clock.now())? {
                        SightingOutcome::Unregistered => report.unregistered += 1,
                        _ => report.sightings += 1,
                    }
                    Label::Known(m)
                }
                MatchOutcome::Unknown { best_score } => {
                    tracing::debug!(?best_score, "face not recognized");
                    report.unknown_faces += 1;
                    Label::Unknown
                }
            };
            annotations.push(Annotation { face, label });
        }

        Ok(annotations)
    }
}
