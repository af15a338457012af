//! Frame source and sink boundaries of the recognition loop, plus its clock.

use crate::matcher::MatchResult;
use crate::types::BoundingBox;
use chrono::{NaiveTime, Timelike};
use image::GrayImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("could not open video source: {0}")]
    Open(String),
    #[error("end of stream")]
    EndOfStream,
    #[error("device error: {0}")]
    Device(String),
}

/// An opened video source. Dropping it releases the device.
pub trait FrameSource {
    /// Block until the next frame. Any error ends the recognition session.
    fn read(&mut self) -> Result<GrayImage, SourceError>;
}

/// What the loop concluded about one face region.
#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Known(MatchResult),
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub face: BoundingBox,
    pub label: Label,
}

impl Annotation {
    /// Caption drawn next to the box: `"Name (id)"` or `"Unknown"`.
    pub fn caption(&self) -> String {
        match &self.label {
            Label::Known(m) => format!("{} ({})", m.name, m.id),
            Label::Unknown => "Unknown".to_string(),
        }
    }
}

/// Receives each processed frame with its annotations. Display only; nothing
/// here feeds back into attendance state.
pub trait FrameSink {
    fn present(&mut self, frame: &GrayImage, annotations: &[Annotation]);
}

/// Sink that discards frames.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &GrayImage, _annotations: &[Annotation]) {}
}

/// Source of sighting timestamps.
pub trait Clock {
    fn now(&self) -> NaiveTime;
}

/// Local wall-clock time, whole seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        let now = chrono::Local::now().time();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
