//! Frame sinks: where [`Simulation::run_with`](crate::core::Simulation::run_with)
//! sends each post-step snapshot.

use crate::core::frame::Frame;
use crate::error::Result;
use nalgebra::Point2;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::Path;

/// Consumer of frames, called once per committed step.
pub trait FrameSink {
    /// Receive one frame.
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Called once after the final frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps every frame in memory.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryBuffer {
    frames: Vec<Frame>,
}

impl TrajectoryBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames received so far.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Take ownership of the frames.
    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    /// `(time, position)` samples of one agent.
    pub fn trajectory_of(&self, id: u32) -> Vec<(f64, Point2<f64>)> {
        self.frames
            .iter()
            .filter_map(|f| f.agent(id).map(|a| (f.time, a.position)))
            .collect()
    }
}

impl FrameSink for TrajectoryBuffer {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.frames.push(frame.clone());
        Ok(())
    }
}

/// Writes one JSON object per frame per line.
#[derive(Debug)]
pub struct JsonLinesWriter<W: Write> {
    writer: W,
    written: u64,
}

impl JsonLinesWriter<BufWriter<File>> {
    /// Create (or truncate) `path` and write frames to it.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesWriter<W> {
    /// Wrap any writer.
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of frames written.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> FrameSink for JsonLinesWriter<W> {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        tracing::debug!(frames = self.written, "trajectory flushed");
        Ok(())
    }
}

/// Read frames written by [`JsonLinesWriter`], skipping blank lines.
pub fn read_json_lines<R: BufRead>(reader: R) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        frames.push(serde_json::from_str(&line)?);
    }
    Ok(frames)
}
