//! 采集/渲染主循环

use std::io::Write;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;

use super::{AdmissionGate, OverlayCompositor};
use crate::input::{FrameSource, MjpegWriter};

pub struct LiveLoop<S, W: Write> {
    source: S,
    gate: AdmissionGate,
    overlay: OverlayCompositor,
    output: MjpegWriter<W>,
    // fps 统计
    count: usize,
    last: Instant,
    current_fps: f64,
}

impl<S: FrameSource, W: Write> LiveLoop<S, W> {
    pub fn new(
        source: S,
        gate: AdmissionGate,
        overlay: OverlayCompositor,
        output: MjpegWriter<W>,
    ) -> Self {
        Self {
            source,
            gate,
            overlay,
            output,
            count: 0,
            last: Instant::now(),
            current_fps: 0.0,
        }
    }

    /// Handles one frame. `Ok(false)` once the source is exhausted.
    pub fn step(&mut self) -> Result<bool> {
        let mut frame = match self.source.read() {
            Some(frame) => frame,
            None => return Ok(false),
        };
        let captured_at = Local::now();

        self.gate.admit(&frame, captured_at, Instant::now());
        self.overlay.composite(&mut frame);
        self.output.write_frame(&frame)?;

        self.count += 1;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 5.0 {
            self.current_fps = self.count as f64 / elapsed;
            log::debug!("🎞️  {:.1} fps", self.current_fps);
            self.count = 0;
            self.last = Instant::now();
        }
        Ok(true)
    }

    /// Runs until the source ends or the output fails, returning frames written.
    pub fn run(&mut self) -> Result<usize> {
        while self.step()? {}
        log::info!("📴 source ended after {} frames", self.output.frames());
        Ok(self.output.frames())
    }

    pub fn fps(&self) -> f64 {
        self.current_fps
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }
}
