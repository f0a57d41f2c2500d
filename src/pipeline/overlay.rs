//! 结果叠加: 把最近一次推理结果画到实时画面上, 保持若干帧

use std::sync::Arc;

use image::{Rgb, RgbImage};

use super::{FrameResult, PatrolState, Slot};
use crate::detection::{draw_polylines, external_contours};
use crate::Segment;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);

pub struct OverlayCompositor {
    state: Arc<PatrolState>,
    inbox: Slot<FrameResult>,
    contours: Option<Vec<Segment>>, // 最近结果掩码的外轮廓
    segments: Vec<Segment>,
    hold: u32,
    hold_frames: u32,
}

impl OverlayCompositor {
    pub fn new(state: Arc<PatrolState>, inbox: Slot<FrameResult>, hold_frames: u32) -> Self {
        Self {
            state,
            inbox,
            contours: None,
            segments: Vec::new(),
            hold: 0,
            hold_frames,
        }
    }

    /// Picks up a pending result, then draws the held one onto `frame`.
    /// Returns whether anything was drawn.
    pub fn composite(&mut self, frame: &mut RgbImage) -> bool {
        if let Some(result) = self.inbox.try_take() {
            self.contours = Some(external_contours(&result.mask));
            self.segments = result.segments;
            self.hold = self.hold_frames;
        }

        if !self.state.is_active() || self.hold == 0 {
            return false;
        }
        let contours = match &self.contours {
            Some(c) => c,
            None => return false,
        };

        draw_polylines(frame, contours, GREEN, 2);
        draw_polylines(frame, &self.segments, RED, 3);
        self.hold -= 1;
        true
    }

    pub fn hold(&self) -> u32 {
        self.hold
    }
}
