//! 准入闸门: 决定哪些实时帧送去推理

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use image::RgbImage;

use super::{Frame, Slot, WorkItem};
use crate::control::ControlError;

/// 巡检开关 + 检测间隔, 跨线程共享
#[derive(Debug)]
pub struct PatrolState {
    active: AtomicBool,
    interval_bits: AtomicU64, // f64 bits
}

impl PatrolState {
    /// An unusable `interval_seconds` falls back to [`DEFAULT_INTERVAL`].
    pub fn new(active: bool, interval_seconds: f64) -> Self {
        let interval_seconds = check_interval(interval_seconds).unwrap_or_else(|e| {
            log::warn!("⚠️  {}, using {}s", e, DEFAULT_INTERVAL);
            DEFAULT_INTERVAL
        });
        Self {
            active: AtomicBool::new(active),
            interval_bits: AtomicU64::new(interval_seconds.to_bits()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn interval_seconds(&self) -> f64 {
        f64::from_bits(self.interval_bits.load(Ordering::Relaxed))
    }

    /// Rejects values [`check_interval`] refuses, leaving the state unchanged.
    pub fn set_interval(&self, seconds: f64) -> Result<(), ControlError> {
        let seconds = check_interval(seconds)?;
        self.interval_bits.store(seconds.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_seconds()).unwrap_or(Duration::MAX)
    }
}

impl Default for PatrolState {
    fn default() -> Self {
        Self::new(false, DEFAULT_INTERVAL)
    }
}

pub const DEFAULT_INTERVAL: f64 = 4.0;

/// A usable detection interval: finite, positive and representable as a `Duration`.
pub fn check_interval(seconds: f64) -> Result<f64, ControlError> {
    if !seconds.is_finite() {
        return Err(ControlError::NotANumber(seconds.to_string()));
    }
    if seconds <= 0.0 {
        return Err(ControlError::NonPositive(seconds));
    }
    if Duration::try_from_secs_f64(seconds).is_err() {
        return Err(ControlError::OutOfRange(seconds));
    }
    Ok(seconds)
}

pub struct AdmissionGate {
    state: Arc<PatrolState>,
    last_submit: Option<Instant>,
    outbox: Slot<WorkItem>,
}

impl AdmissionGate {
    pub fn new(state: Arc<PatrolState>, outbox: Slot<WorkItem>) -> Self {
        Self {
            state,
            last_submit: None,
            outbox,
        }
    }

    /// Forwards a copy of `image` when patrol is active and the interval has
    /// elapsed since the last successful forward. Never blocks.
    pub fn admit(&mut self, image: &RgbImage, captured_at: DateTime<Local>, now: Instant) -> bool {
        if !self.state.is_active() {
            return false;
        }
        if let Some(last) = self.last_submit {
            if now.saturating_duration_since(last) < self.state.interval() {
                return false;
            }
        }

        let frame = Frame::new(image.clone(), captured_at);
        if self.outbox.offer(WorkItem::Frame(frame)) {
            self.last_submit = Some(now);
            log::debug!("📤 frame {} forwarded", captured_at.format("%H:%M:%S%.3f"));
            true
        } else {
            log::trace!("worker busy, frame dropped");
            false
        }
    }

    pub fn state(&self) -> &Arc<PatrolState> {
        &self.state
    }
}
