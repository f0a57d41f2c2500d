//! 巡检控制接口: 开始 / 结束 / 状态 / 检测间隔 / 事件列表

use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::pipeline::{EventEntry, EventStore, PatrolState};

#[derive(Error, Debug, PartialEq)]
pub enum ControlError {
    #[error("interval is not a number: {0}")]
    NotANumber(String),
    #[error("interval must be positive, got {0}")]
    NonPositive(f64),
    #[error("interval {0} is too large")]
    OutOfRange(f64),
    #[error("request has no \"step\" field")]
    MissingStep,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControlResponse {
    pub status: String,
    pub message: String,
    pub timestamp: String,
}

impl ControlResponse {
    fn success(message: &str) -> Self {
        Self {
            status: "success".into(),
            message: message.into(),
            timestamp: now(),
        }
    }

    fn failure(message: &str) -> Self {
        Self {
            status: "failure".into(),
            message: message.into(),
            timestamp: now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusResponse {
    pub patrol_status: String,
    pub text: String,
    pub det_step: String,
    pub timestamp: String,
}

fn now() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct ControlSurface {
    state: Arc<PatrolState>,
    events: EventStore,
}

impl ControlSurface {
    pub fn new(state: Arc<PatrolState>, events: EventStore) -> Self {
        Self { state, events }
    }

    pub fn start_patrol(&self) -> ControlResponse {
        self.state.set_active(true);
        log::info!("▶️  patrol started");
        ControlResponse::success("Inspection System Active!")
    }

    pub fn end_patrol(&self) -> ControlResponse {
        self.state.set_active(false);
        log::info!("⏸️  patrol stopped");
        ControlResponse::success("Inspection System Deactivated!")
    }

    pub fn get_status(&self) -> StatusResponse {
        let status = if self.state.is_active() {
            "Active"
        } else {
            "Inactive"
        };
        StatusResponse {
            patrol_status: status.into(),
            text: status.into(),
            det_step: format!("{:?}", self.state.interval_seconds()),
            timestamp: now(),
        }
    }

    /// Accepts `{"step": 2.5}` or `{"step": "2.5"}`.
    pub fn set_interval(&self, request: &Value) -> ControlResponse {
        match parse_step(request).and_then(|s| self.state.set_interval(s)) {
            Ok(()) => {
                log::info!("⏱️  interval set to {}s", self.state.interval_seconds());
                ControlResponse::success("Interval set successfully.")
            }
            Err(e) => {
                log::warn!("⚠️  interval rejected: {}", e);
                ControlResponse::failure("Failed to set interval.")
            }
        }
    }

    pub fn get_result(&self, base_url: &str) -> Vec<EventEntry> {
        self.events.list(base_url)
    }

    /// Console command: `start | stop | status | step <seconds> | results`.
    /// Returns the JSON reply, or `None` for an unknown command.
    pub fn handle_command(&self, line: &str) -> Option<String> {
        let mut parts = line.split_whitespace();
        let reply = match parts.next()? {
            "start" => serde_json::to_string(&self.start_patrol()),
            "stop" => serde_json::to_string(&self.end_patrol()),
            "status" => serde_json::to_string(&self.get_status()),
            "step" => {
                let arg = parts.next().unwrap_or_default();
                let request = serde_json::json!({ "step": arg });
                serde_json::to_string(&self.set_interval(&request))
            }
            "results" => serde_json::to_string(&self.get_result("")),
            _ => return None,
        };
        reply.ok()
    }
}

fn parse_step(request: &Value) -> Result<f64, ControlError> {
    let step = request.get("step").ok_or(ControlError::MissingStep)?;
    match step {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ControlError::NotANumber(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ControlError::NotANumber(s.clone())),
        other => Err(ControlError::NotANumber(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn surface() -> (ControlSurface, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let events = EventStore::new(dir.path()).unwrap();
        (
            ControlSurface::new(Arc::new(PatrolState::default()), events),
            dir,
        )
    }

    #[test]
    fn test_start_stop_status() {
        let (ctl, _dir) = surface();
        assert_eq!(ctl.get_status().patrol_status, "Inactive");
        assert!(ctl.start_patrol().is_success());
        let status = ctl.get_status();
        assert_eq!(status.patrol_status, "Active");
        assert_eq!(status.text, "Active");
        assert_eq!(status.det_step, "4.0");
        assert_eq!(status.timestamp.len(), "2026-10-17 08:30:15".len());
        assert!(ctl.end_patrol().is_success());
        assert_eq!(ctl.get_status().patrol_status, "Inactive");
    }

    #[test]
    fn test_set_interval_accepts_numbers_and_strings() {
        let (ctl, _dir) = surface();
        assert!(ctl.set_interval(&json!({"step": 2.5})).is_success());
        assert_eq!(ctl.get_status().det_step, "2.5");
        assert!(ctl.set_interval(&json!({"step": "3"})).is_success());
        assert_eq!(ctl.get_status().det_step, "3.0");
    }

    #[test]
    fn test_set_interval_rejects_invalid() {
        let (ctl, _dir) = surface();
        for bad in [
            json!({"step": "abc"}),
            json!({"step": 0}),
            json!({"step": -1.0}),
            json!({"step": null}),
            json!({"step": "1e20"}),
            json!({"step": 1e20}),
            json!({}),
        ] {
            let resp = ctl.set_interval(&bad);
            assert_eq!(resp.status, "failure");
            assert_eq!(resp.message, "Failed to set interval.");
        }
        assert_eq!(ctl.get_status().det_step, "4.0");
    }

    #[test]
    fn test_status_after_bad_config_interval() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["-1", "0", "1e20"] {
            let config: crate::config::PipelineConfig =
                serde_json::from_str(&format!(r#"{{"interval_seconds": {}}}"#, bad)).unwrap();
            let state = Arc::new(PatrolState::new(true, config.interval_seconds));
            let ctl = ControlSurface::new(state, EventStore::new(dir.path()).unwrap());
            assert_eq!(ctl.get_status().det_step, "4.0");
        }
    }

    #[test]
    fn test_parse_step_errors() {
        assert_eq!(parse_step(&json!({})), Err(ControlError::MissingStep));
        assert_eq!(
            parse_step(&json!({"step": "x"})),
            Err(ControlError::NotANumber("x".into()))
        );
    }

    #[test]
    fn test_handle_command() {
        let (ctl, _dir) = surface();
        let reply: Value = serde_json::from_str(&ctl.handle_command("start").unwrap()).unwrap();
        assert_eq!(reply["message"], "Inspection System Active!");
        let reply: Value = serde_json::from_str(&ctl.handle_command("step 1.5").unwrap()).unwrap();
        assert_eq!(reply["status"], "success");
        let reply: Value = serde_json::from_str(&ctl.handle_command("status").unwrap()).unwrap();
        assert_eq!(reply["det_step"], "1.5");
        assert_eq!(ctl.handle_command("results").unwrap(), "[]");
        assert!(ctl.handle_command("reboot").is_none());
        assert!(ctl.handle_command("   ").is_none());
    }
}
