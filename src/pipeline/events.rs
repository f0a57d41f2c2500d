//! 事件图片持久化与列表

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EventNameError {
    #[error("not an event file name: {0}")]
    Malformed(String),
}

/// 事件列表条目
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventEntry {
    /// `YYYY-MM-DD HH:MM:SS.mmm`
    pub time: String,
    /// `{base_url}/result_files/{file}`
    pub path: String,
}

#[derive(Clone, Debug)]
pub struct EventStore {
    dir: PathBuf,
}

impl EventStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("can not create event dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(captured_at: &DateTime<Local>) -> String {
        format!("{}.jpg", crate::gen_time_string(captured_at, "_"))
    }

    /// Writes `image` as JPEG named after the capture time.
    pub fn save(&self, image: &RgbImage, captured_at: &DateTime<Local>) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(captured_at));
        image
            .save(&path)
            .with_context(|| format!("can not write {}", path.display()))?;
        Ok(path)
    }

    /// Best-effort save, failures are logged and the frame dropped.
    pub fn persist(&self, image: &RgbImage, captured_at: &DateTime<Local>) -> Option<PathBuf> {
        match self.save(image, captured_at) {
            Ok(path) => {
                log::info!("💾 event saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("⚠️  event dropped: {:#}", e);
                None
            }
        }
    }

    /// Saved events sorted by file name. Non-event files are skipped.
    pub fn list(&self, base_url: &str) -> Vec<EventEntry> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(".jpg"))
            .collect();
        names.sort();

        let base_url = base_url.trim_end_matches('/');
        names
            .into_iter()
            .filter_map(|name| match parse_event_name(&name) {
                Ok(time) => Some(EventEntry {
                    time,
                    path: format!("{}/result_files/{}", base_url, name),
                }),
                Err(e) => {
                    log::debug!("{}", e);
                    None
                }
            })
            .collect()
    }
}

/// `YYYY_MM_DD_HH_MM_SS_mmm.jpg` → `YYYY-MM-DD HH:MM:SS.mmm`
pub fn parse_event_name(name: &str) -> Result<String, EventNameError> {
    let re = Regex::new(r"^(\d{4})_(\d{2})_(\d{2})_(\d{2})_(\d{2})_(\d{2})_(\d{3})\.jpg$")
        .map_err(|_| EventNameError::Malformed(name.to_string()))?;
    let caps = re
        .captures(name)
        .ok_or_else(|| EventNameError::Malformed(name.to_string()))?;
    Ok(format!(
        "{}-{}-{} {}:{}:{}.{}",
        &caps[1], &caps[2], &caps[3], &caps[4], &caps[5], &caps[6], &caps[7]
    ))
}
