//! 图片序列目录回放

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::{imageops, RgbImage};

use super::FrameSource;

pub struct ImageDirSource {
    files: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
    frame_interval: Option<Duration>,
    last: Option<Instant>,
}

impl ImageDirSource {
    /// Collects `jpg / jpeg / png` files under `dir`, sorted by name.
    pub fn open<P: AsRef<Path>>(dir: P, width: u32, height: u32) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("can not open source {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension()
                    .and_then(|x| x.to_str())
                    .map(|x| matches!(x.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                    .unwrap_or(false)
            })
            .collect();
        if files.is_empty() {
            return Err(anyhow!("no images in {}", dir.display()));
        }
        files.sort();
        log::info!("📂 {} frames from {}", files.len(), dir.display());

        Ok(Self {
            files,
            cursor: 0,
            width,
            height,
            frame_interval: None,
            last: None,
        })
    }

    /// Paces reads to `fps` frames per second.
    pub fn with_fps(mut self, fps: f64) -> Self {
        if fps > 0.0 {
            self.frame_interval = Some(Duration::from_secs_f64(1.0 / fps));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

impl FrameSource for ImageDirSource {
    fn read(&mut self) -> Option<RgbImage> {
        let path = self.files.get(self.cursor)?;
        self.cursor += 1;

        let img = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                log::error!("❌ failed to read {}: {}", path.display(), e);
                return None;
            }
        };
        let img = if img.dimensions() == (self.width, self.height) {
            img
        } else {
            imageops::resize(&img, self.width, self.height, imageops::FilterType::Triangle)
        };

        self.pace();
        Some(img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_reads_sorted_and_resized() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(20, 10, Rgb([200, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(20, 10, Rgb([0, 0, 200]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();

        let mut src = ImageDirSource::open(dir.path(), 40, 20).unwrap();
        assert_eq!(src.len(), 2);
        let first = src.read().unwrap();
        assert_eq!(first.dimensions(), (40, 20));
        assert_eq!(first.get_pixel(5, 5), &Rgb([0, 0, 200]));
        assert!(src.read().is_some());
        assert!(src.read().is_none());
    }

    #[test]
    fn test_empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::open(dir.path(), 4, 4).is_err());
    }

    #[test]
    fn test_unreadable_frame_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut src = ImageDirSource::open(dir.path(), 4, 4).unwrap();
        assert!(src.read().is_none());
    }
}
