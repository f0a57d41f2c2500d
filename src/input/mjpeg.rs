//! multipart MJPEG 输出

use std::io::Write;

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbImage};

pub const BOUNDARY: &str = "frame";

/// Writes each frame as one `--frame` part of a `multipart/x-mixed-replace` body.
pub struct MjpegWriter<W: Write> {
    out: W,
    quality: u8,
    buf: Vec<u8>,
    frames: usize,
}

impl<W: Write> MjpegWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            quality: 80,
            buf: Vec::new(),
            frames: 0,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn content_type() -> String {
        format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
    }

    pub fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        self.buf.clear();
        JpegEncoder::new_with_quality(&mut self.buf, self.quality).encode(
            frame.as_raw(),
            frame.width(),
            frame.height(),
            ExtendedColorType::Rgb8,
        )?;

        write!(
            self.out,
            "--{}\r\nContent-Type: image/jpeg\r\n\r\n",
            BOUNDARY
        )?;
        self.out.write_all(&self.buf)?;
        self.out.write_all(b"\r\n")?;
        self.out.flush()?;
        self.frames += 1;
        Ok(())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_clamped() {
        let img = RgbImage::from_fn(32, 32, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
        let encode = |quality| {
            let mut w = MjpegWriter::new(Vec::new()).with_quality(quality);
            w.write_frame(&img).unwrap();
            w.into_inner()
        };
        assert_eq!(encode(0), encode(1));
        assert!(encode(1).len() < encode(100).len());
    }

    #[test]
    fn test_frame_part_layout() {
        let mut w = MjpegWriter::new(Vec::new());
        w.write_frame(&RgbImage::new(16, 8)).unwrap();
        w.write_frame(&RgbImage::new(16, 8)).unwrap();
        assert_eq!(w.frames(), 2);

        let body = w.into_inner();
        let head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
        assert!(body.starts_with(head));
        // JPEG SOI right after the part header
        assert_eq!(&body[head.len()..head.len() + 2], &[0xFF, 0xD8]);
        assert!(body.ends_with(b"\xFF\xD9\r\n"));

        let jpeg = &body[head.len()..];
        let end = jpeg.windows(head.len()).position(|x| x == head).unwrap();
        assert!(image::load_from_memory(&jpeg[..end - 2]).is_ok());
    }
}
