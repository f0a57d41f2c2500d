// SAM2-UNet 掩码精修
//
// 输入: 单个检测框的裁剪图 (框外已被粗轮廓遮罩)
// 输出: 与裁剪图同尺寸的 {0, 1} 掩码

use anyhow::{anyhow, Result};
use image::{imageops, GrayImage, Luma, RgbImage};

use super::{letterbox, to_tensor, MaskRefiner};
use crate::config::PipelineConfig;
use crate::detection::mask::MaskF32;
use crate::ort_backend::{InferenceEngine, InputLayout};

const MEAN: [f32; 3] = [123.675, 116.28, 103.53];
const STD: [f32; 3] = [58.395, 57.12, 57.375];

pub struct Sam2<E> {
    engine: E,
    size: u32,
    threshold: f32,
    layout: InputLayout,
}

impl<E: InferenceEngine> Sam2<E> {
    pub fn new(engine: E, config: &PipelineConfig) -> Self {
        Self {
            engine,
            size: config.refiner_size,
            threshold: config.refine_threshold,
            layout: config.refiner_layout,
        }
    }

    /// Logit map → `{0, 1}` mask sized `width x height`.
    ///
    /// sigmoid, min-max normalize, stretch back to the `max(w, h)` square the
    /// letterbox came from, keep the top-left window, threshold.
    pub fn postprocess(&self, logits: &[f32], width: u32, height: u32) -> Result<GrayImage> {
        let size = self.size as usize;
        if logits.len() != size * size {
            return Err(anyhow!(
                "refiner returned {} values, expected {}x{}",
                logits.len(),
                size,
                size
            ));
        }

        let probs: Vec<f32> = logits.iter().map(|&x| sigmoid(x)).collect();
        let (min, max) = probs
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let norm: Vec<f32> = probs
            .iter()
            .map(|&v| (v - min) / (max - min + 1e-8))
            .collect();

        let res = MaskF32::from_raw(self.size, self.size, norm)
            .ok_or_else(|| anyhow!("can not create image from refiner output"))?;
        let anti_size = width.max(height);
        let res = imageops::resize(&res, anti_size, anti_size, imageops::FilterType::Triangle);

        Ok(GrayImage::from_fn(width, height, |x, y| {
            if res.get_pixel(x, y).0[0] > self.threshold {
                Luma([1u8])
            } else {
                Luma([0u8])
            }
        }))
    }
}

impl<E: InferenceEngine> MaskRefiner for Sam2<E> {
    fn refine(&mut self, crop: &RgbImage) -> Result<GrayImage> {
        let (w, h) = crop.dimensions();
        if w == 0 || h == 0 {
            return Err(anyhow!("empty crop {}x{}", w, h));
        }

        let (canvas, _) = letterbox(crop, self.size, self.size);
        let xs = to_tensor(&canvas, self.layout, |c, v| (v as f32 - MEAN[c]) / STD[c]);

        let ys = self.engine.run(vec![xs])?;
        let logits = ys
            .first()
            .ok_or_else(|| anyhow!("refiner returned no outputs"))?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        self.postprocess(&logits, w, h)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
