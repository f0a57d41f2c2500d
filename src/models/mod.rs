/// 模型统一接口与实现
///
/// # 架构说明
///
/// 两阶段感知:
/// - **YOLOv8Seg**: 检测 + 实例分割 (粗轮廓), 文件 `yolov8.rs`
/// - **Sam2**: 对每个检测框做掩码精修, 文件 `sam2.rs`
///
/// 两者都持有一个 [`InferenceEngine`](crate::InferenceEngine), 流程统一为
/// preprocess → engine.run → postprocess.
///
/// ## 使用示例
/// ```ignore
/// use yolov8_sam2_rs::{OrtBackend, OrtConfig, OrtEP, PipelineConfig, SegmentDetector, YOLOv8Seg};
///
/// let engine = OrtBackend::build(OrtConfig { f: "yolov8s-seg.onnx".into(), ep: OrtEP::CPU, device_id: 0, trt_fp16: false })?;
/// let mut model = YOLOv8Seg::new(engine, &PipelineConfig::default());
/// let detections = model.detect(&frame)?;
/// ```
use anyhow::Result;
use image::{imageops, GrayImage, RgbImage};
use ndarray::{Array, IxDyn};

use crate::ort_backend::InputLayout;
use crate::Detection;

pub mod sam2;
pub mod yolov8;

pub use sam2::Sam2;
pub use yolov8::YOLOv8Seg;

/// 第一阶段: 检测 + 粗分割
pub trait SegmentDetector: Send {
    /// Detections in frame pixel space, each with its coarse segment attached.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// 第二阶段: 掩码精修
pub trait MaskRefiner: Send {
    /// Returns a `{0, 1}` mask with exactly the crop's dimensions.
    fn refine(&mut self, crop: &RgbImage) -> Result<GrayImage>;
}

impl<T: SegmentDetector + ?Sized> SegmentDetector for Box<T> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

impl<T: MaskRefiner + ?Sized> MaskRefiner for Box<T> {
    fn refine(&mut self, crop: &RgbImage) -> Result<GrayImage> {
        (**self).refine(crop)
    }
}

/// 等比缩放 + 右下补零 (letterbox)
///
/// Returns the padded canvas and the factor mapping canvas pixels back to
/// the source (`source = canvas * scale`).
pub fn letterbox(image: &RgbImage, width: u32, height: u32) -> (RgbImage, f32) {
    let (w, h) = image.dimensions();
    let scale = (h as f32 / height as f32).max(w as f32 / width as f32);
    let new_w = ((w as f32 / scale) as u32).clamp(1, width);
    let new_h = ((h as f32 / scale) as u32).clamp(1, height);

    let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
    let mut canvas = RgbImage::new(width, height);
    imageops::replace(&mut canvas, &resized, 0, 0);
    (canvas, scale)
}

/// RGB 图像 → `(1, 3, H, W)` 或 `(1, H, W, 3)` 浮点张量
pub fn to_tensor<F>(image: &RgbImage, layout: InputLayout, norm: F) -> Array<f32, IxDyn>
where
    F: Fn(usize, u8) -> f32,
{
    let (w, h) = (image.width() as usize, image.height() as usize);
    let mut ys = match layout {
        InputLayout::Nchw => Array::zeros((1, 3, h, w)).into_dyn(),
        InputLayout::Nhwc => Array::zeros((1, h, w, 3)).into_dyn(),
    };
    for (x, y, rgb) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let v = norm(c, rgb.0[c]);
            match layout {
                InputLayout::Nchw => ys[[0, c, y, x]] = v,
                InputLayout::Nhwc => ys[[0, y, x, c]] = v,
            }
        }
    }
    ys
}
