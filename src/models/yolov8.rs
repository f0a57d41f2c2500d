// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8-seg 模型实现
// 包含: 预处理、推理、后处理 (解码 → NMS → 掩码 → 轮廓)

use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::{s, Array, Array2, Array3, IxDyn};

use super::{letterbox, to_tensor, SegmentDetector};
use crate::config::PipelineConfig;
use crate::detection::{decode_candidates, masks2segments, process_mask};
use crate::ort_backend::{InferenceEngine, InputLayout};
use crate::{non_max_suppression, Detection};

const CXYWH_OFFSET: usize = 4;

/// 检测头原始输出 (已拆分)
pub struct RawHeads {
    pub boxes: Array2<f32>,  // (4, N)
    pub scores: Array2<f32>, // (nc, N)
    pub coefs: Array2<f32>,  // (nm, N)
    pub protos: Array3<f32>, // (nm, mh, mw)
}

/// YOLOv8-seg 模型
pub struct YOLOv8Seg<E> {
    engine: E,
    nc: usize,
    width: u32,
    height: u32,
    conf: f32,
    iou: f32,
    layout: InputLayout,
}

impl<E: InferenceEngine> YOLOv8Seg<E> {
    pub fn new(engine: E, config: &PipelineConfig) -> Self {
        Self {
            engine,
            nc: config.num_classes,
            width: config.detector_size,
            height: config.detector_size,
            conf: config.conf_threshold,
            iou: config.iou_threshold,
            layout: config.detector_layout,
        }
    }

    /// letterbox + `/255`
    pub fn preprocess(&self, frame: &RgbImage) -> (Array<f32, IxDyn>, f32) {
        let (canvas, scale) = letterbox(frame, self.width, self.height);
        let xs = to_tensor(&canvas, self.layout, |_, v| v as f32 / 255.0);
        (xs, scale)
    }

    /// Splits engine outputs into the four heads.
    ///
    /// Two layouts are accepted:
    /// - fused ONNX export: `[(1, 4+nc+nm, N), (1, nm, mh, mw)]`
    /// - split heads: `[protos (1, mh, mw, nm), coefs (1, nm, N), scores (1, nc, N), boxes (1, 4, N)]`
    pub fn split_heads(&self, xs: Vec<Array<f32, IxDyn>>) -> Result<RawHeads> {
        match xs.len() {
            2 => {
                let preds = &xs[0];
                let protos = &xs[1];
                if preds.ndim() != 3 || protos.ndim() != 4 {
                    return Err(anyhow!(
                        "unexpected output shapes {:?} / {:?}",
                        preds.shape(),
                        protos.shape()
                    ));
                }
                let (features, n) = (preds.shape()[1], preds.shape()[2]);
                if features <= CXYWH_OFFSET + self.nc {
                    return Err(anyhow!(
                        "prediction has {} features, need more than 4 + {}",
                        features,
                        self.nc
                    ));
                }
                let preds = matrix(preds, features, n)?;
                let (nm, mh, mw) = (protos.shape()[1], protos.shape()[2], protos.shape()[3]);
                Ok(RawHeads {
                    boxes: preds.slice(s![0..CXYWH_OFFSET, ..]).to_owned(),
                    scores: preds
                        .slice(s![CXYWH_OFFSET..CXYWH_OFFSET + self.nc, ..])
                        .to_owned(),
                    coefs: preds.slice(s![CXYWH_OFFSET + self.nc.., ..]).to_owned(),
                    protos: Array3::from_shape_vec((nm, mh, mw), protos.iter().copied().collect())?,
                })
            }
            4 => {
                let n = xs[3].len() / CXYWH_OFFSET;
                if n == 0 || xs[2].len() != self.nc * n {
                    return Err(anyhow!(
                        "split heads disagree: boxes {} values, scores {} values, nc {}",
                        xs[3].len(),
                        xs[2].len(),
                        self.nc
                    ));
                }
                let nm = xs[1].len() / n;
                let (mh, mw) = (self.height as usize / 4, self.width as usize / 4);
                if nm == 0 || xs[0].len() != mh * mw * nm {
                    return Err(anyhow!(
                        "prototype tensor has {} values, expected {}x{}x{}",
                        xs[0].len(),
                        mh,
                        mw,
                        nm
                    ));
                }
                // NHWC → CHW
                let protos = Array3::from_shape_vec((mh, mw, nm), xs[0].iter().copied().collect())?
                    .permuted_axes([2, 0, 1])
                    .as_standard_layout()
                    .into_owned();
                Ok(RawHeads {
                    boxes: matrix(&xs[3], CXYWH_OFFSET, n)?,
                    scores: matrix(&xs[2], self.nc, n)?,
                    coefs: matrix(&xs[1], nm, n)?,
                    protos,
                })
            }
            k => Err(anyhow!("expected 2 or 4 detector outputs, got {}", k)),
        }
    }

    /// 解码 → NMS → 坐标还原 → 掩码 → 轮廓
    pub fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        scale: f32,
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>> {
        let heads = self.split_heads(xs)?;

        let mut data = decode_candidates(
            heads.boxes.view(),
            heads.scores.view(),
            heads.coefs.view(),
            self.conf,
        );
        if data.is_empty() {
            return Ok(data);
        }

        non_max_suppression(&mut data, self.iou);
        for det in data.iter_mut() {
            det.bbox.scale(scale);
        }

        let masks = process_mask(heads.protos.view(), &data, width, height)?;
        for (det, segment) in data.iter_mut().zip(masks2segments(&masks)) {
            det.segment = segment;
        }
        Ok(data)
    }
}

impl<E: InferenceEngine> SegmentDetector for YOLOv8Seg<E> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let t_pre = std::time::Instant::now();
        let (xs, scale) = self.preprocess(frame);
        log::trace!("[YOLOv8 Preprocess]: {:?}", t_pre.elapsed());

        let t_run = std::time::Instant::now();
        let ys = self.engine.run(vec![xs])?;
        log::trace!("[YOLOv8 Inference]: {:?}", t_run.elapsed());

        let t_post = std::time::Instant::now();
        let ys = self.postprocess(ys, scale, frame.width(), frame.height())?;
        log::trace!("[YOLOv8 Postprocess]: {:?}", t_post.elapsed());
        Ok(ys)
    }
}

/// Reads an output tensor in logical order as a `(rows, cols)` matrix.
fn matrix(x: &Array<f32, IxDyn>, rows: usize, cols: usize) -> Result<Array2<f32>> {
    if x.len() != rows * cols {
        return Err(anyhow!(
            "tensor {:?} can not be viewed as {}x{}",
            x.shape(),
            rows,
            cols
        ));
    }
    Ok(Array2::from_shape_vec((rows, cols), x.iter().copied().collect())?)
}
