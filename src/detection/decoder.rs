//! 检测头解码 (Detection decoder)
//! 原始张量 (box / cls / coef) → 候选检测框

use ndarray::{ArrayView2, Axis};

use crate::{Bbox, Detection};

/// Number of anchor locations for a `width x height` input over strides 8/16/32.
pub fn candidate_count(width: u32, height: u32) -> usize {
    let cells = width as usize * height as usize;
    cells / 64 + cells / 256 + cells / 1024
}

/// Decodes candidates whose best class score is above `conf_threshold`.
///
/// * `boxes`  - `(4, N)` as `cx, cy, w, h` in model input pixels
/// * `scores` - `(C, N)` per-class confidence
/// * `coefs`  - `(nm, N)` mask embedding
///
/// Boxes stay in model input space; the caller rescales after NMS.
pub fn decode_candidates(
    boxes: ArrayView2<f32>,
    scores: ArrayView2<f32>,
    coefs: ArrayView2<f32>,
    conf_threshold: f32,
) -> Vec<Detection> {
    let mut data = Vec::new();
    for (n, clss) in scores.axis_iter(Axis(1)).enumerate() {
        // argmax, 相同分数取第一个
        let Some((id, &confidence)) = clss
            .iter()
            .enumerate()
            .reduce(|max, x| if x.1 > max.1 { x } else { max })
        else {
            continue;
        };

        if confidence <= conf_threshold {
            continue;
        }

        let bbox = Bbox::from_xywh(
            boxes[[0, n]],
            boxes[[1, n]],
            boxes[[2, n]],
            boxes[[3, n]],
            id,
            confidence,
        );
        let embedding = coefs.column(n).to_vec();
        data.push(Detection::new(bbox, embedding));
    }
    data
}
