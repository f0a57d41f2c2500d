/// 检测后处理 (Detection post-processing)
///
/// - decoder:  原始张量 → 候选框
/// - mask:     掩码系数 × 原型 → 每个目标的二值掩码
/// - contours: 二值掩码 → 轮廓多边形, 面积过滤, 绘制
pub mod contours;
pub mod decoder;
pub mod mask;

pub use contours::{
    contour_area, draw_polylines, external_contours, fill_polygon, filter_by_area,
    largest_segment, masks2segments,
};
pub use decoder::{candidate_count, decode_candidates};
pub use mask::{accumulate, binarize, crop_mask, process_mask, scale_mask};
