#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数 (命令行 + JSON)
pub mod control; // 巡检控制接口
pub mod detection; // 检测后处理: 解码 / 掩码 / 轮廓
pub mod input; // 视频输入与MJPEG输出
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 异步推理流水线

pub mod ort_backend;

pub use crate::config::{Args, PipelineConfig};
pub use crate::models::{MaskRefiner, SegmentDetector, Sam2, YOLOv8Seg};
pub use crate::ort_backend::{InferenceEngine, InputLayout, OrtBackend, OrtConfig, OrtEP};
pub use crate::pipeline::{
    AdmissionGate, EventStore, Frame, FrameResult, InferenceWorker, OverlayCompositor,
    PatrolState, WorkerHandle,
};

/// Greedy NMS over candidates already filtered by confidence.
///
/// The sort is stable, so on equal confidences the candidate that came first
/// (lowest anchor index) is kept.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.bbox.confidence().total_cmp(&b1.bbox.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// (cx, cy, w, h) -> (x1, y1, x2, y2)
pub fn xywh2xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    (cx - w / 2., cy - h / 2., cx + w / 2., cy + h / 2.)
}

/// (x1, y1, x2, y2) -> (cx, cy, w, h)
pub fn xyxy2xywh(x1: f32, y1: f32, x2: f32, y2: f32) -> (f32, f32, f32, f32) {
    let w = x2 - x1;
    let h = y2 - y1;
    (x1 + w / 2., y1 + h / 2., w, h)
}

/// 时间戳 → 文件名 (毫秒精度), e.g. `2026_10_17_08_30_15_042`
pub fn gen_time_string<Tz: chrono::TimeZone>(t: &chrono::DateTime<Tz>, delimiter: &str) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%3f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t.format(&fmt).to_string()
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point2 {
    x: f32,
    y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

/// 多边形轮廓 (不保证闭合, 绘制时闭合)
pub type Segment = Vec<Point2>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // corners in pixel space
    xmin: f32,
    ymin: f32,
    xmax: f32,
    ymax: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            id,
            confidence,
        }
    }

    pub fn from_xywh(cx: f32, cy: f32, w: f32, h: f32, id: usize, confidence: f32) -> Self {
        let (x1, y1, x2, y2) = xywh2xyxy(cx, cy, w, h);
        Self::new(x1, y1, x2, y2, id, confidence)
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmax
    }

    pub fn ymax(&self) -> f32 {
        self.ymax
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Inclusive-pixel area, `(x2 - x1 + 1) * (y2 - y1 + 1)`.
    pub fn area(&self) -> f32 {
        (self.xmax - self.xmin + 1.) * (self.ymax - self.ymin + 1.)
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax.min(another.xmax);
        let t = self.ymin.max(another.ymin);
        let b = self.ymax.min(another.ymax);
        (r - l + 1.).max(0.) * (b - t + 1.).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        self.intersection_area(another) / self.union(another)
    }

    /// 按letterbox比例还原到原图坐标
    pub fn scale(&mut self, factor: f32) {
        self.xmin *= factor;
        self.ymin *= factor;
        self.xmax *= factor;
        self.ymax *= factor;
    }

    /// Integer box clamped to a `width x height` frame, as `(x1, y1, x2, y2)`.
    pub fn clamped(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x1 = (self.xmin as i64).max(0) as u32;
        let y1 = (self.ymin as i64).max(0) as u32;
        let x2 = (self.xmax as i64).clamp(0, width as i64) as u32;
        let y2 = (self.ymax as i64).clamp(0, height as i64) as u32;
        (x1, y1, x2.max(x1), y2.max(y1))
    }
}

/// 单个检测结果: 框 + 掩码系数 + 粗分割轮廓
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub bbox: Bbox,
    pub embedding: Vec<f32>,
    pub segment: Segment,
}

impl Detection {
    pub fn new(bbox: Bbox, embedding: Vec<f32>) -> Self {
        Self {
            bbox,
            embedding,
            segment: Vec::new(),
        }
    }

    pub fn class_id(&self) -> usize {
        self.bbox.id()
    }

    pub fn confidence(&self) -> f32 {
        self.bbox.confidence()
    }
}

pub const CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorbike",
    "aeroplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "sofa",
    "pottedplant",
    "bed",
    "diningtable",
    "toilet",
    "tvmonitor",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// 类别名称, 越界时返回 "unknown"
pub fn class_name(id: usize) -> &'static str {
    CLASSES.get(id).copied().unwrap_or("unknown")
}
