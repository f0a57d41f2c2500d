//! 配置参数 - 命令行参数 + JSON文件调整阈值

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::ort_backend::{InputLayout, OrtEP};
use crate::pipeline::{check_interval, DEFAULT_INTERVAL};

/// 数字卫兵巡检参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8-seg + SAM2 巡检", long_about = None)]
pub struct Args {
    /// 输入源: 图片序列目录
    #[arg(long, required = true)]
    pub source: PathBuf,

    /// 分辨率 (宽 高)
    #[arg(long, num_args = 2, default_values_t = [1280, 720])]
    pub resolution: Vec<u32>,

    /// 目标类别ID
    #[arg(long = "class-id", default_value_t = 0)]
    pub class_id: usize,

    /// 事件图片保存目录
    #[arg(long = "save-dir")]
    pub save_dir: Option<PathBuf>,

    /// YOLOv8-seg 模型路径
    #[arg(long, default_value = "models/yolov8s-seg.onnx")]
    pub detector: String,

    /// SAM2 精修模型路径
    #[arg(long, default_value = "models/sam2unet_large.onnx")]
    pub refiner: String,

    /// 执行后端
    #[arg(long, value_enum, default_value = "cpu")]
    pub ep: OrtEP,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// TensorRT FP16
    #[arg(long)]
    pub fp16: bool,

    /// 置信度阈值 (覆盖配置文件)
    #[arg(long)]
    pub conf: Option<f32>,

    /// 检测间隔秒数 (覆盖配置文件)
    #[arg(long)]
    pub interval: Option<f64>,

    /// 回放帧率, 0 为不限速
    #[arg(long, default_value_t = 25.0)]
    pub fps: f64,

    /// JSON 阈值配置 (不存在时写入默认值)
    #[arg(long)]
    pub config: Option<String>,

    /// MJPEG 帧的 JPEG 质量 (1-100)
    #[arg(long = "jpeg-quality", default_value_t = 80)]
    pub jpeg_quality: u8,

    /// MJPEG 输出文件, 缺省写到 stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// 启动即开始巡检
    #[arg(long)]
    pub active: bool,
}

impl Args {
    pub fn width(&self) -> u32 {
        self.resolution.first().copied().unwrap_or(1280)
    }

    pub fn height(&self) -> u32 {
        self.resolution.get(1).copied().unwrap_or(720)
    }
}

/// 流水线参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // === 检测参数 ===
    pub conf_threshold: f32, // 置信度阈值
    pub iou_threshold: f32,  // NMS IOU阈值
    pub num_classes: usize,  // 检测模型类别数
    pub detector_size: u32,  // 检测输入尺寸 (正方形)
    pub detector_layout: InputLayout,

    // === SAM2 参数 ===
    pub refine_threshold: f32, // 掩码二值化阈值
    pub refiner_size: u32,     // 精修输入尺寸
    pub refiner_layout: InputLayout,

    // === 巡检参数 ===
    pub target_class_id: usize,
    pub min_box_area: u32,                // 最小检测框面积 px²
    pub contour_area_range: (f64, f64),   // 有效轮廓面积 (开区间)
    pub hold_frames: u32,                 // 结果保持帧数
    pub interval_seconds: f64,            // 检测间隔
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.6,
            iou_threshold: 0.5,
            num_classes: 1,
            detector_size: 640,
            detector_layout: InputLayout::Nchw,

            refine_threshold: 0.8,
            refiner_size: 352,
            refiner_layout: InputLayout::Nchw,

            target_class_id: 0,
            min_box_area: 10_000,
            contour_area_range: (10.0, 100_000.0),
            hold_frames: 10,
            interval_seconds: DEFAULT_INTERVAL,
        }
    }
}

impl PipelineConfig {
    /// 从JSON文件加载配置
    pub fn load(path: &str) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str::<Self>(&json) {
                Ok(config) => {
                    log::info!("✅ config loaded from {}", path);
                    config.checked()
                }
                Err(e) => {
                    log::warn!("⚠️  failed to parse {}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 {} not found, writing defaults", path);
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: &str) {
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    log::error!("❌ failed to save config: {}", e);
                } else {
                    log::info!("💾 config saved to {}", path);
                }
            }
            Err(e) => log::error!("❌ failed to serialize config: {}", e),
        }
    }

    /// Replaces an unusable detection interval with the default.
    pub fn checked(mut self) -> Self {
        if let Err(e) = check_interval(self.interval_seconds) {
            log::warn!("⚠️  interval_seconds: {}, using {}s", e, DEFAULT_INTERVAL);
            self.interval_seconds = DEFAULT_INTERVAL;
        }
        self
    }

    /// Command-line values override the file for the knobs exposed on both.
    pub fn with_args(mut self, args: &Args) -> Self {
        self.target_class_id = args.class_id;
        if let Some(conf) = args.conf {
            self.conf_threshold = conf;
        }
        if let Some(interval) = args.interval {
            match check_interval(interval) {
                Ok(interval) => self.interval_seconds = interval,
                Err(e) => log::warn!("⚠️  --interval ignored: {}", e),
            }
        }
        self
    }

    pub fn print_summary(&self) {
        log::info!(
            "🎛️  conf={:.2} iou={:.2} refine={:.2} target={} ({}) min_area={} contour={:?} hold={} step={:.1}s",
            self.conf_threshold,
            self.iou_threshold,
            self.refine_threshold,
            self.target_class_id,
            crate::class_name(self.target_class_id),
            self.min_box_area,
            self.contour_area_range,
            self.hold_frames,
            self.interval_seconds,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert_eq!(config.conf_threshold, 0.6);
        assert_eq!(config.iou_threshold, 0.5);
        assert_eq!(config.refine_threshold, 0.8);
        assert_eq!(config.min_box_area, 10_000);
        assert_eq!(config.hold_frames, 10);
        assert_eq!(config.refiner_size, 352);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"conf_threshold": 0.4, "hold_frames": 3}"#).unwrap();
        assert_eq!(config.conf_threshold, 0.4);
        assert_eq!(config.hold_frames, 3);
        assert_eq!(config.iou_threshold, 0.5);
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let path = path.to_str().unwrap();
        let config = PipelineConfig::load(path);
        assert_eq!(config, PipelineConfig::default());
        assert!(std::path::Path::new(path).exists());
        assert_eq!(PipelineConfig::load(path), config);
    }

    #[test]
    fn test_load_replaces_bad_interval() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["-1", "0", "1e20"] {
            let path = dir.path().join(format!("interval_{}.json", bad));
            fs::write(&path, format!(r#"{{"interval_seconds": {}, "hold_frames": 3}}"#, bad))
                .unwrap();
            let config = PipelineConfig::load(path.to_str().unwrap());
            assert_eq!(config.interval_seconds, DEFAULT_INTERVAL);
            assert_eq!(config.hold_frames, 3);
        }
    }

    #[test]
    fn test_args_bad_interval_ignored() {
        let args = Args::parse_from(["sentinel", "--source", "frames", "--interval", "1e20"]);
        let config = PipelineConfig::default().with_args(&args);
        assert_eq!(config.interval_seconds, DEFAULT_INTERVAL);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "sentinel",
            "--source",
            "frames",
            "--resolution",
            "640",
            "480",
            "--class-id",
            "2",
            "--ep",
            "cuda",
            "--interval",
            "1.5",
        ]);
        assert_eq!(args.width(), 640);
        assert_eq!(args.height(), 480);
        assert_eq!(args.ep, OrtEP::CUDA);
        let config = PipelineConfig::default().with_args(&args);
        assert_eq!(config.target_class_id, 2);
        assert_eq!(config.interval_seconds, 1.5);
        assert_eq!(config.conf_threshold, 0.6);
    }
}
