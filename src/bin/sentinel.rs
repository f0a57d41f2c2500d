/// 数字卫兵 (Digital Sentinel)
///
/// YOLOv8-seg + SAM2 巡检
///
/// 系统架构:
/// 1. 主线程:   读帧 → 准入闸门 → 叠加结果 → MJPEG 输出
/// 2. 推理线程: 检测 → 精修 → 轮廓 → 事件保存
/// 3. 控制线程: 标准输入命令 (start / stop / status / step N / results), 回复写到 stderr
use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use yolov8_sam2_rs::control::ControlSurface;
use yolov8_sam2_rs::input::{ImageDirSource, MjpegWriter};
use yolov8_sam2_rs::pipeline::{LiveLoop, Slot};
use yolov8_sam2_rs::{
    AdmissionGate, Args, EventStore, OrtBackend, OrtConfig, OverlayCompositor, PatrolState,
    PipelineConfig, Sam2, WorkerHandle, YOLOv8Seg,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path),
        None => PipelineConfig::default(),
    }
    .with_args(&args);

    log::info!("🚀 数字卫兵系统启动");
    log::info!("📦 检测模型: {}", args.detector);
    log::info!("🎯 精修模型: {}", args.refiner);
    log::info!("📹 输入源: {}", args.source.display());
    config.print_summary();

    let save_dir = args.save_dir.clone().unwrap_or_else(|| PathBuf::from("result"));
    let events = EventStore::new(&save_dir)?;
    let state = Arc::new(PatrolState::new(args.active, config.interval_seconds));
    let source = ImageDirSource::open(&args.source, args.width(), args.height())?.with_fps(args.fps);

    let frames: Slot<_> = Slot::new();
    let results: Slot<_> = Slot::new();

    // ========== 启动推理线程 ==========
    let loader = {
        let config = config.clone();
        let detector = OrtConfig {
            f: args.detector.clone(),
            ep: args.ep,
            device_id: args.device_id,
            trt_fp16: args.fp16,
        };
        let refiner = OrtConfig {
            f: args.refiner.clone(),
            ..detector.clone()
        };
        move || -> Result<(YOLOv8Seg<OrtBackend>, Sam2<OrtBackend>)> {
            let detector = OrtBackend::build(detector)?;
            let refiner = OrtBackend::build(refiner)?;
            for (name, engine) in [("YOLOv8-seg", &detector), ("SAM2", &refiner)] {
                log::info!(
                    "🧠 {} on {:?}: inputs {:?} outputs {:?}",
                    name,
                    engine.ep(),
                    engine.input_names(),
                    engine.output_names()
                );
            }
            let detector = YOLOv8Seg::new(detector, &config);
            let refiner = Sam2::new(refiner, &config);
            log::info!("✅ 模型加载完成");
            Ok((detector, refiner))
        }
    };
    let worker = WorkerHandle::spawn(
        loader,
        config.clone(),
        events.clone(),
        frames.clone(),
        results.clone(),
        state.clone(),
    )?;

    // ========== 控制台 ==========
    {
        let control = ControlSurface::new(state.clone(), events);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || {
                for line in io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    match control.handle_command(&line) {
                        Some(reply) => eprintln!("{}", reply),
                        None if line.trim().is_empty() => {}
                        None => log::warn!("❓ unknown command: {}", line.trim()),
                    }
                }
            })?;
    }

    // ========== 主循环 ==========
    let gate = AdmissionGate::new(state.clone(), frames);
    let overlay = OverlayCompositor::new(state, results, config.hold_frames);

    let output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    };
    log::info!("📺 {}", MjpegWriter::<Vec<u8>>::content_type());

    let mut live = LiveLoop::new(
        source,
        gate,
        overlay,
        MjpegWriter::new(output).with_quality(args.jpeg_quality),
    );
    let outcome = live.run();

    if !worker.shutdown(SHUTDOWN_TIMEOUT) {
        log::warn!("⚠️  退出时推理线程仍在运行");
    }
    let frames = outcome?;
    log::info!("👋 共输出 {} 帧, 最近 {:.1} fps", frames, live.fps());
    Ok(())
}
