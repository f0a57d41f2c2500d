/// 异步推理流水线 (Asynchronous inference pipeline)
///
/// 双线程架构, 通过两个容量为1的邮箱通信:
/// - 采集/渲染线程: 读帧 → 准入闸门 → 叠加上一次结果 → MJPEG 输出
/// - 推理线程:      YOLOv8-seg → NMS → SAM2 精修 → 轮廓 → 事件保存
///
/// ```text
/// capture ─► AdmissionGate ─[Slot<WorkItem>]─► InferenceWorker
///                                                    │
/// output ◄─ OverlayCompositor ◄─[Slot<FrameResult>]──┘
/// ```
pub mod events;
pub mod gate;
pub mod live;
pub mod overlay;
pub mod worker;

use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::{GrayImage, RgbImage};

use crate::Segment;

pub use events::{EventEntry, EventStore};
pub use gate::{check_interval, AdmissionGate, PatrolState, DEFAULT_INTERVAL};
pub use live::LiveLoop;
pub use overlay::OverlayCompositor;
pub use worker::{InferenceWorker, WorkerHandle};

// ========== 消息类型 ==========

/// 采集帧 (采集线程 → 推理线程), 所有权随邮箱转移
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: DateTime<Local>) -> Self {
        Self { image, captured_at }
    }
}

/// 推理线程邮箱内容; `Shutdown` 为退出哨兵
#[derive(Debug)]
pub enum WorkItem {
    Frame(Frame),
    Shutdown,
}

/// 一帧的完整推理结果 (推理线程 → 渲染)
#[derive(Clone, Debug, PartialEq)]
pub struct FrameResult {
    /// {0, 255}, same size as the source frame
    pub mask: GrayImage,
    /// coarse segments of every surviving detection
    pub segments: Vec<Segment>,
}

// ========== 单槽邮箱 ==========

/// Capacity-1 mailbox. Producers never block.
///
/// Every clone shares the same slot; both ends keep a sender and a receiver so
/// the producer can evict an unread value.
#[derive(Debug)]
pub struct Slot<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Drop-newest: returns `false` and discards `value` if the slot is occupied.
    pub fn offer(&self, value: T) -> bool {
        self.tx.try_send(value).is_ok()
    }

    /// Drop-oldest: evicts an unread value to make room, returning it.
    pub fn replace(&self, value: T) -> Option<T> {
        match self.tx.try_send(value) {
            Ok(()) => None,
            Err(TrySendError::Full(value)) | Err(TrySendError::Disconnected(value)) => {
                let evicted = self.rx.try_recv().ok();
                // single producer: the slot is free now unless a reader raced us,
                // in which case it is still free
                let _ = self.tx.try_send(value);
                evicted
            }
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn take_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Empties the slot, returning how many values were discarded.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
