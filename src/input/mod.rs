/// 视频输入与输出 (Video input / output)
///
/// - FrameSource: 帧来源抽象, 读到 `None` 即结束
/// - ImageDirSource: 图片序列目录回放
/// - MjpegWriter: multipart MJPEG 输出流
pub mod image_dir;
pub mod mjpeg;

pub use image_dir::ImageDirSource;
pub use mjpeg::MjpegWriter;

use image::RgbImage;

/// 帧来源
pub trait FrameSource {
    /// Next frame, or `None` on end of stream or a read failure.
    fn read(&mut self) -> Option<RgbImage>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read(&mut self) -> Option<RgbImage> {
        (**self).read()
    }
}
