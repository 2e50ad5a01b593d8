// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 媒体输入: 单张图片 + 按帧读取的视频
//!
//! 视频统一按帧序列处理: 一个目录里按文件名排序的帧图片
//! (启用 `ffmpeg` 特性时可由 `extract_frames` 从视频文件生成)

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};

use crate::error::MediaError;

/// 支持的帧图片扩展名
const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

/// 打开并解码一张图片
pub fn open_image(path: impl AsRef<Path>) -> Result<DynamicImage, MediaError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::NotFound(path.to_path_buf()));
    }
    image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| MediaError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 目录中的帧图片, 按文件名排序
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let mut frames: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_frame_file(p))
        .collect();
    frames.sort();
    Ok(frames)
}

/// 删除目录中已有的帧图片 (目录不存在时创建), 返回删除的数量
pub fn clear_frames(dir: impl AsRef<Path>) -> Result<usize, MediaError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let stale = list_frames(dir)?;
    for path in &stale {
        fs::remove_file(path)?;
    }
    if !stale.is_empty() {
        log::debug!("🧹 清理旧帧: {} 张", stale.len());
    }
    Ok(stale.len())
}

/// 视频基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub total_frames: usize,
    pub fps: f32,
    pub width: u32,
    pub height: u32,
}

/// 顺序读取 + 按索引跳转的帧读取器
pub trait FrameReader {
    fn info(&self) -> VideoInfo;

    /// 读取下一帧, 读完时返回 `Ok(None)`
    fn read_next(&mut self) -> Result<Option<DynamicImage>, MediaError>;

    /// 跳到指定帧, 下一次 `read_next` 从这一帧开始
    fn seek(&mut self, frame_index: usize) -> Result<(), MediaError>;

    /// 下一次 `read_next` 将返回的帧索引
    fn position(&self) -> usize;
}

/// 目录中的帧图片序列
pub struct ImageSequence {
    frames: Vec<PathBuf>,
    cursor: usize,
    info: VideoInfo,
}

impl ImageSequence {
    /// 打开帧目录 (按文件名排序), fps 由调用方给出
    pub fn open(dir: impl AsRef<Path>, fps: f32) -> Result<Self, MediaError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MediaError::NotFound(dir.to_path_buf()));
        }

        let frames = list_frames(dir)?;

        // 尺寸取自第一张能解码的帧
        let (width, height) = frames
            .iter()
            .find_map(|p| match open_image(p) {
                Ok(image) => Some(image.dimensions()),
                Err(e) => {
                    log::warn!("⚠️ 跳过坏帧: {}", e);
                    None
                }
            })
            .unwrap_or((0, 0));

        log::info!(
            "🎞️ 帧序列: {} ({} 帧, {:.1} fps, {}x{})",
            dir.display(),
            frames.len(),
            fps,
            width,
            height
        );

        Ok(Self {
            info: VideoInfo {
                total_frames: frames.len(),
                fps,
                width,
                height,
            },
            frames,
            cursor: 0,
        })
    }
}

impl FrameReader for ImageSequence {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_next(&mut self) -> Result<Option<DynamicImage>, MediaError> {
        let Some(path) = self.frames.get(self.cursor) else {
            return Ok(None);
        };
        // 解码失败也前进一帧, 坏帧不会卡住播放
        self.cursor += 1;
        open_image(path).map(Some)
    }

    fn seek(&mut self, frame_index: usize) -> Result<(), MediaError> {
        if frame_index >= self.frames.len() {
            return Err(MediaError::SeekOutOfRange {
                index: frame_index,
                total: self.frames.len(),
            });
        }
        self.cursor = frame_index;
        Ok(())
    }

    fn position(&self) -> usize {
        self.cursor
    }
}

/// 内存中的帧序列
pub struct MemoryFrames {
    frames: Vec<DynamicImage>,
    cursor: usize,
    fps: f32,
}

impl MemoryFrames {
    pub fn new(frames: Vec<DynamicImage>, fps: f32) -> Self {
        Self {
            frames,
            cursor: 0,
            fps,
        }
    }
}

impl FrameReader for MemoryFrames {
    fn info(&self) -> VideoInfo {
        let (width, height) = self.frames.first().map(|f| f.dimensions()).unwrap_or((0, 0));
        VideoInfo {
            total_frames: self.frames.len(),
            fps: self.fps,
            width,
            height,
        }
    }

    fn read_next(&mut self) -> Result<Option<DynamicImage>, MediaError> {
        let frame = self.frames.get(self.cursor).cloned();
        if frame.is_some() {
            self.cursor += 1;
        }
        Ok(frame)
    }

    fn seek(&mut self, frame_index: usize) -> Result<(), MediaError> {
        if frame_index >= self.frames.len() {
            return Err(MediaError::SeekOutOfRange {
                index: frame_index,
                total: self.frames.len(),
            });
        }
        self.cursor = frame_index;
        Ok(())
    }

    fn position(&self) -> usize {
        self.cursor
    }
}

/// 用 FFmpeg 把视频按 `fps` 抽帧为 `out_dir/000001.png ...`
#[cfg(feature = "ffmpeg")]
pub fn extract_frames(
    video: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    fps: f32,
) -> Result<usize, MediaError> {
    use ez_ffmpeg::FfmpegContext;

    let video = video.as_ref();
    let out_dir = out_dir.as_ref();
    if !video.exists() {
        return Err(MediaError::NotFound(video.to_path_buf()));
    }
    // 旧视频留下的帧会混进新的帧序列
    clear_frames(out_dir)?;

    let pattern = out_dir.join("%06d.png");
    log::info!("🎬 抽帧: {} → {}", video.display(), out_dir.display());

    let ctx = FfmpegContext::builder()
        .input(video.to_string_lossy().to_string())
        .filter_desc(format!("fps={}", fps))
        .output(pattern.to_string_lossy().to_string())
        .build()
        .map_err(|e| MediaError::Video(format!("构建失败: {}", e)))?;
    ctx.start()
        .map_err(|e| MediaError::Video(format!("启动失败: {}", e)))?
        .wait()
        .map_err(|e| MediaError::Video(e.to_string()))?;

    let count = list_frames(out_dir)?.len();
    log::info!("✅ 抽帧完成: {} 帧", count);
    Ok(count)
}

/// 打开视频文件: 先抽帧到 `work_dir`, 再按帧序列读取
#[cfg(feature = "ffmpeg")]
pub fn open_video(
    video: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    fps: f32,
) -> Result<ImageSequence, MediaError> {
    extract_frames(&video, &work_dir, fps)?;
    ImageSequence::open(work_dir, fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frames(dir: &Path, n: usize) {
        for i in 0..n {
            let img = DynamicImage::new_rgb8(8 + i as u32, 6);
            img.save(dir.join(format!("{:06}.png", i + 1))).unwrap();
        }
        fs::write(dir.join("notes.txt"), "not a frame").unwrap();
    }

    #[test]
    fn test_open_image_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            open_image(dir.path().join("missing.jpg")),
            Err(MediaError::NotFound(_))
        ));

        let bad = dir.path().join("bad.jpg");
        fs::write(&bad, b"definitely not a jpeg").unwrap();
        assert!(matches!(open_image(&bad), Err(MediaError::Decode { .. })));
    }

    #[test]
    fn test_image_sequence_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        let mut seq = ImageSequence::open(dir.path(), 25.0).unwrap();
        let info = seq.info();
        assert_eq!(info.total_frames, 3);
        assert_eq!((info.width, info.height), (8, 6));

        let widths: Vec<u32> = std::iter::from_fn(|| seq.read_next().unwrap())
            .map(|f| f.width())
            .collect();
        assert_eq!(widths, vec![8, 9, 10]);
        assert!(seq.read_next().unwrap().is_none());
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);
        let mut seq = ImageSequence::open(dir.path(), 25.0).unwrap();

        seq.seek(2).unwrap();
        assert_eq!(seq.position(), 2);
        assert_eq!(seq.read_next().unwrap().unwrap().width(), 10);
        assert!(matches!(
            seq.seek(3),
            Err(MediaError::SeekOutOfRange { index: 3, total: 3 })
        ));
    }

    #[test]
    fn test_bad_first_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 2);
        fs::write(dir.path().join("000000.png"), b"broken").unwrap();

        let mut seq = ImageSequence::open(dir.path(), 25.0).unwrap();
        let info = seq.info();
        assert_eq!(info.total_frames, 3);
        assert_eq!((info.width, info.height), (8, 6));

        assert!(matches!(seq.read_next(), Err(MediaError::Decode { .. })));
        assert_eq!(seq.read_next().unwrap().unwrap().width(), 8);
    }

    #[test]
    fn test_clear_frames_removes_stale_frames_only() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), 3);

        assert_eq!(clear_frames(dir.path()).unwrap(), 3);
        assert!(dir.path().join("notes.txt").exists());

        // 重新抽出更短的视频, 不会混入旧帧
        write_frames(dir.path(), 1);
        let seq = ImageSequence::open(dir.path(), 25.0).unwrap();
        assert_eq!(seq.info().total_frames, 1);

        let fresh = dir.path().join("new");
        assert_eq!(clear_frames(&fresh).unwrap(), 0);
        assert!(fresh.is_dir());
    }

    #[test]
    fn test_missing_dir_and_memory_frames() {
        assert!(matches!(
            ImageSequence::open("/nonexistent/frames", 25.0),
            Err(MediaError::NotFound(_))
        ));

        let mut mem = MemoryFrames::new(vec![DynamicImage::new_rgb8(4, 4)], 10.0);
        assert_eq!(mem.info().total_frames, 1);
        assert!(mem.read_next().unwrap().is_some());
        assert!(mem.read_next().unwrap().is_none());
        mem.seek(0).unwrap();
        assert_eq!(mem.position(), 0);
    }
}
