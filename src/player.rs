// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频播放控制
//!
//! 界面层命令 (播放/暂停/跳帧/跟踪开关/截图识别) 到检测会话的映射

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{DynamicImage, RgbImage};

use crate::annotate::encode_png;
use crate::detection::{Detection, DetectorSession};
use crate::error::InferenceError;
use crate::media::{FrameReader, VideoInfo};
use crate::models::{Model, YOLOv8};
use crate::records::{PredictionRecord, PredictionSink};

/// 单图预测结果的三种呈现: 找到目标 / 未找到目标 / 处理失败
#[derive(Debug)]
pub enum Outcome {
    Found(Detection),
    NotFound,
    Failed(String),
}

impl Outcome {
    pub fn from_result(result: Result<Option<Detection>, InferenceError>) -> Self {
        match result {
            Ok(Some(det)) => Outcome::Found(det),
            Ok(None) => Outcome::NotFound,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }

    pub fn detection(&self) -> Option<&Detection> {
        match self {
            Outcome::Found(det) => Some(det),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Found(det) => write!(
                f,
                "识别结果: {} (置信度 {:.2}%)",
                det.label,
                det.confidence * 100.0
            ),
            Outcome::NotFound => write!(f, "未找到目标"),
            Outcome::Failed(reason) => write!(f, "无法处理图片: {}", reason),
        }
    }
}

/// 把预测结果转成界面文字
pub fn present_prediction(result: Result<Option<Detection>, InferenceError>) -> String {
    Outcome::from_result(result).to_string()
}

/// 一帧的播放输出
pub struct FrameOutput {
    pub index: usize,
    pub detections: Vec<Detection>,
    /// 跟踪开启时为标注图, 否则为原帧
    pub annotated: RgbImage,
}

impl FrameOutput {
    /// 标注图编码为 PNG 字节 (交给界面显示)
    pub fn to_png(&self) -> image::ImageResult<Vec<u8>> {
        encode_png(&self.annotated)
    }
}

/// 视频播放器: 一个帧读取器 + 一个检测会话
pub struct VideoPlayer<R: FrameReader, M: Model = YOLOv8> {
    reader: Option<R>,
    session: DetectorSession<M>,
    info: VideoInfo,
    playing: bool,
    tracking: bool,
    current: Option<(usize, DynamicImage)>,
    snapshot_dir: PathBuf,
}

impl<R: FrameReader, M: Model> VideoPlayer<R, M> {
    /// 打开视频, 截图保存到 `snapshot_dir`
    pub fn open(reader: R, session: DetectorSession<M>, snapshot_dir: impl Into<PathBuf>) -> Self {
        let info = reader.info();
        log::info!(
            "📹 打开视频: {} 帧, {:.1} fps, {}x{}",
            info.total_frames,
            info.fps,
            info.width,
            info.height
        );
        Self {
            reader: Some(reader),
            session,
            info,
            playing: false,
            tracking: false,
            current: None,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// 开关跟踪; 关闭时重置会话
    pub fn set_tracking(&mut self, enabled: bool) {
        if self.tracking && !enabled {
            self.session.reset();
        }
        self.tracking = enabled;
        log::info!("🎯 跟踪: {}", if enabled { "开启" } else { "关闭" });
    }

    /// 读取并处理下一帧, 读完时暂停并返回 `Ok(None)`
    pub fn step(&mut self) -> anyhow::Result<Option<FrameOutput>> {
        let reader = self.reader.as_mut().context("视频已关闭")?;
        let index = reader.position();
        let Some(frame) = reader.read_next()? else {
            self.playing = false;
            log::info!("⏹️ 视频播放结束");
            return Ok(None);
        };

        // 跟踪失败时截图仍取这一帧
        let frame = &self.current.insert((index, frame)).1;

        let output = if self.tracking {
            // 跟踪失败只影响这一帧
            let detections = self
                .session
                .track(frame)
                .with_context(|| format!("第 {} 帧跟踪失败", index))?;
            let annotated = self.session.annotator().draw(frame, &detections);
            FrameOutput {
                index,
                detections,
                annotated,
            }
        } else {
            FrameOutput {
                index,
                detections: Vec::new(),
                annotated: frame.to_rgb8(),
            }
        };
        Ok(Some(output))
    }

    /// 跳到指定帧; 跳帧后轨迹连续性无意义, 重置会话
    pub fn seek(&mut self, frame_index: usize) -> anyhow::Result<()> {
        let reader = self.reader.as_mut().context("视频已关闭")?;
        reader.seek(frame_index)?;
        self.session.reset();
        log::debug!("⏩ 跳转到第 {} 帧", frame_index);
        Ok(())
    }

    /// 截图识别: 保存当前帧并做单图预测, 有结果时写入预测记录
    pub fn snapshot(
        &mut self,
        actor_id: i64,
        sink: &mut dyn PredictionSink,
    ) -> anyhow::Result<Outcome> {
        let (index, frame) = self.current.as_ref().context("还没有可截图的帧")?;
        std::fs::create_dir_all(&self.snapshot_dir)
            .with_context(|| format!("创建截图目录失败: {}", self.snapshot_dir.display()))?;
        let path = self.snapshot_dir.join(format!(
            "snapshot_{:06}_{}.png",
            index,
            crate::gen_time_string("-")
        ));
        frame
            .save(&path)
            .with_context(|| format!("保存截图失败: {}", path.display()))?;
        log::info!("📸 截图已保存: {}", path.display());

        let outcome = Outcome::from_result(self.session.predict_image(&path));
        if let Some(det) = outcome.detection() {
            sink.record(&PredictionRecord::new(actor_id, &path, det))?;
        }
        Ok(outcome)
    }

    /// 关闭视频: 重置会话并释放读取器
    pub fn close(&mut self) {
        self.session.reset();
        self.reader = None;
        self.current = None;
        self.playing = false;
        log::info!("📴 视频已关闭");
    }

    pub fn session(&self) -> &DetectorSession<M> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DetectorSession<M> {
        &mut self.session
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    #[test]
    fn test_outcome_text_distinguishes_empty_from_error() {
        let det = Detection {
            label: "柴犬".to_string(),
            raw_category: 3,
            native_name: "shiba_inu".to_string(),
            confidence: 0.5,
            bounding_box: Some(BoundingBox {
                x1: 0.,
                y1: 0.,
                x2: 2.,
                y2: 2.,
            }),
            track_id: None,
        };
        assert_eq!(
            present_prediction(Ok(Some(det))),
            "识别结果: 柴犬 (置信度 50.00%)"
        );
        assert_eq!(present_prediction(Ok(None)), "未找到目标");
        let failed = present_prediction(Err(InferenceError::Runtime("boom".to_string())));
        assert!(failed.starts_with("无法处理图片"));
        assert_ne!(failed, present_prediction(Ok(None)));
    }
}
