// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测会话: 单图预测与视频跟踪两种模式,严格隔离
//!
//! ```text
//! Idle --predict_image--> Idle      (调用期间为 SingleShot)
//! Idle --track--> Tracking
//! Tracking --track--> Tracking      (跟踪状态累积)
//! Tracking --reset--> Idle
//! Tracking --predict_image--> Idle  (隐式 reset)
//! ```

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, RgbaImage};

use super::bytetrack::ByteTracker;
use super::types::{BBox, BoundingBox, Detection, SessionMode};
use crate::annotate::Annotator;
use crate::config::{ResetStrategy, SessionConfig, TieBreak};
use crate::error::{InferenceError, ModelLoadError};
use crate::labels::LabelMap;
use crate::models::{Model, YOLOv8};
use crate::{media, DetectionResult, OrtConfig, OrtEP};

/// 检测会话
///
/// 同一时刻只允许一个调用在执行 (`&mut self`),
/// 多个独立的视频视图需要各自持有一个会话
pub struct DetectorSession<M: Model = YOLOv8> {
    model_artifact_path: PathBuf,
    model: M,
    category_table: Vec<String>,
    labels: LabelMap,
    config: SessionConfig,
    mode: SessionMode,
    tracker: ByteTracker,
    annotator: Annotator,
    /// 本会话的标注保存目录 (首次保存时确定)
    run_dir: Option<PathBuf>,
}

impl DetectorSession<YOLOv8> {
    /// 加载 ONNX 模型,返回处于 Idle 的会话
    pub fn load(path: impl AsRef<Path>, config: SessionConfig) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let ep = if config.cuda {
            OrtEP::CUDA(config.device_id)
        } else {
            OrtEP::CPU
        };
        let ort_config = OrtConfig {
            ep,
            ..OrtConfig::cpu(path)
        };
        let model = YOLOv8::new(ort_config, config.conf, config.iou)?;
        model.summary();
        Ok(Self::with_model(path, model, config))
    }
}

impl<M: Model> DetectorSession<M> {
    /// 使用任意 `Model` 实现构建会话
    pub fn with_model(path: impl Into<PathBuf>, mut model: M, config: SessionConfig) -> Self {
        // 模型内部阈值取两种模式的较小值,会话再按各自的下限过滤
        model.set_conf(config.conf.min(config.tracker.low_score_threshold));
        model.set_iou(config.iou);

        let labels = match &config.label_file {
            Some(file) => LabelMap::from_json_file(file).unwrap_or_else(|e| {
                log::warn!("⚠️ 标签文件加载失败, 使用内置表: {:#}", e);
                LabelMap::builtin()
            }),
            None => LabelMap::builtin(),
        };
        let annotator = match &config.font {
            Some(font) => Annotator::with_font_file(font),
            None => Annotator::new(),
        };
        let category_table = model.names().to_vec();
        log::info!("✅ 检测会话就绪: {} 个类别", category_table.len());

        Self {
            model_artifact_path: path.into(),
            model,
            category_table,
            labels,
            mode: SessionMode::Idle,
            tracker: ByteTracker::new(&config.tracker),
            config,
            annotator,
            run_dir: None,
        }
    }

    // ========== 单图预测 ==========

    /// 单图预测: 先 reset, 返回置信度最高的目标, 没有目标时返回 `Ok(None)`
    pub fn predict_image(
        &mut self,
        path: impl AsRef<Path>,
    ) -> Result<Option<Detection>, InferenceError> {
        let path = path.as_ref();
        self.reset();
        self.mode = SessionMode::SingleShot;
        let result = media::open_image(path)
            .map_err(InferenceError::from)
            .and_then(|image| {
                let name = path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("image.jpg"));
                self.single_shot(&image, &name)
            });
        self.mode = SessionMode::Idle;
        result
    }

    /// 对内存中的图片做单图预测 (视频截图识别)
    pub fn predict_frame(
        &mut self,
        image: &DynamicImage,
    ) -> Result<Option<Detection>, InferenceError> {
        self.reset();
        self.mode = SessionMode::SingleShot;
        let name = PathBuf::from(format!("frame_{}.png", crate::gen_time_string("-")));
        let result = self.single_shot(image, &name);
        self.mode = SessionMode::Idle;
        result
    }

    fn single_shot(
        &mut self,
        image: &DynamicImage,
        file_name: &Path,
    ) -> Result<Option<Detection>, InferenceError> {
        check_frame(image)?;
        let ys = self.model.forward(std::slice::from_ref(image))?;
        let floor = self.config.conf;
        let mut candidates: Vec<Detection> = ys
            .first()
            .map(|y| self.to_detections(y, image))
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d.confidence >= floor)
            .collect();

        rank_candidates(&mut candidates, self.config.tie_break);
        log::debug!("🔍 单图预测: {} 个候选", candidates.len());

        if self.config.save_dir.is_some() {
            self.save_annotated(image, &candidates, file_name);
        }

        Ok(candidates.into_iter().next())
    }

    // ========== 视频跟踪 ==========

    /// 跟踪一帧: 首次调用进入 Tracking 并清空跟踪器, 之后复用
    ///
    /// 跟踪器接收 `tracker.low_score_threshold` 以上的检测,
    /// 输出只包含本帧匹配且置信度不低于 `conf` 的目标
    ///
    /// 失败时跟踪状态保留, 下一帧继续原有轨迹
    pub fn track(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        check_frame(frame)?;
        let ys = self.model.forward(std::slice::from_ref(frame))?;

        if self.mode != SessionMode::Tracking {
            self.mode = SessionMode::Tracking;
            self.tracker.clear();
            log::info!("🎯 进入跟踪模式");
        }

        let Some(y) = ys.first() else {
            return Ok(Vec::new());
        };
        let (width, height) = frame.dimensions();

        // 分类模型没有检测框, 只返回 top1
        if y.bboxes().is_none() {
            if let Some(probs) = y.probs() {
                let floor = self.config.conf;
                return Ok(probs
                    .top1()
                    .filter(|(_, conf)| *conf >= floor)
                    .map(|(id, conf)| self.make_detection(id, conf, None, None))
                    .into_iter()
                    .collect());
            }
        }

        let low = self.config.tracker.low_score_threshold;
        let dets: Vec<BBox> = y
            .bboxes()
            .map(|bboxes| {
                bboxes
                    .iter()
                    .filter(|b| b.confidence() >= low)
                    .map(|b| BBox {
                        x1: b.xmin(),
                        y1: b.ymin(),
                        x2: b.xmax(),
                        y2: b.ymax(),
                        confidence: b.confidence(),
                        class_id: b.id(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let floor = self.config.conf;
        let matched: Vec<(u32, BBox)> = self
            .tracker
            .update(&dets)
            .iter()
            .filter(|t| t.is_matched() && t.bbox.confidence >= floor)
            .map(|t| (t.id, t.bbox.clone()))
            .collect();
        log::trace!("{}", self.tracker.get_stats());

        Ok(matched
            .into_iter()
            .filter_map(|(id, b)| {
                let bbox = BoundingBox::clipped(b.x1, b.y1, b.x2, b.y2, width, height)?;
                Some(self.make_detection(b.class_id, b.confidence, Some(bbox), Some(id)))
            })
            .collect())
    }

    /// 跟踪一帧 RGBA 原始数据, 长度必须等于 `width * height * 4`
    pub fn track_rgba(
        &mut self,
        data: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, InferenceError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(InferenceError::MalformedFrame(format!(
                "RGBA 数据长度 {} 与 {}x{} 不符 (应为 {})",
                data.len(),
                width,
                height,
                expected
            )));
        }
        let image = RgbaImage::from_raw(width, height, data.to_vec()).ok_or_else(|| {
            InferenceError::MalformedFrame(format!("无法构建 {}x{} 图像", width, height))
        })?;
        self.track(&DynamicImage::ImageRgba8(image))
    }

    // ========== 状态管理 ==========

    /// 丢弃全部跟踪状态并回到 Idle (幂等)
    ///
    /// `Reload` 策略下重载失败只记录日志, 保留原模型实例
    pub fn reset(&mut self) {
        if let Err(e) = self.try_reset() {
            log::error!("❌ 模型重载失败, 继续使用当前实例: {}", e);
        }
    }

    /// 与 `reset` 相同, 但返回 `Reload` 策略下的重载错误
    pub fn try_reset(&mut self) -> Result<(), ModelLoadError> {
        let had_state = self.mode != SessionMode::Idle || !self.tracker.is_empty();
        self.tracker.clear();
        self.mode = SessionMode::Idle;

        if had_state && self.config.reset_strategy == ResetStrategy::Reload {
            log::info!(
                "🔄 从 {} 重新加载模型",
                self.model_artifact_path.display()
            );
            self.model.reload()?;
        }
        Ok(())
    }

    /// 原生类别名 → 显示名 (查不到时原样返回)
    pub fn translate_label(&self, native_name: &str) -> String {
        self.labels.translate(native_name)
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn category_table(&self) -> &[String] {
        &self.category_table
    }

    pub fn model_artifact_path(&self) -> &Path {
        &self.model_artifact_path
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn labels_mut(&mut self) -> &mut LabelMap {
        &mut self.labels
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// 最近一次保存标注图的目录
    pub fn last_save_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// 当前跟踪器是否持有轨迹
    pub fn has_tracker_state(&self) -> bool {
        !self.tracker.is_empty()
    }

    // ========== 内部工具 ==========

    fn to_detections(&self, y: &DetectionResult, image: &DynamicImage) -> Vec<Detection> {
        let (width, height) = image.dimensions();
        if let Some(bboxes) = y.bboxes() {
            return bboxes
                .iter()
                .filter_map(|b| {
                    let bbox = BoundingBox::clipped(
                        b.xmin(),
                        b.ymin(),
                        b.xmax(),
                        b.ymax(),
                        width,
                        height,
                    )?;
                    Some(self.make_detection(b.id(), b.confidence(), Some(bbox), None))
                })
                .collect();
        }
        match y.probs() {
            Some(probs) => probs
                .topk(self.category_table.len().max(1))
                .into_iter()
                .map(|(id, conf)| self.make_detection(id, conf, None, None))
                .collect(),
            None => Vec::new(),
        }
    }

    fn make_detection(
        &self,
        raw_category: usize,
        confidence: f32,
        bounding_box: Option<BoundingBox>,
        track_id: Option<u32>,
    ) -> Detection {
        let native_name = self
            .category_table
            .get(raw_category)
            .cloned()
            .unwrap_or_else(|| format!("class{raw_category}"));
        Detection {
            label: self.labels.translate(&native_name),
            raw_category,
            native_name,
            confidence: confidence.clamp(0.0, 1.0),
            bounding_box,
            track_id,
        }
    }

    fn save_annotated(&mut self, image: &DynamicImage, detections: &[Detection], name: &Path) {
        let Some(dir) = self.resolve_run_dir() else {
            return;
        };
        let target = dir.join(name);
        match self.annotator.save(image, detections, &target) {
            Ok(()) => log::info!("💾 标注结果已保存: {}", target.display()),
            Err(e) => log::warn!("⚠️ 标注结果保存失败 {}: {}", target.display(), e),
        }
    }

    /// `<save_dir>/predict`, 已存在时依次尝试 `predict2`, `predict3`, ...
    fn resolve_run_dir(&mut self) -> Option<PathBuf> {
        if self.run_dir.is_none() {
            let base = self.config.save_dir.as_ref()?;
            self.run_dir = Some(increment_dir(base, "predict"));
        }
        self.run_dir.clone()
    }
}

/// 拒绝尺寸为 0 的帧
fn check_frame(image: &DynamicImage) -> Result<(), InferenceError> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(InferenceError::MalformedFrame(format!(
            "图片尺寸为 {}x{}",
            w, h
        )));
    }
    Ok(())
}

/// 候选排序: 置信度降序 (稳定排序), 同分按取舍规则
fn rank_candidates(candidates: &mut [Detection], tie_break: TieBreak) {
    let area = |d: &Detection| d.bounding_box.map(|b| b.area()).unwrap_or(0.0);
    candidates.sort_by(|a, b| {
        let by_conf = b.confidence.total_cmp(&a.confidence);
        match tie_break {
            TieBreak::ModelOrder => by_conf,
            TieBreak::LargestArea => by_conf.then_with(|| area(b).total_cmp(&area(a))),
        }
    });
}

fn increment_dir(base: &Path, name: &str) -> PathBuf {
    let first = base.join(name);
    if !first.exists() {
        return first;
    }
    (2..)
        .map(|n| base.join(format!("{name}{n}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(confidence: f32, area_side: f32, raw_category: usize) -> Detection {
        Detection {
            label: String::new(),
            raw_category,
            native_name: String::new(),
            confidence,
            bounding_box: Some(BoundingBox {
                x1: 0.,
                y1: 0.,
                x2: area_side,
                y2: area_side,
            }),
            track_id: None,
        }
    }

    #[test]
    fn test_rank_model_order_is_stable() {
        let mut xs = vec![det(0.5, 10., 0), det(0.9, 5., 1), det(0.5, 40., 2)];
        rank_candidates(&mut xs, TieBreak::ModelOrder);
        let order: Vec<usize> = xs.iter().map(|d| d.raw_category).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_rank_largest_area() {
        let mut xs = vec![det(0.5, 10., 0), det(0.5, 40., 2)];
        rank_candidates(&mut xs, TieBreak::LargestArea);
        assert_eq!(xs[0].raw_category, 2);
    }

    #[test]
    fn test_increment_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(increment_dir(dir.path(), "predict"), dir.path().join("predict"));
        std::fs::create_dir(dir.path().join("predict")).unwrap();
        std::fs::create_dir(dir.path().join("predict2")).unwrap();
        assert_eq!(increment_dir(dir.path(), "predict"), dir.path().join("predict3"));
    }

    #[test]
    fn test_check_frame() {
        assert!(check_frame(&DynamicImage::new_rgb8(2, 2)).is_ok());
        assert!(matches!(
            check_frame(&DynamicImage::new_rgb8(0, 2)),
            Err(InferenceError::MalformedFrame(_))
        ));
    }
}
