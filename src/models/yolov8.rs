// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 完整模型实现
// 包含: 模型加载、预处理、推理、后处理 (检测 / 分类)

use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, IxDyn};

use crate::error::{InferenceError, ModelLoadError};
use crate::{
    non_max_suppression, Bbox, DetectionResult, Embedding, OrtBackend, OrtConfig, OrtEP, YOLOTask,
};

/// letterbox 填充值
const PAD_VALUE: f32 = 144.0 / 255.0;

/// YOLOv8 完整模型结构
pub struct YOLOv8 {
    engine: OrtBackend,
    post: YOLOv8Postprocessor,
    names: Vec<String>,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: OrtConfig, conf: f32, iou: f32) -> Result<Self, ModelLoadError> {
        let engine = OrtBackend::build(config)?;

        let nc = engine.nc().ok_or_else(|| {
            ModelLoadError::InvalidArtifact("无法确定类别数 (缺少 names 元数据)".to_string())
        })? as usize;

        // class names
        let names = match engine.names() {
            Some(names) if names.len() >= nc => names.clone(),
            Some(names) => {
                log::warn!(
                    "⚠️ 类别表长度 {} 小于输出类别数 {}, 缺失部分自动命名",
                    names.len(),
                    nc
                );
                let mut names = names.clone();
                names.extend((names.len()..nc).map(|i| format!("class{i}")));
                names
            }
            None => (0..nc).map(|i| format!("class{i}")).collect(),
        };

        let post = YOLOv8Postprocessor::new(YOLOv8Config {
            task: engine.task(),
            nc,
            width: engine.width() as usize,
            height: engine.height() as usize,
            conf,
            iou,
        });

        Ok(Self {
            engine,
            post,
            names,
        })
    }

    fn preprocess_batch(&self, xs: &[DynamicImage]) -> Result<Array<f32, IxDyn>, InferenceError> {
        let YOLOv8Config {
            task,
            width,
            height,
            ..
        } = *self.post.config();
        let mut ys = Array::ones((xs.len(), 3, height, width)).into_dyn();
        ys.fill(PAD_VALUE);
        for (idx, x) in xs.iter().enumerate() {
            let (w0, h0) = x.dimensions();
            if w0 == 0 || h0 == 0 {
                return Err(InferenceError::MalformedFrame(format!(
                    "图片尺寸为 {}x{}",
                    w0, h0
                )));
            }
            let img = match task {
                YOLOTask::Classify => x.resize_exact(
                    width as u32,
                    height as u32,
                    image::imageops::FilterType::Triangle,
                ),
                YOLOTask::Detect => {
                    let (_, w_new, h_new) =
                        scale_wh(w0 as f32, h0 as f32, width as f32, height as f32);
                    x.resize_exact(
                        (w_new as u32).max(1),
                        (h_new as u32).max(1),
                        image::imageops::FilterType::Triangle,
                    )
                }
            };

            for (x, y, rgb) in img.pixels() {
                let x = x as usize;
                let y = y as usize;
                let [r, g, b, _] = rgb.0;
                ys[[idx, 0, y, x]] = (r as f32) / 255.0;
                ys[[idx, 1, y, x]] = (g as f32) / 255.0;
                ys[[idx, 2, y, x]] = (b as f32) / 255.0;
            }
        }

        Ok(ys)
    }

    pub fn engine(&self) -> &OrtBackend {
        &self.engine
    }

    pub fn nc(&self) -> usize {
        self.post.config().nc
    }
}

fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

// 实现统一的 Model trait
impl super::Model for YOLOv8 {
    fn preprocess(
        &mut self,
        images: &[DynamicImage],
    ) -> Result<Vec<Array<f32, IxDyn>>, InferenceError> {
        Ok(vec![self.preprocess_batch(images)?])
    }

    fn run(
        &mut self,
        xs: Vec<Array<f32, IxDyn>>,
    ) -> Result<Vec<Array<f32, IxDyn>>, InferenceError> {
        let Some(x) = xs.into_iter().next() else {
            return Err(InferenceError::Shape("缺少输入张量".to_string()));
        };
        self.engine.run(x)
    }

    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        self.post.postprocess(&xs, xs0)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn task(&self) -> YOLOTask {
        self.post.config().task
    }

    fn set_conf(&mut self, val: f32) {
        self.post.config_mut().conf = val;
    }

    fn conf(&self) -> f32 {
        self.post.config().conf
    }

    fn set_iou(&mut self, val: f32) {
        self.post.config_mut().iou = val;
    }

    fn iou(&self) -> f32 {
        self.post.config().iou
    }

    fn reload(&mut self) -> Result<(), ModelLoadError> {
        self.engine.rebuild()
    }

    fn summary(&self) {
        let config = self.post.config();
        log::info!(
            "\nSummary:\n\
            > Model: {}{}\n\
            > Task: {:?}\n\
            > EP: {:?} {}\n\
            > Height: {}, Width: {}\n\
            > nc: {}, conf: {}, iou: {}",
            self.engine.path().display(),
            match self.engine.author().zip(self.engine.version()) {
                Some((author, ver)) => format!(" ({} {})", author, ver),
                None => String::from(""),
            },
            config.task,
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                "(May still fall back to CPU)"
            },
            config.height,
            config.width,
            config.nc,
            config.conf,
            config.iou,
        );
    }
}

// ========================================
// YOLOv8 后处理器: 仅依赖输出张量与配置
// ========================================

/// YOLOv8 后处理配置
#[derive(Debug, Clone, Copy)]
pub struct YOLOv8Config {
    pub task: YOLOTask,
    pub nc: usize,
    pub width: usize,
    pub height: usize,
    pub conf: f32,
    pub iou: f32,
}

/// YOLOv8 后处理器
pub struct YOLOv8Postprocessor {
    config: YOLOv8Config,
}

impl YOLOv8Postprocessor {
    pub fn new(config: YOLOv8Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &YOLOv8Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut YOLOv8Config {
        &mut self.config
    }

    pub fn postprocess(
        &self,
        xs: &[Array<f32, IxDyn>],
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        let Some(preds) = xs.first() else {
            return Err(InferenceError::Shape("模型没有输出".to_string()));
        };
        match self.config.task {
            YOLOTask::Classify => self.postprocess_classify(preds),
            YOLOTask::Detect => self.postprocess_detect(preds, xs0),
        }
    }

    fn postprocess_detect(
        &self,
        preds: &Array<f32, IxDyn>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        const CXYWH_OFFSET: usize = 4;
        let nc = self.config.nc;
        if preds.ndim() != 3 || preds.shape()[1] < CXYWH_OFFSET + nc {
            return Err(InferenceError::Shape(format!(
                "检测输出应为 [batch, {}, anchors], 实际 {:?}",
                CXYWH_OFFSET + nc,
                preds.shape()
            )));
        }

        let mut ys = Vec::new();
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(x0) = xs0.get(idx) else { break };
            let width_original = x0.width() as f32;
            let height_original = x0.height() as f32;
            let ratio = (self.config.width as f32 / width_original)
                .min(self.config.height as f32 / height_original);

            let mut data: Vec<Bbox> = Vec::new();
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..CXYWH_OFFSET + nc]);

                let Some((id, &confidence)) = clss
                    .into_iter()
                    .enumerate()
                    .reduce(|max, x| if x.1 > max.1 { x } else { max })
                else {
                    continue;
                };

                if confidence < self.config.conf {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                let x1 = (cx - w / 2.).clamp(0.0, width_original);
                let y1 = (cy - h / 2.).clamp(0.0, height_original);
                let x2 = (cx + w / 2.).clamp(0.0, width_original);
                let y2 = (cy + h / 2.).clamp(0.0, height_original);
                data.push(Bbox::from_xyxy(x1, y1, x2, y2, id, confidence));
            }

            non_max_suppression(&mut data, self.config.iou);
            ys.push(DetectionResult::from_bboxes(data));
        }

        Ok(ys)
    }

    fn postprocess_classify(
        &self,
        preds: &Array<f32, IxDyn>,
    ) -> Result<Vec<DetectionResult>, InferenceError> {
        if preds.ndim() != 2 {
            return Err(InferenceError::Shape(format!(
                "分类输出应为 [batch, nc], 实际 {:?}",
                preds.shape()
            )));
        }
        Ok(preds
            .axis_iter(Axis(0))
            .map(|batch| DetectionResult::new(Some(Embedding::new(batch.into_owned())), None))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect_config() -> YOLOv8Config {
        YOLOv8Config {
            task: YOLOTask::Detect,
            nc: 2,
            width: 64,
            height: 64,
            conf: 0.10,
            iou: 0.45,
        }
    }

    /// 构造 [1, 4 + nc, anchors] 输出
    fn detect_output(anchors: &[[f32; 6]]) -> Array<f32, IxDyn> {
        let mut ys = Array::zeros((1, 6, anchors.len())).into_dyn();
        for (i, a) in anchors.iter().enumerate() {
            for (c, v) in a.iter().enumerate() {
                ys[[0, c, i]] = *v;
            }
        }
        ys
    }

    #[test]
    fn test_decode_scales_back_to_original() {
        let post = YOLOv8Postprocessor::new(detect_config());
        // 128x128 原图 → 64x64 输入, ratio = 0.5
        let img = DynamicImage::new_rgb8(128, 128);
        let out = detect_output(&[[32., 32., 16., 16., 0.82, 0.05]]);
        let ys = post.postprocess(&[out], &[img]).unwrap();
        let bboxes = ys[0].bboxes().unwrap();
        assert_eq!(bboxes.len(), 1);
        assert_eq!(bboxes[0].id(), 0);
        assert!((bboxes[0].confidence() - 0.82).abs() < 1e-6);
        assert!((bboxes[0].xmin() - 48.).abs() < 1e-4);
        assert!((bboxes[0].xmax() - 80.).abs() < 1e-4);
    }

    #[test]
    fn test_decode_drops_below_floor_and_clips() {
        let post = YOLOv8Postprocessor::new(detect_config());
        let img = DynamicImage::new_rgb8(64, 64);
        let out = detect_output(&[
            [2., 2., 20., 20., 0.05, 0.09],
            [60., 60., 20., 20., 0.1, 0.7],
        ]);
        let ys = post.postprocess(&[out], &[img]).unwrap();
        let bboxes = ys[0].bboxes().unwrap();
        assert_eq!(bboxes.len(), 1);
        assert_eq!(bboxes[0].id(), 1);
        assert!(bboxes[0].xmax() <= 64.);
        assert!(bboxes[0].ymax() <= 64.);
    }

    #[test]
    fn test_decode_empty_is_not_error() {
        let post = YOLOv8Postprocessor::new(detect_config());
        let img = DynamicImage::new_rgb8(64, 64);
        let out = detect_output(&[[10., 10., 5., 5., 0.01, 0.02]]);
        let ys = post.postprocess(&[out], &[img]).unwrap();
        assert!(ys[0].bboxes().is_none());
    }

    #[test]
    fn test_classify_and_shape_errors() {
        let mut config = detect_config();
        config.task = YOLOTask::Classify;
        let post = YOLOv8Postprocessor::new(config);
        let img = DynamicImage::new_rgb8(8, 8);
        let probs = Array::from_shape_vec((1, 2), vec![0.3, 0.7]).unwrap().into_dyn();
        let ys = post.postprocess(&[probs], &[img.clone()]).unwrap();
        assert_eq!(ys[0].probs().unwrap().top1(), Some((1, 0.7)));

        let bad = Array::zeros((1, 2, 3)).into_dyn();
        assert!(matches!(
            post.postprocess(&[bad], &[img]),
            Err(InferenceError::Shape(_))
        ));
    }
}
