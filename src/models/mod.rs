// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 模型统一接口与实现
///
/// # 架构说明
///
/// - **YOLOv8**: ONNX 导出的 YOLOv8/YOLO11 检测或分类模型 (`yolov8.rs`)
/// - 会话层 (`detection::DetectorSession`) 只依赖 `Model` trait,
///   可以替换为任何实现 (测试中使用脚本化模型)
///
/// ## 核心流程
/// ```text
/// 原始图片 → preprocess → ndarray张量
///          ↓
///     推理引擎 run
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
use image::DynamicImage;
use ndarray::{Array, IxDyn};

use crate::error::{InferenceError, ModelLoadError};
use crate::{DetectionResult, YOLOTask};

/// 统一的深度学习模型接口
pub trait Model: Send {
    /// 预处理: 图片 → NCHW 张量
    fn preprocess(
        &mut self,
        images: &[DynamicImage],
    ) -> Result<Vec<Array<f32, IxDyn>>, InferenceError>;

    /// 推理: 执行模型前向传播
    fn run(
        &mut self,
        xs: Vec<Array<f32, IxDyn>>,
    ) -> Result<Vec<Array<f32, IxDyn>>, InferenceError>;

    /// 后处理: 原始输出 → 检测结果 (坐标还原到原图)
    ///
    /// 检测框按置信度降序排列,置信度相同时保持模型输出顺序
    fn postprocess(
        &self,
        xs: Vec<Array<f32, IxDyn>>,
        xs0: &[DynamicImage],
    ) -> Result<Vec<DetectionResult>, InferenceError>;

    /// 完整的推理流程: preprocess → run → postprocess
    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>, InferenceError> {
        let xs = self.preprocess(images)?;
        let ys = self.run(xs)?;
        self.postprocess(ys, images)
    }

    /// 类别表 (类别索引 → 模型原生类别名)
    fn names(&self) -> &[String];

    fn task(&self) -> YOLOTask;

    fn set_conf(&mut self, val: f32);

    fn conf(&self) -> f32;

    fn set_iou(&mut self, val: f32);

    fn iou(&self) -> f32;

    /// 从模型文件重新加载权重,丢弃推理引擎内部的全部状态
    fn reload(&mut self) -> Result<(), ModelLoadError>;

    /// 打印模型信息
    fn summary(&self) {}
}

pub mod yolov8; // YOLOv8 完整模型 + 实现 Model trait

pub use yolov8::YOLOv8;
