// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端
//!
//! 负责: 会话构建 → 读取模型元数据 (names/task/imgsz) → 前向推理
//! 推理会话在两次 `run` 之间不保留任何状态

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use ndarray::{Array, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use regex::Regex;

use crate::error::{InferenceError, ModelLoadError};

/// 模型任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YOLOTask {
    /// 图像分类 (输出 [batch, nc])
    Classify,
    /// 目标检测 (输出 [batch, 4 + nc, anchors])
    Detect,
}

impl YOLOTask {
    fn from_metadata(task: &str) -> Option<Self> {
        match task.trim().trim_matches('\'') {
            "classify" => Some(YOLOTask::Classify),
            "detect" => Some(YOLOTask::Detect),
            _ => None,
        }
    }
}

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
}

/// 后端构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub ep: OrtEP,
    pub task: Option<YOLOTask>,
    pub image_size: (Option<u32>, Option<u32>),
}

impl OrtConfig {
    pub fn cpu(f: impl Into<PathBuf>) -> Self {
        Self {
            f: f.into(),
            ep: OrtEP::CPU,
            task: None,
            image_size: (None, None),
        }
    }
}

pub struct OrtBackend {
    session: Session,
    config: OrtConfig,
    input_name: String,
    output_names: Vec<String>,
    height: u32,
    width: u32,
    task: YOLOTask,
    names: Option<Vec<String>>,
    author: Option<String>,
    version: Option<String>,
}

impl OrtBackend {
    pub fn build(config: OrtConfig) -> Result<Self, ModelLoadError> {
        let session = Self::commit(&config.f, config.ep)?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ModelLoadError::InvalidArtifact("模型没有输入节点".to_string()))?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(ModelLoadError::InvalidArtifact(
                "模型没有输出节点".to_string(),
            ));
        }

        // 输入尺寸: 元数据 imgsz > 输入节点形状 > 参数 > 640
        let (mut height, mut width) = session
            .inputs
            .first()
            .and_then(|i| match &i.input_type {
                ValueType::Tensor { shape, .. } if shape.len() == 4 => {
                    Some((shape[2], shape[3]))
                }
                _ => None,
            })
            .map(|(h, w)| {
                (
                    u32::try_from(h).ok().filter(|v| *v > 0),
                    u32::try_from(w).ok().filter(|v| *v > 0),
                )
            })
            .unwrap_or((None, None));

        let mut names = None;
        let mut meta_task = None;
        let mut author = None;
        let mut version = None;
        if let Ok(meta) = session.metadata() {
            if let Ok(Some(raw)) = meta.custom("names") {
                let parsed = parse_names(&raw);
                if !parsed.is_empty() {
                    names = Some(parsed);
                }
            }
            if let Ok(Some(raw)) = meta.custom("task") {
                meta_task = YOLOTask::from_metadata(&raw);
                if meta_task.is_none() {
                    return Err(ModelLoadError::InvalidArtifact(format!(
                        "不支持的模型任务: {}",
                        raw
                    )));
                }
            }
            if let Ok(Some(raw)) = meta.custom("imgsz") {
                if let Some((h, w)) = parse_imgsz(&raw) {
                    height = Some(h);
                    width = Some(w);
                }
            }
            author = meta.custom("author").ok().flatten();
            version = meta.custom("version").ok().flatten();
        }

        let height = height.or(config.image_size.0).unwrap_or(640);
        let width = width.or(config.image_size.1).unwrap_or(640);

        // 任务类型: 参数 > 元数据 > 输出维度
        let task = match config.task.or(meta_task) {
            Some(task) => task,
            None => match &session.outputs[0].output_type {
                ValueType::Tensor { shape, .. } if shape.len() == 2 => YOLOTask::Classify,
                ValueType::Tensor { shape, .. } if shape.len() == 3 => YOLOTask::Detect,
                _ => {
                    return Err(ModelLoadError::InvalidArtifact(
                        "无法从输出形状推断任务类型".to_string(),
                    ))
                }
            },
        };

        log::info!(
            "✅ 模型加载成功: {} ({:?}, {}x{}, {} 类)",
            config.f.display(),
            task,
            width,
            height,
            names.as_ref().map(|n: &Vec<String>| n.len()).unwrap_or(0)
        );

        Ok(Self {
            session,
            config,
            input_name,
            output_names,
            height,
            width,
            task,
            names,
            author,
            version,
        })
    }

    fn commit(f: &Path, ep: OrtEP) -> Result<Session, ModelLoadError> {
        if !f.exists() {
            return Err(ModelLoadError::NotFound(f.to_path_buf()));
        }

        let mut builder = Session::builder().map_err(|e| ModelLoadError::Runtime(e.to_string()))?;
        if let OrtEP::CUDA(device_id) = ep {
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()])
                .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;
        }

        builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?
            .commit_from_file(f)
            .map_err(|e| ModelLoadError::InvalidArtifact(e.to_string()))
    }

    /// 从同一模型文件重建推理会话
    pub fn rebuild(&mut self) -> Result<(), ModelLoadError> {
        self.session = Self::commit(&self.config.f, self.config.ep)?;
        log::debug!("🔄 推理会话已重建: {}", self.config.f.display());
        Ok(())
    }

    pub fn run(&mut self, xs: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>, InferenceError> {
        let xs = xs.as_standard_layout();
        let input = TensorRef::from_array_view(&xs)
            .map_err(|e| InferenceError::Runtime(format!("输入张量创建失败: {e}")))?;

        let outputs = self
            .session
            .run(ort::inputs![&self.input_name => input])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let output = outputs
                .get(name.as_str())
                .ok_or_else(|| InferenceError::Shape(format!("缺少输出节点: {name}")))?;
            let (shape, data) = output
                .try_extract_tensor::<f32>()
                .map_err(|e| InferenceError::Runtime(e.to_string()))?;
            let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
            ys.push(Array::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }
        Ok(ys)
    }

    pub fn path(&self) -> &Path {
        &self.config.f
    }

    pub fn ep(&self) -> OrtEP {
        self.config.ep
    }

    pub fn task(&self) -> YOLOTask {
        self.task
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn names(&self) -> Option<&Vec<String>> {
        self.names.as_ref()
    }

    /// 输出维度推断类别数
    pub fn nc(&self) -> Option<u32> {
        match &self.session.outputs[0].output_type {
            ValueType::Tensor { shape, .. } => match self.task {
                YOLOTask::Classify if shape.len() == 2 => u32::try_from(shape[1]).ok(),
                YOLOTask::Detect if shape.len() == 3 => {
                    u32::try_from(shape[1] - 4).ok().filter(|n| *n > 0)
                }
                _ => None,
            },
            _ => None,
        }
        .or_else(|| self.names.as_ref().map(|n| n.len() as u32))
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// 解析 Ultralytics 元数据中的类别表: `{0: 'chihuahua', 1: 'pug'}`
///
/// 按类别索引排序,缺失的索引用 `class{N}` 补齐
pub fn parse_names(raw: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r#"(\d+)\s*:\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#)
            .expect("names regex")
    });

    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|cap| {
            let idx = cap.get(1)?.as_str().parse().ok()?;
            let name = cap.get(2).or_else(|| cap.get(3))?.as_str().to_string();
            Some((idx, name))
        })
        .collect();
    pairs.sort_by_key(|(idx, _)| *idx);

    let Some(max) = pairs.last().map(|(idx, _)| *idx) else {
        return Vec::new();
    };
    let mut names: Vec<String> = (0..=max).map(|i| format!("class{i}")).collect();
    for (idx, name) in pairs {
        names[idx] = name;
    }
    names
}

/// 解析 `imgsz` 元数据: `[640, 640]` → (h, w)
fn parse_imgsz(raw: &str) -> Option<(u32, u32)> {
    let dims: Vec<u32> = raw
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    match dims.as_slice() {
        [h, w] if *h > 0 && *w > 0 => Some((*h, *w)),
        [s] if *s > 0 => Some((*s, *s)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        let names = parse_names("{0: 'golden_retriever', 1: \"pug\", 2: 'shih-tzu'}");
        assert_eq!(names, vec!["golden_retriever", "pug", "shih-tzu"]);
    }

    #[test]
    fn test_parse_names_fills_gaps() {
        let names = parse_names("{2: 'beagle', 0: 'pug'}");
        assert_eq!(names, vec!["pug", "class1", "beagle"]);
        assert!(parse_names("").is_empty());
    }

    #[test]
    fn test_parse_imgsz() {
        assert_eq!(parse_imgsz("[224, 224]"), Some((224, 224)));
        assert_eq!(parse_imgsz("[480, 640]"), Some((480, 640)));
        assert_eq!(parse_imgsz("320"), Some((320, 320)));
        assert_eq!(parse_imgsz("[]"), None);
    }

    #[test]
    fn test_missing_model_is_not_found() {
        let err = OrtBackend::build(OrtConfig::cpu("definitely/missing/best.onnx"))
            .err()
            .expect("missing file must fail");
        assert!(matches!(err, ModelLoadError::NotFound(_)));
    }
}
