// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型
//!
//! - `ModelLoadError`: 会话构建失败,不返回半初始化的会话
//! - `InferenceError`: 单次调用失败,跟踪状态保留
//! - `MediaError`:     图片/视频帧读取失败
//! - `RecordError`:    预测记录写入失败
//!
//! "未检测到目标" 不是错误: `Ok(None)` / `Ok(vec![])`

use std::path::PathBuf;

use thiserror::Error;

/// 模型加载错误 (对会话构建是致命的)
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("模型文件不存在: {0}")]
    NotFound(PathBuf),

    #[error("ONNX Runtime 加载失败: {0}")]
    Runtime(String),

    #[error("模型文件不兼容: {0}")]
    InvalidArtifact(String),
}

/// 推理错误 (仅对当前调用致命)
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("媒体读取失败: {0}")]
    Media(#[from] MediaError),

    #[error("帧数据损坏: {0}")]
    MalformedFrame(String),

    #[error("推理失败: {0}")]
    Runtime(String),

    #[error("模型输出形状异常: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for InferenceError {
    fn from(e: ndarray::ShapeError) -> Self {
        InferenceError::Shape(e.to_string())
    }
}

/// 媒体源错误
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("文件不存在: {0}")]
    NotFound(PathBuf),

    #[error("解码失败 {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("帧索引越界: {index} (共 {total} 帧)")]
    SeekOutOfRange { index: usize, total: usize },

    #[error("视频解码失败: {0}")]
    Video(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 预测记录错误
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("数据库错误: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("时间戳解析失败: {0}")]
    Timestamp(#[from] chrono::ParseError),
}
