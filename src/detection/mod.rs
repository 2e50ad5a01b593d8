// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测会话 (Detection Session)
///
/// - session:   单图预测 / 视频跟踪 两种模式与状态机
/// - bytetrack: ByteTrack 多目标跟踪
/// - tracker:   卡尔曼滤波与 IOU 等公共组件
/// - types:     检测结果数据结构
pub mod bytetrack;
pub mod session;
pub mod tracker;
pub mod types;

pub use bytetrack::{ByteTrackedObject, ByteTracker};
pub use session::DetectorSession;
pub use types::{BoundingBox, Detection, SessionMode};
