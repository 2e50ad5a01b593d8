// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 宠物/犬种识别推理库
//!
//! - `DetectorSession`: 单图预测 + 视频逐帧跟踪,两种模式严格隔离
//! - `media`:   图片/视频帧读取
//! - `records`: 预测记录 (SQLite)
//! - `player`:  视频播放控制 (跟踪开关、跳帧、截图识别)

pub mod annotate; // 检测框绘制
pub mod config; // 会话配置参数
pub mod detection; // 检测会话与目标跟踪
pub mod error; // 错误类型
pub mod labels; // 类别显示名映射
pub mod media; // 图片/视频输入
pub mod models; // 模型接口与具体实现
pub mod player; // 视频播放控制
pub mod records; // 预测记录

pub mod ort_backend;
mod yolo_result;

pub use crate::config::{ResetStrategy, SessionConfig, TieBreak, TrackerConfig};
pub use crate::detection::{BoundingBox, Detection, DetectorSession, SessionMode};
pub use crate::error::{InferenceError, MediaError, ModelLoadError, RecordError};
pub use crate::labels::LabelMap;
pub use crate::models::{Model, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP, YOLOTask};
pub use crate::yolo_result::{Bbox, DetectionResult, Embedding};

/// 类别无关的非极大值抑制
///
/// 按置信度降序稳定排序,置信度相同的框保持原有顺序
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 北京时间字符串,用于截图文件名
pub fn gen_time_string(delimiter: &str) -> String {
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S{}%f",
        delimiter, delimiter, delimiter, delimiter, delimiter, delimiter
    );
    let t_now = chrono::Utc::now();
    match chrono::FixedOffset::east_opt(8 * 60 * 60) {
        Some(offset) => t_now.with_timezone(&offset).format(&fmt).to_string(),
        None => t_now.format(&fmt).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nms_keeps_best_and_disjoint() {
        let mut xs = vec![
            Bbox::new(0., 0., 10., 10., 0, 0.6),
            Bbox::new(1., 1., 10., 10., 1, 0.9),
            Bbox::new(50., 50., 10., 10., 0, 0.3),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence(), 0.9);
        assert_eq!(xs[1].confidence(), 0.3);
    }

    #[test]
    fn test_nms_is_stable_on_ties() {
        let mut xs = vec![
            Bbox::new(0., 0., 10., 10., 3, 0.5),
            Bbox::new(40., 40., 10., 10., 7, 0.5),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs[0].id(), 3);
        assert_eq!(xs[1].id(), 7);
    }

    #[test]
    fn test_gen_time_string() {
        let t = gen_time_string("-");
        assert_eq!(t.split('-').count(), 7);
    }
}
