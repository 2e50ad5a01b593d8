// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 会话配置 - 通过JSON文件调整参数

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 多个候选框置信度相同时的取舍规则
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// 保留模型输出顺序中靠前的框
    #[default]
    ModelOrder,
    /// 取面积最大的框
    LargestArea,
}

/// `reset()` 的实现方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetStrategy {
    /// 只丢弃跟踪器状态 (ONNX Runtime 推理本身无状态)
    #[default]
    ClearTracker,
    /// 丢弃跟踪器并从模型文件重新加载
    Reload,
}

/// ByteTrack 参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_lost_frames: u32,      // 最大丢失帧数
    pub high_score_threshold: f32, // 高分阈值 (新建轨迹)
    pub low_score_threshold: f32,  // 低分阈值 (救援匹配)
    pub high_iou_threshold: f32,   // 高分IOU阈值 (快速移动的目标重叠较小)
    pub low_iou_threshold: f32,    // 低分IOU阈值

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32, // 过程噪声 q
    pub kalman_obs_noise: f32,     // 观测噪声 r
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 30,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.2,
            low_iou_threshold: 0.3,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }
}

/// 检测会话参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // === 检测参数 ===
    pub conf: f32, // 置信度下限 (单图与跟踪输出都按此过滤)
    pub iou: f32,  // NMS IOU阈值
    pub tie_break: TieBreak,

    // === 会话行为 ===
    pub reset_strategy: ResetStrategy,
    pub save_dir: Option<PathBuf>,   // 标注结果保存目录 (runs/detect)
    pub font: Option<PathBuf>,       // 标注字体 (ttf/otf)
    pub label_file: Option<PathBuf>, // 类别显示名 JSON

    // === 推理设备 ===
    pub cuda: bool,
    pub device_id: i32,

    pub tracker: TrackerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conf: 0.10,
            iou: 0.45,
            tie_break: TieBreak::ModelOrder,
            reset_strategy: ResetStrategy::ClearTracker,
            save_dir: None,
            font: None,
            label_file: None,
            cuda: false,
            device_id: 0,
            tracker: TrackerConfig::default(),
        }
    }
}

impl SessionConfig {
    /// 从JSON文件加载配置,文件不存在时写入默认配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    log::info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                if let Err(e) = config.save(path) {
                    log::error!("❌ 保存配置失败: {}", e);
                }
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        log::info!("💾 配置已保存到 {}", path.display());
        Ok(())
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        log::info!("🎛️  当前会话配置:");
        log::info!("  置信度下限: {:.2} | NMS IOU: {:.2}", self.conf, self.iou);
        log::info!(
            "  同分取舍: {:?} | 重置方式: {:?}",
            self.tie_break,
            self.reset_strategy
        );
        log::info!(
            "  ByteTrack最大丢失帧: {} | 高/低分阈值: {:.2}/{:.2}",
            self.tracker.max_lost_frames,
            self.tracker.high_score_threshold,
            self.tracker.low_score_threshold
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_floor() {
        let config = SessionConfig::default();
        assert_eq!(config.conf, 0.10);
        assert_eq!(config.tie_break, TieBreak::ModelOrder);
        assert_eq!(config.reset_strategy, ResetStrategy::ClearTracker);
    }

    #[test]
    fn test_load_creates_default_then_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session.json");

        let config = SessionConfig::load(&path);
        assert_eq!(config, SessionConfig::default());
        assert!(path.exists());

        let mut changed = config.clone();
        changed.conf = 0.25;
        changed.reset_strategy = ResetStrategy::Reload;
        changed.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path), changed);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"conf": 0.3, "tie_break": "largest_area"}"#).unwrap();
        assert_eq!(config.conf, 0.3);
        assert_eq!(config.tie_break, TieBreak::LargestArea);
        assert_eq!(config.iou, 0.45);
        assert_eq!(config.tracker, TrackerConfig::default());
    }
}
