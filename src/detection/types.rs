// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测系统数据结构定义
//! Data structures for the detection session

// ========== 枚举类型 ==========

/// 会话模式
///
/// 只有 `Tracking` 模式下跟踪器状态可以非空
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Idle,
    SingleShot,
    Tracking,
}

// ========== 数据结构 ==========

/// 检测框 (跟踪器内部使用, 像素坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

/// 轴对齐矩形 (原图像素坐标, x1<x2 且 y1<y2)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    /// 裁剪到 `width x height` 画面内,裁剪后面积为0时返回 None
    pub fn clipped(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Option<Self> {
        let (w, h) = (width as f32, height as f32);
        let (x1, x2) = (x1.min(x2).clamp(0.0, w), x1.max(x2).clamp(0.0, w));
        let (y1, y2) = (y1.min(y2).clamp(0.0, h), y1.max(y2).clamp(0.0, h));
        if x2 - x1 > 0.0 && y2 - y1 > 0.0 {
            Some(Self { x1, y1, x2, y2 })
        } else {
            None
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// 一次推理得到的一个目标
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// 显示名 (经过 `LabelMap` 翻译)
    pub label: String,
    /// 模型类别索引
    pub raw_category: usize,
    /// 类别表中的原生类别名
    pub native_name: String,
    /// 置信度 [0, 1]
    pub confidence: f32,
    pub bounding_box: Option<BoundingBox>,
    /// 仅跟踪模式下存在
    pub track_id: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_partial_box() {
        let b = BoundingBox::clipped(-10., 5., 50., 120., 100, 100).unwrap();
        assert_eq!(b, BoundingBox { x1: 0., y1: 5., x2: 50., y2: 100. });
    }

    #[test]
    fn test_clip_orders_corners_and_rejects_degenerate() {
        let b = BoundingBox::clipped(40., 40., 10., 10., 100, 100).unwrap();
        assert!(b.x1 < b.x2 && b.y1 < b.y2);
        assert!(BoundingBox::clipped(120., 10., 150., 20., 100, 100).is_none());
        assert!(BoundingBox::clipped(10., 10., 10., 20., 100, 100).is_none());
    }
}
