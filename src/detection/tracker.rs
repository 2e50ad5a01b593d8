// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use super::types::BBox;

// ========== 卡尔曼滤波器 ==========

/// 简化卡尔曼滤波器 (用于单个边界框的位置和尺寸平滑)
/// 状态向量: [x_center, y_center, width, height, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    /// 状态估计: [cx, cy, w, h, vx, vy, vw, vh]
    state: [f32; 8],

    /// 估计误差协方差 (简化为对角阵)
    p: [f32; 8],

    /// 过程噪声 (运动不确定性)
    q: f32,

    /// 观测噪声 (测量不确定性)
    r: f32,

    /// 速度衰减因子 (用于静止目标,0.9-0.99)
    velocity_decay: f32,

    /// 静止阈值 (像素/帧)
    stationary_threshold: f32,

    /// 连续静止帧数计数器
    stationary_count: u32,
}

impl KalmanBoxFilter {
    /// 创建新的卡尔曼滤波器
    ///
    /// # 参数
    /// - `bbox`: 初始边界框
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (0.5-50.0, 越大越平滑)
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let cx = (bbox.x1 + bbox.x2) / 2.0;
        let cy = (bbox.y1 + bbox.y2) / 2.0;
        let w = bbox.x2 - bbox.x1;
        let h = bbox.y2 - bbox.y1;

        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0], // 初始速度为0
            p: [10.0; 8],
            q,
            r,
            velocity_decay: 0.95,
            stationary_threshold: 2.0,
            stationary_count: 0,
        }
    }

    /// 预测下一帧状态 (匀速运动模型 + 速度衰减)
    pub fn predict(&mut self) {
        let speed = (self.state[4] * self.state[4] + self.state[5] * self.state[5]).sqrt();
        let is_stationary = speed < self.stationary_threshold;

        if is_stationary {
            self.stationary_count += 1;
            // 连续静止3帧后,大幅衰减速度
            let decay = if self.stationary_count > 3 {
                0.7
            } else {
                self.velocity_decay
            };
            for v in &mut self.state[4..8] {
                *v *= decay;
            }
        } else {
            self.stationary_count = 0;
            self.state[4] *= self.velocity_decay;
            self.state[5] *= self.velocity_decay;
            self.state[6] *= 0.98; // 尺寸变化更慢
            self.state[7] *= 0.98;
        }

        // 状态转移: x = x + v
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }

        // 协方差预测: P = P + Q (静止时减小过程噪声)
        let q_factor = if is_stationary { 0.5 } else { 1.0 };
        for p in &mut self.p {
            *p += self.q * q_factor;
        }
    }

    /// 更新 (融合观测值,自适应噪声调整)
    pub fn update(&mut self, bbox: &BBox) {
        let cx = (bbox.x1 + bbox.x2) / 2.0;
        let cy = (bbox.y1 + bbox.y2) / 2.0;
        let w = bbox.x2 - bbox.x1;
        let h = bbox.y2 - bbox.y1;

        // 观测残差
        let y = [
            cx - self.state[0],
            cy - self.state[1],
            w - self.state[2],
            h - self.state[3],
        ];

        // 根据残差大小自适应调整观测噪声
        let residual_norm = (y[0] * y[0] + y[1] * y[1]).sqrt();
        let adaptive_r = if residual_norm < self.stationary_threshold {
            self.r * 0.3
        } else if residual_norm < 10.0 {
            self.r
        } else {
            // 大幅跳变:更信任预测值
            self.r * 3.0
        };

        // 卡尔曼增益: K = P / (P + R), 速度分量观测噪声放大10倍
        let mut k = [0.0f32; 8];
        for i in 0..8 {
            let r = if i < 4 { adaptive_r } else { adaptive_r * 10.0 };
            k[i] = self.p[i] / (self.p[i] + r);
        }

        for i in 0..4 {
            self.state[i] += k[i] * y[i];
        }

        // 速度更新 (静止时减小速度估计影响)
        let velocity_gain = if residual_norm < self.stationary_threshold {
            0.3
        } else {
            1.0
        };
        for i in 0..4 {
            self.state[i + 4] += k[i + 4] * y[i] * velocity_gain;
        }

        // 协方差更新: P = (I - K) * P
        for i in 0..8 {
            self.p[i] *= 1.0 - k[i];
        }

        if residual_norm >= self.stationary_threshold {
            self.stationary_count = 0;
        }
    }

    /// 当前状态的边界框 (类别与置信度由调用方填写)
    pub fn get_state_bbox(&self) -> BBox {
        self.bbox_from(
            self.state[0],
            self.state[1],
            self.state[2],
            self.state[3],
        )
    }

    /// 预测的边界框 (用于匹配)
    pub fn get_predicted_bbox(&self) -> BBox {
        self.bbox_from(
            self.state[0] + self.state[4],
            self.state[1] + self.state[5],
            self.state[2] + self.state[6],
            self.state[3] + self.state[7],
        )
    }

    fn bbox_from(&self, cx: f32, cy: f32, w: f32, h: f32) -> BBox {
        let w = w.max(1.0);
        let h = h.max(1.0);
        BBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            confidence: 1.0,
            class_id: 0,
        }
    }
}

// ========== 工具函数 ==========

/// 计算两个边界框的IOU (Intersection over Union)
pub fn compute_iou(bbox1: &BBox, bbox2: &BBox) -> f32 {
    let x1 = bbox1.x1.max(bbox2.x1);
    let y1 = bbox1.y1.max(bbox2.y1);
    let x2 = bbox1.x2.min(bbox2.x2);
    let y2 = bbox1.y2.min(bbox2.y2);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let intersection = (x2 - x1) * (y2 - y1);
    let area1 = (bbox1.x2 - bbox1.x1) * (bbox1.y2 - bbox1.y1);
    let area2 = (bbox2.x2 - bbox2.x1) * (bbox2.y2 - bbox2.y1);
    let union = area1 + area2 - intersection;

    if union <= 0.0 {
        return 0.0;
    }

    intersection / union
}

/// 根据ID生成不同颜色
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0; // 黄金角度采样
    hsv_to_rgb(hue, 0.8, 0.9)
}

/// HSV转RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_compute_iou() {
        let a = bbox(0., 0., 10., 10.);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &bbox(20., 20., 30., 30.)), 0.0);
        let half = compute_iou(&a, &bbox(5., 0., 15., 10.));
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_kalman_static_box_stays_put() {
        let b = bbox(100., 100., 140., 180.);
        let mut kf = KalmanBoxFilter::new(&b, 0.1, 0.5);
        for _ in 0..5 {
            kf.predict();
            kf.update(&b);
        }
        let s = kf.get_state_bbox();
        assert!((s.x1 - 100.).abs() < 0.5 && (s.y2 - 180.).abs() < 0.5);
        // 静止目标的预测框与当前框重合
        let p = kf.get_predicted_bbox();
        assert!((p.x1 - s.x1).abs() < 0.1 && (p.y1 - s.y1).abs() < 0.1);
    }

    #[test]
    fn test_kalman_follows_motion() {
        let mut kf = KalmanBoxFilter::new(&bbox(0., 0., 20., 20.), 0.1, 0.5);
        for step in 1..=10 {
            kf.predict();
            let dx = step as f32 * 5.0;
            kf.update(&bbox(dx, 0., dx + 20., 20.));
        }
        let state = kf.get_state_bbox();
        assert!(kf.get_predicted_bbox().x1 > state.x1);
        assert!(kf.get_predicted_bbox().x1 > 40.0);
    }

    #[test]
    fn test_id_colors_differ() {
        assert_ne!(id_to_color(1), id_to_color(2));
    }
}
