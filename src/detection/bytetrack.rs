// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ByteTrack 算法实现
//! ByteTrack: Simple and effective multi-object tracking
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征

use super::tracker::{compute_iou, KalmanBoxFilter};
use super::types::BBox;
use crate::config::TrackerConfig;

/// ByteTrack 跟踪对象
#[derive(Clone, Debug)]
pub struct ByteTrackedObject {
    /// 唯一跟踪ID (从1开始)
    pub id: u32,

    /// 当前边界框 (卡尔曼滤波平滑后, 类别/置信度取自最近一次匹配的检测)
    pub bbox: BBox,

    /// 卡尔曼滤波器
    kalman: KalmanBoxFilter,

    /// 连续丢失帧数, 0 表示本帧已匹配
    pub frames_lost: u32,

    /// 检测置信度
    pub score: f32,
}

impl ByteTrackedObject {
    fn new(id: u32, det: &BBox, q: f32, r: f32) -> Self {
        let kalman = KalmanBoxFilter::new(det, q, r);
        let mut bbox = kalman.get_state_bbox();
        bbox.confidence = det.confidence;
        bbox.class_id = det.class_id;

        Self {
            id,
            bbox,
            kalman,
            frames_lost: 0,
            score: det.confidence,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.refresh_bbox();
    }

    fn update(&mut self, det: &BBox) {
        self.kalman.update(det);
        self.score = det.confidence;
        self.bbox.class_id = det.class_id;
        self.refresh_bbox();
        self.frames_lost = 0;
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }

    fn refresh_bbox(&mut self) {
        let class_id = self.bbox.class_id;
        self.bbox = self.kalman.get_state_bbox();
        self.bbox.class_id = class_id;
        self.bbox.confidence = self.score;
    }

    fn get_predicted_bbox(&self) -> BBox {
        self.kalman.get_predicted_bbox()
    }

    /// 本帧是否被检测框匹配
    pub fn is_matched(&self) -> bool {
        self.frames_lost == 0
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    /// 当前跟踪的目标
    tracked: Vec<ByteTrackedObject>,

    /// 下一个分配的ID
    next_id: u32,

    config: TrackerConfig,
}

impl ByteTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            tracked: Vec::new(),
            next_id: 1,
            config: config.clone(),
        }
    }

    /// 更新跟踪 (ByteTrack 三步匹配), 返回全部存活轨迹 (含丢失中的)
    pub fn update(&mut self, detections: &[BBox]) -> &[ByteTrackedObject] {
        // 1. 所有轨迹先预测
        for tracked in &mut self.tracked {
            tracked.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets: Vec<(usize, &BBox)> = Vec::new();
        let mut low_dets: Vec<(usize, &BBox)> = Vec::new();

        for (idx, det) in detections.iter().enumerate() {
            if det.confidence >= self.config.high_score_threshold {
                high_dets.push((idx, det));
            } else if det.confidence >= self.config.low_score_threshold {
                low_dets.push((idx, det));
            }
        }

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracked.len()];

        let all_tracks: Vec<usize> = (0..self.tracked.len()).collect();
        let assignments =
            self.match_detections_to_tracks(&high_dets, &all_tracks, self.config.high_iou_threshold);

        for (det_idx, track_idx) in assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracked[track_idx].update(&detections[det_idx]);
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracked.len())
            .filter(|&idx| !matched_track[idx])
            .collect();

        let low_assignments = self.match_detections_to_tracks(
            &low_dets,
            &unmatched_tracks,
            self.config.low_iou_threshold,
        );

        for (det_idx, track_idx) in low_assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracked[track_idx].update(&detections[det_idx]);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracked[track_idx].mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for (det_idx, &matched) in matched_det.iter().enumerate() {
            if !matched && detections[det_idx].confidence >= self.config.high_score_threshold {
                let tracked = ByteTrackedObject::new(
                    self.next_id,
                    &detections[det_idx],
                    self.config.kalman_process_noise,
                    self.config.kalman_obs_noise,
                );
                self.tracked.push(tracked);
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.config.max_lost_frames;
        self.tracked.retain(|t| t.frames_lost <= max_lost);

        &self.tracked
    }

    /// IOU 匹配 (贪心)
    fn match_detections_to_tracks(
        &self,
        detections: &[(usize, &BBox)],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if detections.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        // 计算 IOU 代价矩阵
        let mut candidates = Vec::new();
        for (local_det_idx, (det_idx, detection)) in detections.iter().enumerate() {
            for (local_track_idx, &track_idx) in track_indices.iter().enumerate() {
                let track = &self.tracked[track_idx];
                let iou = compute_iou(detection, &track.get_predicted_bbox());

                if iou >= iou_threshold {
                    let cost = 1.0 - iou;
                    candidates.push((cost, *det_idx, local_det_idx, track_idx, local_track_idx));
                }
            }
        }

        // 贪心匹配: 按代价排序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; track_indices.len()];

        for (_, det_idx, local_det_idx, track_idx, local_track_idx) in candidates {
            if !used_det[local_det_idx] && !used_track[local_track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[local_det_idx] = true;
                used_track[local_track_idx] = true;
            }
        }

        assignments
    }

    /// 清空全部轨迹, ID 重新从 1 开始
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.next_id = 1;
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// 获取跟踪统计信息
    pub fn get_stats(&self) -> String {
        format!(
            "跟踪: {} 个目标 | 总ID: {}",
            self.tracked.len(),
            self.next_id - 1
        )
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id: 2,
        }
    }

    #[test]
    fn test_static_object_keeps_id() {
        let mut tracker = ByteTracker::default();
        let frame = [det(10., 10., 60., 60., 0.9)];
        for _ in 0..5 {
            let tracks = tracker.update(&frame);
            assert_eq!(tracks.len(), 1);
            assert_eq!(tracks[0].id, 1);
            assert_eq!(tracks[0].bbox.class_id, 2);
            assert!(tracks[0].is_matched());
        }
    }

    #[test]
    fn test_moving_object_keeps_id() {
        // 40px 的框每帧右移 20px, 相邻两帧 IOU 约 0.33
        let mut tracker = ByteTracker::default();
        for step in 0..20 {
            let x = step as f32 * 20.0;
            let tracks = tracker.update(&[det(x, 10., x + 40., 50., 0.9)]);
            assert_eq!(tracks.len(), 1, "第 {} 帧", step);
            assert_eq!(tracks[0].id, 1, "第 {} 帧", step);
            assert!(tracks[0].is_matched());
        }
    }

    #[test]
    fn test_two_objects_get_distinct_ids() {
        let mut tracker = ByteTracker::default();
        let tracks = tracker.update(&[det(0., 0., 20., 20., 0.9), det(100., 100., 140., 140., 0.8)]);
        let mut ids: Vec<u32> = tracks.iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_low_score_detection_does_not_spawn_track() {
        let mut tracker = ByteTracker::default();
        assert!(tracker.update(&[det(0., 0., 20., 20., 0.2)]).is_empty());
    }

    #[test]
    fn test_lost_track_is_dropped_after_limit() {
        let config = TrackerConfig {
            max_lost_frames: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = ByteTracker::new(&config);
        tracker.update(&[det(0., 0., 20., 20., 0.9)]);
        let tracks = tracker.update(&[]);
        assert_eq!(tracks.len(), 1);
        assert!(!tracks[0].is_matched());
        tracker.update(&[]);
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_clear_restarts_ids() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[det(0., 0., 20., 20., 0.9)]);
        tracker.update(&[det(0., 0., 20., 20., 0.9), det(80., 80., 120., 120., 0.9)]);
        tracker.clear();
        assert!(tracker.is_empty());
        let tracks = tracker.update(&[det(200., 200., 240., 240., 0.9)]);
        assert_eq!(tracks[0].id, 1);
    }
}
