// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use ndarray::{Array, IxDyn};

/// 单张图片的模型原始结果 (检测框 或 分类概率)
#[derive(Clone, PartialEq, Default)]
pub struct DetectionResult {
    pub probs: Option<Embedding>,
    pub bboxes: Option<Vec<Bbox>>,
}

impl std::fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YOLOResult")
            .field(
                "Probs(top5)",
                &format_args!("{:?}", self.probs().map(|probs| probs.topk(5))),
            )
            .field("Bboxes", &self.bboxes)
            .finish()
    }
}

impl DetectionResult {
    pub fn new(probs: Option<Embedding>, bboxes: Option<Vec<Bbox>>) -> Self {
        Self { probs, bboxes }
    }

    pub fn from_bboxes(bboxes: Vec<Bbox>) -> Self {
        Self {
            probs: None,
            bboxes: if bboxes.is_empty() { None } else { Some(bboxes) },
        }
    }

    pub fn probs(&self) -> Option<&Embedding> {
        self.probs.as_ref()
    }

    pub fn bboxes(&self) -> Option<&Vec<Bbox>> {
        self.bboxes.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding {
    // An float32 n-dims tensor
    data: Array<f32, IxDyn>,
}

impl Embedding {
    pub fn new(data: Array<f32, IxDyn>) -> Self {
        Self { data }
    }

    pub fn from_vec(probs: Vec<f32>) -> Self {
        Self {
            data: Array::from_vec(probs).into_dyn(),
        }
    }

    pub fn data(&self) -> &Array<f32, IxDyn> {
        &self.data
    }

    /// 概率最高的 k 个类别,相同概率保持类别索引顺序
    pub fn topk(&self, k: usize) -> Vec<(usize, f32)> {
        let mut probs = self
            .data
            .iter()
            .enumerate()
            .map(|(a, b)| (a, *b))
            .collect::<Vec<_>>();
        probs.sort_by(|a, b| b.1.total_cmp(&a.1));
        probs.truncate(k);
        probs
    }

    pub fn top1(&self) -> Option<(usize, f32)> {
        self.topk(1).first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32, id: usize, confidence: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1, id, confidence)
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Bbox::new(0., 0., 10., 10., 0, 0.9);
        let b = Bbox::new(20., 20., 10., 10., 0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_topk_keeps_index_order_on_ties() {
        let probs = Embedding::from_vec(vec![0.2, 0.4, 0.4]);
        assert_eq!(probs.topk(2), vec![(1, 0.4), (2, 0.4)]);
        assert_eq!(probs.top1(), Some((1, 0.4)));
        assert_eq!(Embedding::from_vec(Vec::new()).top1(), None);
    }
}
