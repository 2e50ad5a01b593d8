// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测结果绘制: 边框 + 标签 (标签文字需要配置字体)

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::detection::tracker::id_to_color;
use crate::detection::Detection;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const FONT_SIZE: f32 = 20.0;
const LINE_WIDTH: i32 = 3;

/// 标注绘制器
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// 不带字体: 只画框
    pub fn new() -> Self {
        Self::default()
    }

    /// 从字体文件加载 (ttf/otf), 失败时退化为只画框
    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let font = match std::fs::read(path) {
            Ok(bytes) => match FontArc::try_from_vec(bytes) {
                Ok(font) => {
                    log::info!("✅ 已加载标注字体: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    log::warn!("⚠️ 字体解析失败 {}: {}", path.display(), e);
                    None
                }
            },
            Err(_) => {
                log::warn!("⚠️ 未找到字体文件: {}", path.display());
                None
            }
        };
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 在图片副本上绘制检测结果
    ///
    /// 有 track_id 的目标按 ID 着色, 否则使用绿色
    pub fn draw(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        for det in detections {
            let color = match det.track_id {
                Some(id) => {
                    let (r, g, b) = id_to_color(id);
                    Rgb([r, g, b])
                }
                None => GREEN,
            };
            let label = Self::label_text(det);

            let Some(bbox) = det.bounding_box else {
                // 分类结果: 标签画在左上角
                self.draw_label(&mut canvas, &label, 0, 0, color);
                continue;
            };

            let x1 = bbox.x1 as i32;
            let y1 = bbox.y1 as i32;
            let w = (bbox.width() as u32).max(1);
            let h = (bbox.height() as u32).max(1);

            // 线宽: 向内收缩画多个矩形
            for i in 0..LINE_WIDTH {
                let (wi, hi) = (w as i32 - 2 * i, h as i32 - 2 * i);
                if wi <= 0 || hi <= 0 {
                    break;
                }
                let rect = Rect::at(x1 + i, y1 + i).of_size(wi as u32, hi as u32);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            self.draw_label(&mut canvas, &label, x1, y1, color);
        }
        canvas
    }

    /// 标签文字: "ID:3 金毛寻回犬 0.82"
    pub fn label_text(det: &Detection) -> String {
        match det.track_id {
            Some(id) => format!("ID:{} {} {:.2}", id, det.label, det.confidence),
            None => format!("{} {:.2}", det.label, det.confidence),
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, label: &str, x: i32, y: i32, color: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(FONT_SIZE);
        let (tw, th) = text_size(scale, font, label);
        // 框上方放不下时画在框内
        let ty = if y - th as i32 - 4 >= 0 {
            y - th as i32 - 4
        } else {
            y
        };
        let plate = Rect::at(x, ty).of_size(tw.max(1) + 4, th.max(1) + 4);
        draw_filled_rect_mut(canvas, plate, color);
        draw_text_mut(canvas, BLACK, x + 2, ty + 2, scale, font, label);
    }

    /// 绘制并保存 (格式由扩展名决定)
    pub fn save(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
        path: impl AsRef<Path>,
    ) -> image::ImageResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(image::ImageError::IoError)?;
        }
        self.draw(image, detections).save(path)
    }
}

/// 编码为 PNG 字节 (交给界面显示)
pub fn encode_png(image: &RgbImage) -> image::ImageResult<Vec<u8>> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn detection(track_id: Option<u32>) -> Detection {
        Detection {
            label: "萨摩耶".to_string(),
            raw_category: 0,
            native_name: "samoyed".to_string(),
            confidence: 0.82,
            bounding_box: Some(BoundingBox {
                x1: 4.,
                y1: 4.,
                x2: 20.,
                y2: 20.,
            }),
            track_id,
        }
    }

    #[test]
    fn test_draw_box_outline() {
        let img = DynamicImage::new_rgb8(32, 32);
        let out = Annotator::new().draw(&img, &[detection(None)]);
        assert_eq!(out.get_pixel(4, 4), &GREEN);
        assert_eq!(out.get_pixel(12, 12), &Rgb([0, 0, 0]));
        // 原图不变
        assert_eq!(img.to_rgb8().get_pixel(4, 4), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_tracked_box_uses_id_color() {
        let img = DynamicImage::new_rgb8(32, 32);
        let out = Annotator::new().draw(&img, &[detection(Some(3))]);
        let (r, g, b) = id_to_color(3);
        assert_eq!(out.get_pixel(4, 4), &Rgb([r, g, b]));
    }

    #[test]
    fn test_label_text() {
        assert_eq!(Annotator::label_text(&detection(None)), "萨摩耶 0.82");
        assert_eq!(Annotator::label_text(&detection(Some(7))), "ID:7 萨摩耶 0.82");
    }

    #[test]
    fn test_missing_font_falls_back() {
        let annotator = Annotator::with_font_file("/nonexistent/font.ttf");
        assert!(!annotator.has_font());
    }

    #[test]
    fn test_save_and_encode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predict1/dog.png");
        let img = DynamicImage::new_rgb8(16, 16);
        Annotator::new().save(&img, &[], &path).unwrap();
        assert!(path.exists());

        let png = encode_png(&img.to_rgb8()).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
