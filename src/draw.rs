// 该文件是 Kanshan （看山） 项目的一部分。
// src/draw.rs - 检测结果可视化标注
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::detection::{ClassNameMap, DetectionSet};

// 绘制常量
const BOX_COLOR: Rgb<u8> = Rgb([20, 20, 20]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const MIN_LINE_WIDTH: u32 = 2;
const MIN_FONT_SIZE: f32 = 12.0;
const LABEL_PADDING_X: i32 = 3;
const LABEL_PADDING_Y: i32 = 2;

/// 标注输出的 JPEG 编码质量
pub const JPEG_QUALITY: u8 = 90;

/// 检测框与标签的标注工具
pub struct Annotator {
  /// 标签字体
  font: FontArc,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::new(None)
  }
}

/// 标签文本: 类别名称加两位小数的置信度
fn label_text(name: &str, confidence: f32) -> String {
  format!("{} {:.2}", name, confidence)
}

impl Annotator {
  /// 创建标注工具。
  ///
  /// 字体分两级获取: 优先尝试给定路径的可缩放字体文件，
  /// 任何失败都回退到内置字体，不让字体问题影响请求处理。
  pub fn new(preferred_font: Option<&Path>) -> Self {
    let font = preferred_font.and_then(|path| match std::fs::read(path) {
      Ok(data) => match FontArc::try_from_vec(data) {
        Ok(font) => {
          info!("已加载字体: {}", path.display());
          Some(font)
        }
        Err(e) => {
          warn!("字体文件无效: {}, 错误: {}, 回退到内置字体", path.display(), e);
          None
        }
      },
      Err(e) => {
        warn!("无法读取字体文件: {}, 错误: {}, 回退到内置字体", path.display(), e);
        None
      }
    });

    let font = font.unwrap_or_else(|| {
      let font_data = include_bytes!("../assets/DejaVuSans.ttf");
      FontArc::try_from_slice(font_data).expect("无法加载内置的字体文件")
    });

    Self { font }
  }

  /// 在输入图像的副本上绘制检测框和标签。
  ///
  /// 输入图像不被修改；空集合返回与输入逐像素相同的副本。
  /// 按集合顺序先画框再画标签，后画的检测允许覆盖先画的。
  pub fn annotate(
    &self,
    image: &RgbImage,
    detections: &DetectionSet,
    names: &ClassNameMap,
  ) -> RgbImage {
    let mut output = image.clone();

    let line_width = (image.width() / 400).max(MIN_LINE_WIDTH);
    let scale = PxScale::from((image.width() as f32 / 100.0).max(MIN_FONT_SIZE));

    for detection in detections.items.iter() {
      let [x1, y1, x2, y2] = detection.bbox;
      let (x1, y1, x2, y2) = (x1 as i32, y1 as i32, x2 as i32, y2 as i32);

      self.draw_box(&mut output, x1, y1, x2, y2, line_width);

      let label = label_text(&names.resolve(detection.class_id), detection.confidence);
      self.draw_label(&mut output, &label, x1, y1, scale);
    }

    output
  }

  /// 绘制边框，线宽向矩形内部扩展
  fn draw_box(&self, image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, line_width: u32) {
    let width = (x2 - x1 + 1).max(1) as u32;
    let height = (y2 - y1 + 1).max(1) as u32;

    for t in 0..line_width as i32 {
      let inner_width = width.saturating_sub(2 * t as u32);
      let inner_height = height.saturating_sub(2 * t as u32);
      if inner_width == 0 || inner_height == 0 {
        break;
      }

      let rect = Rect::at(x1 + t, y1 + t).of_size(inner_width, inner_height);
      draw_hollow_rect_mut(image, rect, BOX_COLOR);
    }
  }

  /// 在检测框左上角上方绘制标签背景和文本。
  ///
  /// 上方空间不足时贴着图像顶部绘制，不允许出现负坐标。
  fn draw_label(&self, image: &mut RgbImage, label: &str, x: i32, y: i32, scale: PxScale) {
    let (text_width, text_height) = text_size(scale, &self.font, label);

    let label_y = (y - text_height as i32 - 2 * LABEL_PADDING_Y).max(0);
    let label_width = text_width + 2 * LABEL_PADDING_X as u32;
    let label_height = text_height + 2 * LABEL_PADDING_Y as u32;

    let rect = Rect::at(x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, BOX_COLOR);

    draw_text_mut(
      image,
      TEXT_COLOR,
      x + LABEL_PADDING_X,
      label_y + LABEL_PADDING_Y,
      scale,
      &self.font,
      label,
    );
  }
}

/// 将标注后的图像编码为固定质量的 JPEG 字节
pub fn to_jpeg_bytes(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Cursor::new(Vec::new());
  let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
  image.write_with_encoder(encoder)?;
  Ok(buffer.into_inner())
}
