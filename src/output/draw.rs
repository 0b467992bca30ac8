// 该文件是 Larder （灶间） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::debug;

use crate::decode::Detection;
use crate::output::FrameResult;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const PALETTE_SIZE: usize = 80;
// 填充透明度范围，分数越高填充越实
const MIN_FILL_ALPHA: f32 = 0.1;
const MAX_FILL_ALPHA: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("字体文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontArc>,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 按类别生成不同的颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      colors,
    }
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
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

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 分数在 `[threshold, 1]` 内线性映射到填充透明度
pub fn fill_alpha(score: f32, threshold: f32) -> f32 {
  let span = (1.0 - threshold).max(f32::EPSILON);
  let t = ((score - threshold) / span).clamp(0.0, 1.0);
  MIN_FILL_ALPHA + t * (MAX_FILL_ALPHA - MIN_FILL_ALPHA)
}

/// 没有标签的检测结果以类别索引作为名称
pub fn caption(det: &Detection) -> String {
  match &det.label {
    Some(label) => format!("{} {:.2}", label, det.score),
    None => format!("#{} {:.2}", det.class_index, det.score),
  }
}

fn blend_rect(image: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>, alpha: f32) {
  for y in y0..=y1 {
    for x in x0..=x1 {
      let pixel = image.get_pixel_mut(x, y);
      for c in 0..3 {
        let blended = pixel[c] as f32 * (1.0 - alpha) + color[c] as f32 * alpha;
        pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file<P: AsRef<Path>>(self, path: P) -> Result<Self, DrawError> {
    let data = std::fs::read(path.as_ref())?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    debug!("加载字体文件: {}", path.as_ref().display());
    Ok(self.with_font(font))
  }

  pub fn color_of(&self, class_index: i32) -> Rgb<u8> {
    let idx = class_index.rem_euclid(self.colors.len() as i32) as usize;
    self.colors[idx]
  }

  /// 在原始帧的副本上绘制检测框、半透明填充和标签
  pub fn draw_detections(&self, result: &FrameResult<'_>) -> RgbImage {
    let frame = result.frame;
    let mut image = frame.image().clone();
    for det in result.detections {
      let bbox = result
        .ratio
        .to_frame_box(&det.bbox, frame.width(), frame.height());
      self.draw_bbox_with_label(&mut image, &bbox, det, result.threshold);
    }
    image
  }

  // bbox 为原始帧像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], det: &Detection, threshold: f32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_of(det.class_index);
    blend_rect(
      image,
      x_min as u32,
      y_min as u32,
      x_max as u32,
      y_max as u32,
      color,
      fill_alpha(det.score, threshold),
    );

    // 边框加粗为2像素
    let (bw, bh) = ((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
    draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(bw, bh), color);
    if bw > 2 && bh > 2 {
      draw_hollow_rect_mut(
        image,
        Rect::at(x_min + 1, y_min + 1).of_size(bw - 2, bh - 2),
        color,
      );
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = caption(det);
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    // 仅在标签有空间时绘制
    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

/// 以文本形式记录检测结果，每行 `label, score, x0, y0, x1, y1`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, result: &FrameResult<'_>) -> Vec<String> {
    let frame = result.frame;
    result
      .detections
      .iter()
      .map(|det| {
        let name = match (&det.label, self.label_with_name) {
          (Some(label), true) => label.clone(),
          _ => det.class_index.to_string(),
        };
        let [x0, y0, x1, y1] = result
          .ratio
          .to_frame_box(&det.bbox, frame.width(), frame.height());
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, det.score, x0, y0, x1, y1
        )
      })
      .collect()
  }

  pub fn record(&self, result: &FrameResult<'_>, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(result).join("\n"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{RawFrame, ScaleRatio};

  fn detection(label: Option<&str>, class_index: i32, score: f32) -> Detection {
    Detection {
      bbox: [0.25, 0.25, 0.75, 0.75],
      score,
      class_index,
      label: label.map(String::from),
    }
  }

  #[test]
  fn test_fill_alpha_grows_with_score() {
    let low = fill_alpha(0.25, 0.25);
    let mid = fill_alpha(0.6, 0.25);
    let high = fill_alpha(1.0, 0.25);
    assert!((low - MIN_FILL_ALPHA).abs() < 1e-6);
    assert!(low < mid && mid < high);
    assert!((high - MAX_FILL_ALPHA).abs() < 1e-6);
    assert!((fill_alpha(1.0, 1.0) - MIN_FILL_ALPHA).abs() < 1e-6);
  }

  #[test]
  fn test_caption_for_unlabeled_detection() {
    assert_eq!(caption(&detection(Some("apple"), 47, 0.5)), "apple 0.50");
    assert_eq!(caption(&detection(None, 120, 0.75)), "#120 0.75");
  }

  #[test]
  fn test_draw_without_font_marks_box() {
    let frame = RawFrame::new(RgbImage::new(40, 40), 0, 0);
    let dets = vec![detection(None, -3, 0.9)];
    let result = FrameResult {
      frame: &frame,
      detections: &dets,
      threshold: 0.5,
      ratio: ScaleRatio::IDENTITY,
    };
    let draw = Draw::default();
    let image = draw.draw_detections(&result);
    let color = draw.color_of(-3);
    // 边框
    assert_eq!(*image.get_pixel(10, 10), color);
    // 框内半透明填充
    assert_ne!(*image.get_pixel(20, 20), Rgb([0, 0, 0]));
    // 框外不变
    assert_eq!(*image.get_pixel(2, 2), Rgb([0, 0, 0]));
  }

  #[test]
  fn test_record_lines() {
    let frame = RawFrame::new(RgbImage::new(100, 50), 0, 0);
    let dets = vec![detection(Some("apple"), 47, 0.5), detection(None, 90, 0.4)];
    let result = FrameResult {
      frame: &frame,
      detections: &dets,
      threshold: 0.3,
      ratio: ScaleRatio { x: 1.0, y: 2.0 },
    };
    let lines = Record {
      label_with_name: true,
    }
    .lines(&result);
    assert_eq!(lines[0], "apple, 0.5000, 25.0, 25.0, 75.0, 75.0");
    assert_eq!(lines[1], "90, 0.4000, 25.0, 25.0, 75.0, 75.0");
  }
}
