// 该文件是 Shanan （山南西风） 项目的一部分。
// src/overlay.rs - 检测结果叠加绘制
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{ImageBuffer, Pixel, Rgb, Rgba};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::{Frame, PixelFormat},
  model::DetectItem,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 1;
const BOX_THICKNESS: i32 = 3;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const LABEL_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];

/// 内置标签字体（DejaVu Sans）
static DEFAULT_FONT: &[u8] = include_bytes!("../assets/font.ttf");

#[derive(Error, Debug)]
pub enum OverlayError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontRead {
    path: String,
    source: std::io::Error,
  },
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub struct Overlay {
  font: Option<FontArc>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  box_thickness: i32,
  box_color: [u8; 3],
  label_color: [u8; 3],
  text_color: [u8; 3],
}

fn default_font() -> Option<FontArc> {
  match FontArc::try_from_slice(DEFAULT_FONT) {
    Ok(font) => Some(font),
    Err(e) => {
      warn!("内置字体无效，标签只绘制背景: {}", e);
      None
    }
  }
}

impl Default for Overlay {
  fn default() -> Self {
    Self {
      font: default_font(),
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      box_thickness: BOX_THICKNESS,
      box_color: BOX_COLOR,
      label_color: LABEL_COLOR,
      text_color: TEXT_COLOR,
    }
  }
}

/// 像素坐标下、已截断到图像内的检测框
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelBox {
  x_min: i32,
  y_min: i32,
  x_max: i32,
  y_max: i32,
}

impl Overlay {
  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn load_font(self, path: impl AsRef<Path>) -> Result<Self, OverlayError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| OverlayError::FontRead {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| OverlayError::InvalidFont(path.display().to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(self.with_font(font))
  }

  /// 只绘制标签背景，不渲染文字
  pub fn without_font(mut self) -> Self {
    self.font = None;
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 标签文本，例如 `person 87.5%`
  pub fn label_text(item: &DetectItem) -> String {
    format!("{} {:.1}%", item.label(), item.score * 100.0)
  }

  /// 原地绘制检测框与标签，没有检测结果时帧内容保持不变
  pub fn draw(&self, frame: &mut Frame, detections: &[DetectItem]) {
    if detections.is_empty() {
      return;
    }

    let (w, h) = (frame.width(), frame.height());
    let format = frame.format();
    let data = frame.as_bytes_mut();

    match format {
      PixelFormat::Rgba8888 => {
        if let Some(mut image) = ImageBuffer::<Rgba<u8>, &mut [u8]>::from_raw(w, h, data) {
          self.draw_all(&mut image, detections, |[r, g, b]| Rgba([r, g, b, 255]));
        }
      }
      PixelFormat::Bgra8888 => {
        if let Some(mut image) = ImageBuffer::<Rgba<u8>, &mut [u8]>::from_raw(w, h, data) {
          self.draw_all(&mut image, detections, |[r, g, b]| Rgba([b, g, r, 255]));
        }
      }
      PixelFormat::Rgb888 => {
        if let Some(mut image) = ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(w, h, data) {
          self.draw_all(&mut image, detections, Rgb);
        }
      }
      PixelFormat::Bgr888 => {
        if let Some(mut image) = ImageBuffer::<Rgb<u8>, &mut [u8]>::from_raw(w, h, data) {
          self.draw_all(&mut image, detections, |[r, g, b]| Rgb([b, g, r]));
        }
      }
      other => warn!("无法在 {:?} 格式的帧上绘制检测结果", other),
    }
  }

  fn draw_all<P, F>(
    &self,
    image: &mut ImageBuffer<P, &mut [u8]>,
    detections: &[DetectItem],
    color: F,
  ) where
    P: Pixel<Subpixel = u8>,
    F: Fn([u8; 3]) -> P,
  {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for item in detections {
      let Some(bbox) = clamp_box(item, w, h) else {
        continue;
      };
      self.draw_box(image, bbox, color(self.box_color));
      self.draw_label(image, bbox, &Self::label_text(item), &color);
    }
  }

  fn draw_box<P: Pixel<Subpixel = u8>>(
    &self,
    image: &mut ImageBuffer<P, &mut [u8]>,
    bbox: PixelBox,
    color: P,
  ) {
    // 向内加粗
    for t in 0..self.box_thickness {
      let width = bbox.x_max - bbox.x_min + 1 - 2 * t;
      let height = bbox.y_max - bbox.y_min + 1 - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(bbox.x_min + t, bbox.y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }

  fn draw_label<P, F>(
    &self,
    image: &mut ImageBuffer<P, &mut [u8]>,
    bbox: PixelBox,
    text: &str,
    color: &F,
  ) where
    P: Pixel<Subpixel = u8>,
    F: Fn([u8; 3]) -> P,
  {
    let (w, h) = (image.width() as i32, image.height() as i32);

    // 估算文本大小（粗略估计）
    let text_width = (text.chars().count() as f32 * self.label_char_width) as i32;
    let label_width = text_width.clamp(1, w);
    let label_height = self.label_text_height.clamp(1, h);

    // 标签位于框的左上角之上，保持在图像内
    let label_x = bbox.x_min.clamp(0, w - label_width);
    let label_y = (bbox.y_min - label_height).clamp(0, h - label_height);

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color(self.label_color));

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        color(self.text_color),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        text,
      );
    }
  }
}

fn clamp_box(item: &DetectItem, w: i32, h: i32) -> Option<PixelBox> {
  let bbox = PixelBox {
    x_min: (item.bbox.left.floor() as i32).clamp(0, w - 1),
    y_min: (item.bbox.top.floor() as i32).clamp(0, h - 1),
    x_max: (item.bbox.right.ceil() as i32).clamp(0, w - 1),
    y_max: (item.bbox.bottom.ceil() as i32).clamp(0, h - 1),
  };
  if bbox.x_min > bbox.x_max || bbox.y_min > bbox.y_max {
    return None;
  }
  Some(bbox)
}
