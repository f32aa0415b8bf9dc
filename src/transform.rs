// 该文件是 Shanan （山南西风） 项目的一部分。
// src/transform.rs - 颜色空间转换、旋转、缩放与 letterbox
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

//! 无状态的几何与格式变换。
//!
//! 所有函数要么完整写出结果，要么在写入之前返回错误。
//! 带 `_into` 后缀的版本写入调用方提供的缓冲，主循环中不做分配。

use image::{
  ImageBuffer, LumaA, Pixel, Rgb, Rgba,
  imageops::{self, FilterType},
};
use thiserror::Error;

use crate::frame::{Frame, FrameError, ImageDesc, ImageDescMut, PixelFormat};

#[derive(Error, Debug, PartialEq)]
pub enum TransformError {
  #[error("不支持的颜色空间转换: {from:?} -> {to:?}")]
  UnsupportedConversion { from: PixelFormat, to: PixelFormat },
  #[error("像素格式 {0:?} 不支持该操作")]
  UnsupportedFormat(PixelFormat),
  #[error("尺寸不匹配: 期望 {expected_width}x{expected_height}, 实际 {width}x{height}")]
  DimensionMismatch {
    expected_width: u32,
    expected_height: u32,
    width: u32,
    height: u32,
  },
  #[error("图像尺寸为空: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 检测框，`[left, top, right, bottom]`，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  pub fn width(&self) -> f32 {
    (self.right - self.left).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.bottom - self.top).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right.min(other.right);
    let y2 = self.bottom.min(other.bottom);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

// ---------------------------------------------------------------------------
// 颜色空间
// ---------------------------------------------------------------------------

#[inline]
fn clamp_channel(value: f32) -> u8 {
  value.clamp(0.0, 255.0) as u8
}

/// BT.601 全范围 YUV → RGB，每个通道截断到 `[0, 255]`
#[inline]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;

  [
    clamp_channel(y + 1.402 * v),
    clamp_channel(y - 0.344136 * u - 0.714136 * v),
    clamp_channel(y + 1.772 * u),
  ]
}

/// 读取 `(x, y)` 处像素并统一为 RGBA
#[inline]
fn read_rgba(src: &ImageDesc<'_>, x: usize, y: usize) -> [u8; 4] {
  let w = src.width as usize;
  let d = src.data;
  match src.format {
    PixelFormat::Nv12 => {
      let luma = d[y * w + x];
      // 4:2:0 色度，两行两列共用一对 UV
      let uv = w * src.height as usize + (y / 2) * w + (x & !1);
      let [r, g, b] = yuv_to_rgb(luma, d[uv], d[uv + 1]);
      [r, g, b, 255]
    }
    PixelFormat::Rgb888 => {
      let o = (y * w + x) * 3;
      [d[o], d[o + 1], d[o + 2], 255]
    }
    PixelFormat::Bgr888 => {
      let o = (y * w + x) * 3;
      [d[o + 2], d[o + 1], d[o], 255]
    }
    PixelFormat::Rgba8888 => {
      let o = (y * w + x) * 4;
      [d[o], d[o + 1], d[o + 2], d[o + 3]]
    }
    PixelFormat::Bgra8888 => {
      let o = (y * w + x) * 4;
      [d[o + 2], d[o + 1], d[o], d[o + 3]]
    }
    PixelFormat::Rgb565 => {
      let o = (y * w + x) * 2;
      let v = u16::from_le_bytes([d[o], d[o + 1]]);
      let r = ((v >> 11) & 0x1f) as u8;
      let g = ((v >> 5) & 0x3f) as u8;
      let b = (v & 0x1f) as u8;
      [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
    }
  }
}

/// 把 RGBA 像素写到打包格式缓冲的第 `index` 个像素
#[inline]
fn write_rgba(dst: &mut [u8], format: PixelFormat, index: usize, px: [u8; 4]) {
  match format {
    PixelFormat::Rgb888 => {
      let o = index * 3;
      dst[o..o + 3].copy_from_slice(&px[..3]);
    }
    PixelFormat::Bgr888 => {
      let o = index * 3;
      dst[o] = px[2];
      dst[o + 1] = px[1];
      dst[o + 2] = px[0];
    }
    PixelFormat::Rgba8888 => {
      let o = index * 4;
      dst[o..o + 4].copy_from_slice(&px);
    }
    PixelFormat::Bgra8888 => {
      let o = index * 4;
      dst[o] = px[2];
      dst[o + 1] = px[1];
      dst[o + 2] = px[0];
      dst[o + 3] = px[3];
    }
    PixelFormat::Rgb565 => {
      let o = index * 2;
      let v = ((px[0] as u16 >> 3) << 11) | ((px[1] as u16 >> 2) << 5) | (px[2] as u16 >> 3);
      dst[o..o + 2].copy_from_slice(&v.to_le_bytes());
    }
    // 目标格式在入口处已检查为打包格式
    PixelFormat::Nv12 => {}
  }
}

fn check_same_size(src: &ImageDesc<'_>, dst: &ImageDescMut<'_>) -> Result<(), TransformError> {
  if src.width != dst.width || src.height != dst.height {
    return Err(TransformError::DimensionMismatch {
      expected_width: src.width,
      expected_height: src.height,
      width: dst.width,
      height: dst.height,
    });
  }
  Ok(())
}

fn check_packed_target(src: PixelFormat, dst: PixelFormat) -> Result<(), TransformError> {
  if !dst.is_packed() {
    return Err(TransformError::UnsupportedConversion {
      from: src,
      to: dst,
    });
  }
  Ok(())
}

/// 同尺寸的逐像素颜色空间转换
pub fn convert_colorspace_into(
  src: &ImageDesc<'_>,
  dst: &mut ImageDescMut<'_>,
) -> Result<(), TransformError> {
  check_packed_target(src.format, dst.format)?;
  check_same_size(src, dst)?;

  if src.format == dst.format {
    let size = src.format.frame_size(src.width, src.height);
    dst.data[..size].copy_from_slice(&src.data[..size]);
    return Ok(());
  }

  let (w, h) = (src.width as usize, src.height as usize);
  for y in 0..h {
    for x in 0..w {
      let px = read_rgba(src, x, y);
      write_rgba(dst.data, dst.format, y * w + x, px);
    }
  }
  Ok(())
}

pub fn convert_colorspace(
  src: &[u8],
  width: u32,
  height: u32,
  src_format: PixelFormat,
  dst_format: PixelFormat,
) -> Result<Vec<u8>, TransformError> {
  let src = ImageDesc::new(src, width, height, src_format)?;
  check_packed_target(src_format, dst_format)?;
  let mut out = vec![0u8; dst_format.frame_size(width, height)];
  let mut dst = ImageDescMut::new(&mut out, width, height, dst_format)?;
  convert_colorspace_into(&src, &mut dst)?;
  Ok(out)
}

// ---------------------------------------------------------------------------
// 旋转
// ---------------------------------------------------------------------------

/// 传感器方向到屏幕方向的旋转
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
  None,
  /// 逆时针 90°，参考板的摄像头与竖屏之间的默认关系
  #[default]
  CounterClockwise90,
  Clockwise90,
}

impl Rotation {
  pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
    match self {
      Rotation::None => (width, height),
      Rotation::CounterClockwise90 | Rotation::Clockwise90 => (height, width),
    }
  }
}

pub fn rotate_into(
  src: &ImageDesc<'_>,
  rotation: Rotation,
  dst: &mut ImageDescMut<'_>,
) -> Result<(), TransformError> {
  if dst.format != src.format {
    return Err(TransformError::UnsupportedConversion {
      from: src.format,
      to: dst.format,
    });
  }

  let (new_w, new_h) = rotation.output_size(src.width, src.height);
  if dst.width != new_w || dst.height != new_h {
    return Err(TransformError::DimensionMismatch {
      expected_width: new_w,
      expected_height: new_h,
      width: dst.width,
      height: dst.height,
    });
  }

  // 旋转只搬运像素，RGB565 的两个字节按 LumaA 整体移动
  match src.format {
    PixelFormat::Rgb888 | PixelFormat::Bgr888 => rotate_pixels::<Rgb<u8>>(src, rotation, dst),
    PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => {
      rotate_pixels::<Rgba<u8>>(src, rotation, dst)
    }
    PixelFormat::Rgb565 => rotate_pixels::<LumaA<u8>>(src, rotation, dst),
    PixelFormat::Nv12 => Err(TransformError::UnsupportedFormat(src.format)),
  }
}

fn rotate_pixels<P>(
  src: &ImageDesc<'_>,
  rotation: Rotation,
  dst: &mut ImageDescMut<'_>,
) -> Result<(), TransformError>
where
  P: Pixel<Subpixel = u8> + 'static,
{
  let view = pixel_view::<P>(src)?;
  let (width, height) = (dst.width, dst.height);
  let mut out = pixel_view_mut::<P>(dst)?;
  let result = match rotation {
    Rotation::None => {
      out.copy_from_slice(&view);
      Ok(())
    }
    Rotation::CounterClockwise90 => imageops::rotate270_in(&view, &mut out),
    Rotation::Clockwise90 => imageops::rotate90_in(&view, &mut out),
  };
  result.map_err(|_| TransformError::DimensionMismatch {
    expected_width: view.height(),
    expected_height: view.width(),
    width,
    height,
  })
}

/// 逆时针旋转 90°，返回 `(像素, 新宽 = 旧高, 新高 = 旧宽)`
pub fn rotate_90(
  src: &[u8],
  width: u32,
  height: u32,
  format: PixelFormat,
) -> Result<(Vec<u8>, u32, u32), TransformError> {
  rotate(src, width, height, format, Rotation::CounterClockwise90)
}

/// 顺时针旋转 90°，`rotate_90` 的逆操作
pub fn rotate_90_clockwise(
  src: &[u8],
  width: u32,
  height: u32,
  format: PixelFormat,
) -> Result<(Vec<u8>, u32, u32), TransformError> {
  rotate(src, width, height, format, Rotation::Clockwise90)
}

fn rotate(
  src: &[u8],
  width: u32,
  height: u32,
  format: PixelFormat,
  rotation: Rotation,
) -> Result<(Vec<u8>, u32, u32), TransformError> {
  let src = ImageDesc::new(src, width, height, format)?;
  let (new_w, new_h) = rotation.output_size(width, height);
  let mut out = vec![0u8; format.frame_size(new_w, new_h)];
  let mut dst = ImageDescMut::new(&mut out, new_w, new_h, format)?;
  rotate_into(&src, rotation, &mut dst)?;
  Ok((out, new_w, new_h))
}

// ---------------------------------------------------------------------------
// 缩放
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
  Nearest,
  #[default]
  Bilinear,
}

impl From<ResizeFilter> for FilterType {
  fn from(filter: ResizeFilter) -> Self {
    match filter {
      ResizeFilter::Nearest => FilterType::Nearest,
      ResizeFilter::Bilinear => FilterType::Triangle,
    }
  }
}

/// 以 `image` 的像素类型借用描述符里的字节
fn pixel_view<'a, P>(src: &ImageDesc<'a>) -> Result<ImageBuffer<P, &'a [u8]>, TransformError>
where
  P: Pixel<Subpixel = u8>,
{
  let size = src.format.frame_size(src.width, src.height);
  let data: &'a [u8] = src.data;
  data
    .get(..size)
    .and_then(|data| ImageBuffer::from_raw(src.width, src.height, data))
    .ok_or(TransformError::Frame(FrameError::SizeMismatch {
      expected: size,
      actual: src.data.len(),
    }))
}

fn pixel_view_mut<'b, P>(
  dst: &'b mut ImageDescMut<'_>,
) -> Result<ImageBuffer<P, &'b mut [u8]>, TransformError>
where
  P: Pixel<Subpixel = u8>,
{
  let size = dst.format.frame_size(dst.width, dst.height);
  let actual = dst.data.len();
  let (width, height) = (dst.width, dst.height);
  dst
    .data
    .get_mut(..size)
    .and_then(|data| ImageBuffer::from_raw(width, height, data))
    .ok_or(TransformError::Frame(FrameError::SizeMismatch {
      expected: size,
      actual,
    }))
}

/// 缩放后写到目标缓冲的 `(x, y)` 处，目标缓冲其余部分保持不变
fn resize_pixels<P>(
  src: &ImageDesc<'_>,
  dst: &mut ImageDescMut<'_>,
  (x, y): (u32, u32),
  (width, height): (u32, u32),
  filter: ResizeFilter,
) -> Result<(), TransformError>
where
  P: Pixel<Subpixel = u8> + 'static,
{
  let view = pixel_view::<P>(src)?;
  let resized = imageops::resize(&view, width, height, filter.into());
  let mut out = pixel_view_mut::<P>(dst)?;
  imageops::replace(&mut out, &resized, x as i64, y as i64);
  Ok(())
}

fn resize_region(
  src: &ImageDesc<'_>,
  dst: &mut ImageDescMut<'_>,
  offset: (u32, u32),
  size: (u32, u32),
  filter: ResizeFilter,
) -> Result<(), TransformError> {
  if size.0 == 0 || size.1 == 0 {
    return Err(TransformError::EmptyImage {
      width: size.0,
      height: size.1,
    });
  }
  match src.format {
    PixelFormat::Rgb888 | PixelFormat::Bgr888 => {
      resize_pixels::<Rgb<u8>>(src, dst, offset, size, filter)
    }
    PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => {
      resize_pixels::<Rgba<u8>>(src, dst, offset, size, filter)
    }
    other => Err(TransformError::UnsupportedFormat(other)),
  }
}

/// 同格式缩放，仅支持按字节存储通道的打包格式
pub fn resize_into(
  src: &ImageDesc<'_>,
  dst: &mut ImageDescMut<'_>,
  filter: ResizeFilter,
) -> Result<(), TransformError> {
  if src.format != dst.format {
    return Err(TransformError::UnsupportedConversion {
      from: src.format,
      to: dst.format,
    });
  }
  let size = (dst.width, dst.height);
  resize_region(src, dst, (0, 0), size, filter)
}

pub fn resize(
  src: &[u8],
  src_width: u32,
  src_height: u32,
  dst_width: u32,
  dst_height: u32,
  format: PixelFormat,
  filter: ResizeFilter,
) -> Result<Vec<u8>, TransformError> {
  let src = ImageDesc::new(src, src_width, src_height, format)?;
  let mut out = vec![0u8; format.frame_size(dst_width, dst_height)];
  let mut dst = ImageDescMut::new(&mut out, dst_width, dst_height, format)?;
  resize_into(&src, &mut dst, filter)?;
  Ok(out)
}

/// 复制、缩放与格式转换合在一起，供软件加速器实现使用
///
/// 格式和尺寸同时变化时经过一张 RGBA 中间图。
pub fn resample_into(
  src: &ImageDesc<'_>,
  dst: &mut ImageDescMut<'_>,
  filter: ResizeFilter,
) -> Result<(), TransformError> {
  check_packed_target(src.format, dst.format)?;

  if src.width == dst.width && src.height == dst.height {
    return convert_colorspace_into(src, dst);
  }
  if src.format == dst.format && src.format != PixelFormat::Rgb565 {
    return resize_into(src, dst, filter);
  }

  let rgba = convert_colorspace(
    src.data,
    src.width,
    src.height,
    src.format,
    PixelFormat::Rgba8888,
  )?;
  let rgba = ImageDesc::new(&rgba, src.width, src.height, PixelFormat::Rgba8888)?;
  if dst.format == PixelFormat::Rgba8888 {
    return resize_into(&rgba, dst, filter);
  }

  let resized = imageops::resize(
    &pixel_view::<Rgba<u8>>(&rgba)?,
    dst.width,
    dst.height,
    filter.into(),
  );
  let resized = ImageDesc::new(
    resized.as_raw(),
    dst.width,
    dst.height,
    PixelFormat::Rgba8888,
  )?;
  convert_colorspace_into(&resized, dst)
}

// ---------------------------------------------------------------------------
// letterbox
// ---------------------------------------------------------------------------

/// 记录源图如何放入模型输入画布，是模型坐标映射回源图坐标的唯一依据
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
  scale: f32,
  pad_x: u32,
  pad_y: u32,
  scaled_width: u32,
  scaled_height: u32,
  model_width: u32,
  model_height: u32,
  src_width: u32,
  src_height: u32,
}

impl LetterboxTransform {
  pub fn new(
    src_width: u32,
    src_height: u32,
    model_width: u32,
    model_height: u32,
  ) -> Result<Self, TransformError> {
    if src_width == 0 || src_height == 0 {
      return Err(TransformError::EmptyImage {
        width: src_width,
        height: src_height,
      });
    }
    if model_width == 0 || model_height == 0 {
      return Err(TransformError::EmptyImage {
        width: model_width,
        height: model_height,
      });
    }

    let scale =
      (model_width as f32 / src_width as f32).min(model_height as f32 / src_height as f32);
    let scaled_width = ((src_width as f32 * scale).round() as u32).clamp(1, model_width);
    let scaled_height = ((src_height as f32 * scale).round() as u32).clamp(1, model_height);

    Ok(Self {
      scale,
      pad_x: (model_width - scaled_width) / 2,
      pad_y: (model_height - scaled_height) / 2,
      scaled_width,
      scaled_height,
      model_width,
      model_height,
      src_width,
      src_height,
    })
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  pub fn pad_x(&self) -> u32 {
    self.pad_x
  }

  pub fn pad_y(&self) -> u32 {
    self.pad_y
  }

  /// 缩放后源图在画布中的尺寸
  pub fn scaled_size(&self) -> (u32, u32) {
    (self.scaled_width, self.scaled_height)
  }

  pub fn model_size(&self) -> (u32, u32) {
    (self.model_width, self.model_height)
  }

  pub fn src_size(&self) -> (u32, u32) {
    (self.src_width, self.src_height)
  }

  /// 模型输入坐标 → 源图坐标：`(model - pad) / scale`，截断到源图像素范围
  pub fn remap_box(&self, bbox: BoundingBox) -> BoundingBox {
    let max_x = self.src_width.saturating_sub(1) as f32;
    let max_y = self.src_height.saturating_sub(1) as f32;
    let (pad_x, pad_y) = (self.pad_x as f32, self.pad_y as f32);

    BoundingBox {
      left: ((bbox.left - pad_x) / self.scale).clamp(0.0, max_x),
      top: ((bbox.top - pad_y) / self.scale).clamp(0.0, max_y),
      right: ((bbox.right - pad_x) / self.scale).clamp(0.0, max_x),
      bottom: ((bbox.bottom - pad_y) / self.scale).clamp(0.0, max_y),
    }
  }
}

pub fn remap_box(bbox: BoundingBox, transform: &LetterboxTransform) -> BoundingBox {
  transform.remap_box(bbox)
}

/// 等比缩放源图并居中放入画布，空白处填充 `background` 灰度
pub fn letterbox_pack_into(
  src: &Frame,
  canvas: &mut Frame,
  background: u8,
) -> Result<LetterboxTransform, TransformError> {
  if src.format() != canvas.format() {
    return Err(TransformError::UnsupportedConversion {
      from: src.format(),
      to: canvas.format(),
    });
  }

  let transform =
    LetterboxTransform::new(src.width(), src.height(), canvas.width(), canvas.height())?;

  match canvas.format() {
    PixelFormat::Rgb888 | PixelFormat::Bgr888 => canvas.fill(&[background; 3]),
    PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => {
      canvas.fill(&[background, background, background, 255])
    }
    other => return Err(TransformError::UnsupportedFormat(other)),
  }

  resize_region(
    &src.view(),
    &mut canvas.view_mut(),
    (transform.pad_x, transform.pad_y),
    (transform.scaled_width, transform.scaled_height),
    ResizeFilter::Bilinear,
  )?;

  Ok(transform)
}

pub fn letterbox_pack(
  src: &Frame,
  model_width: u32,
  model_height: u32,
  background: u8,
) -> Result<(Frame, LetterboxTransform), TransformError> {
  let mut canvas = Frame::new(model_width, model_height, src.format())?;
  let transform = letterbox_pack_into(src, &mut canvas, background)?;
  Ok((canvas, transform))
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn nv12_solid(width: u32, height: u32, y: u8, u: u8, v: u8) -> Vec<u8> {
    let luma = (width * height) as usize;
    let mut data = vec![y; luma];
    for _ in 0..(luma / 2) / 2 {
      data.push(u);
      data.push(v);
    }
    data
  }

  #[test]
  fn neutral_yuv_is_gray() {
    let src = nv12_solid(4, 4, 128, 128, 128);
    let rgba = convert_colorspace(&src, 4, 4, PixelFormat::Nv12, PixelFormat::Rgba8888).unwrap();
    for px in rgba.chunks_exact(4) {
      assert_eq!(px, &[128, 128, 128, 255]);
    }
  }

  #[test]
  fn saturated_yuv_is_clamped() {
    let src = nv12_solid(2, 2, 255, 0, 255);
    let rgb = convert_colorspace(&src, 2, 2, PixelFormat::Nv12, PixelFormat::Rgb888).unwrap();
    // R = 255 + 1.402 * 127 越界截断，B = 255 - 1.772 * 128 ≈ 28.2
    assert_eq!(rgb[0], 255);
    assert_eq!(rgb[2], 28);
    let src = nv12_solid(2, 2, 0, 0, 0);
    let rgb = convert_colorspace(&src, 2, 2, PixelFormat::Nv12, PixelFormat::Rgb888).unwrap();
    assert_eq!(rgb[0], 0);
    assert_eq!(rgb[2], 0);
  }

  #[test]
  fn nv12_target_is_rejected() {
    let err = convert_colorspace(&[0; 12], 2, 2, PixelFormat::Rgb888, PixelFormat::Nv12).unwrap_err();
    assert_eq!(
      err,
      TransformError::UnsupportedConversion {
        from: PixelFormat::Rgb888,
        to: PixelFormat::Nv12
      }
    );
  }

  #[test]
  fn bgra_swaps_red_and_blue() {
    let out = convert_colorspace(&[10, 20, 30, 40], 1, 1, PixelFormat::Rgba8888, PixelFormat::Bgra8888)
      .unwrap();
    assert_eq!(out, vec![30, 20, 10, 40]);
  }

  #[test]
  fn rotate_90_is_counter_clockwise() {
    // 2x1: [A B] 逆时针旋转后为 1x2: [B; A]
    let src = [1, 1, 1, 2, 2, 2];
    let (out, w, h) = rotate_90(&src, 2, 1, PixelFormat::Rgb888).unwrap();
    assert_eq!((w, h), (1, 2));
    assert_eq!(out, vec![2, 2, 2, 1, 1, 1]);
  }

  #[test]
  fn clockwise_undoes_counter_clockwise() {
    let src: Vec<u8> = (0..(3 * 2 * 4)).map(|v| v as u8).collect();
    let (ccw, w, h) = rotate_90(&src, 3, 2, PixelFormat::Rgba8888).unwrap();
    let (back, w, h) = rotate_90_clockwise(&ccw, w, h, PixelFormat::Rgba8888).unwrap();
    assert_eq!((w, h), (3, 2));
    assert_eq!(back, src);
  }

  #[test]
  fn rgb565_rotation_moves_whole_pixels() {
    let src = [0x12, 0x34, 0x56, 0x78];
    let (out, w, h) = rotate_90(&src, 2, 1, PixelFormat::Rgb565).unwrap();
    assert_eq!((w, h), (1, 2));
    assert_eq!(out, vec![0x56, 0x78, 0x12, 0x34]);
  }

  #[test]
  fn rotation_into_wrong_shape_is_rejected() {
    let src = [0u8; 3 * 2 * 3];
    let src = ImageDesc::new(&src, 3, 2, PixelFormat::Rgb888).unwrap();
    let mut out = [0u8; 3 * 2 * 3];
    let mut dst = ImageDescMut::new(&mut out, 3, 2, PixelFormat::Rgb888).unwrap();
    let err = rotate_into(&src, Rotation::CounterClockwise90, &mut dst).unwrap_err();
    assert!(matches!(err, TransformError::DimensionMismatch { .. }));
  }

  #[test]
  fn bilinear_resize_blends_neighbours() {
    let src = [0, 0, 0, 200, 200, 200];
    let out = resize(&src, 2, 1, 4, 1, PixelFormat::Rgb888, ResizeFilter::Bilinear).unwrap();
    let reds: Vec<u8> = out.chunks_exact(3).map(|px| px[0]).collect();
    assert!(reds.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(reds[1] > 0 && reds[1] < 200);
    assert!(reds[2] > 0 && reds[2] < 200);
    assert!(reds[1] < reds[2]);
  }

  #[test]
  fn nearest_resize_of_uniform_frame_is_uniform() {
    let src = vec![7u8; 4 * 4 * 3];
    let out = resize(&src, 4, 4, 9, 5, PixelFormat::Rgb888, ResizeFilter::Nearest).unwrap();
    assert_eq!(out.len(), 9 * 5 * 3);
    assert!(out.iter().all(|&v| v == 7));
  }

  #[test]
  fn resample_converts_and_scales_in_one_pass() {
    let src = nv12_solid(8, 4, 128, 128, 128);
    let src = ImageDesc::new(&src, 8, 4, PixelFormat::Nv12).unwrap();
    let mut out = vec![0u8; 4 * 2 * 4];
    let mut dst = ImageDescMut::new(&mut out, 4, 2, PixelFormat::Bgra8888).unwrap();
    resample_into(&src, &mut dst, ResizeFilter::Bilinear).unwrap();
    for px in out.chunks_exact(4) {
      assert_eq!(px, &[128, 128, 128, 255]);
    }
  }

  #[test]
  fn resample_scales_into_rgb565() {
    let mut src = Frame::new(4, 4, PixelFormat::Rgba8888).unwrap();
    src.fill(&[255, 0, 0, 255]);
    let mut out = vec![0u8; 2 * 2 * 2];
    let mut dst = ImageDescMut::new(&mut out, 2, 2, PixelFormat::Rgb565).unwrap();
    resample_into(&src.view(), &mut dst, ResizeFilter::Nearest).unwrap();
    for px in out.chunks_exact(2) {
      assert_eq!(u16::from_le_bytes([px[0], px[1]]), 0xf800);
    }
  }

  #[test]
  fn single_pixel_source_remaps_to_origin() {
    assert!(LetterboxTransform::new(0, 10, 640, 640).is_err());
    let t = LetterboxTransform::new(1, 1, 640, 640).unwrap();
    assert_eq!(t.src_size(), (1, 1));
    assert_eq!(t.model_size(), (640, 640));
    let b = t.remap_box(BoundingBox::new(0.0, 0.0, 640.0, 640.0));
    assert_eq!(b, BoundingBox::new(0.0, 0.0, 0.0, 0.0));
  }

  #[test]
  fn letterbox_of_portrait_frame_pads_horizontally() {
    let t = LetterboxTransform::new(480, 640, 640, 640).unwrap();
    assert_eq!(t.scale(), 1.0);
    assert_eq!((t.pad_x(), t.pad_y()), (80, 0));
    let b = t.remap_box(BoundingBox::new(100.0, 100.0, 200.0, 200.0));
    assert_eq!(b, BoundingBox::new(20.0, 100.0, 120.0, 200.0));
  }

  #[test]
  fn letterbox_pack_fills_background_and_centers_image() {
    let mut src = Frame::new(4, 2, PixelFormat::Rgba8888).unwrap();
    src.fill(&[200, 10, 10, 255]);
    let (canvas, t) = letterbox_pack(&src, 8, 8, 114).unwrap();
    assert_eq!(t, LetterboxTransform::new(4, 2, 8, 8).unwrap());
    assert_eq!((t.pad_x(), t.pad_y()), (0, 2));
    assert_eq!(t.scaled_size(), (8, 4));
    assert_eq!(canvas.pixel(0, 0).unwrap(), &[114, 114, 114, 255]);
    assert_eq!(canvas.pixel(3, 3).unwrap(), &[200, 10, 10, 255]);
    assert_eq!(canvas.pixel(7, 7).unwrap(), &[114, 114, 114, 255]);

    let full = t.remap_box(BoundingBox::new(0.0, 0.0, 8.0, 8.0));
    assert_eq!(full, BoundingBox::new(0.0, 0.0, 3.0, 1.0));
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
    assert_eq!(a.iou(&b), 0.0);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
  }

  proptest! {
    #[test]
    fn letterbox_round_trip_recovers_source_rect(
      src_w in 1u32..4096,
      src_h in 1u32..4096,
      model_w in 1u32..1280,
      model_h in 1u32..1280,
    ) {
      let t = LetterboxTransform::new(src_w, src_h, model_w, model_h).unwrap();
      let b = t.remap_box(BoundingBox::new(0.0, 0.0, model_w as f32, model_h as f32));
      prop_assert!(b.left.abs() <= 1.0);
      prop_assert!(b.top.abs() <= 1.0);
      prop_assert!((b.right - src_w as f32).abs() <= 1.0);
      prop_assert!((b.bottom - src_h as f32).abs() <= 1.0);
    }

    #[test]
    fn four_rotations_are_identity(
      (w, h, data) in (1u32..12, 1u32..12).prop_flat_map(|(w, h)| {
        (Just(w), Just(h), proptest::collection::vec(any::<u8>(), (w * h * 4) as usize))
      })
    ) {
      let (mut cur, mut cw, mut ch) = (data.clone(), w, h);
      for _ in 0..4 {
        let (next, nw, nh) = rotate_90(&cur, cw, ch, PixelFormat::Rgba8888).unwrap();
        cur = next;
        cw = nw;
        ch = nh;
      }
      prop_assert_eq!((cw, ch), (w, h));
      prop_assert_eq!(cur, data);
    }

    #[test]
    fn converted_channels_stay_in_range(y in any::<u8>(), u in any::<u8>(), v in any::<u8>()) {
      let src = nv12_solid(2, 2, y, u, v);
      let rgba = convert_colorspace(&src, 2, 2, PixelFormat::Nv12, PixelFormat::Rgba8888).unwrap();
      let [r, g, b] = yuv_to_rgb(y, u, v);
      prop_assert_eq!(&rgba[..4], &[r, g, b, 255]);
    }
  }
}
