// 该文件是 Shanan （山南西风） 项目的一部分。
// src/capture.rs - 采集设备抽象
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

#[cfg(feature = "v4l2_capture")]
mod v4l2;

#[cfg(feature = "v4l2_capture")]
pub use v4l2::{V4l2Capture, V4l2CaptureError};

use crate::frame::PixelFormat;

/// 单个缓冲最多的平面数
pub const MAX_PLANES: usize = 3;

/// 采集格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
  pub width: u32,
  pub height: u32,
  pub pixel_format: PixelFormat,
  pub fps: u32,
  /// 驱动报告的行字节数，0 表示行间没有填充
  pub bytes_per_line: u32,
}

impl Default for CaptureFormat {
  fn default() -> Self {
    Self {
      width: 640,
      height: 480,
      pixel_format: PixelFormat::Nv12,
      fps: 60,
      bytes_per_line: 0,
    }
  }
}

impl CaptureFormat {
  /// 一帧所需的最少字节数
  pub fn frame_size(&self) -> usize {
    self.pixel_format.frame_size(self.width, self.height)
  }

  /// 有效像素占用的行字节数
  pub fn row_bytes(&self) -> usize {
    self.pixel_format.row_bytes(self.width)
  }

  /// 缓冲中相邻两行的间距
  pub fn row_stride(&self) -> usize {
    (self.bytes_per_line as usize).max(self.row_bytes())
  }

  pub fn is_padded(&self) -> bool {
    self.row_stride() > self.row_bytes()
  }

  /// 所有平面的行数之和，NV12 的 UV 平面占亮度行数的一半
  pub fn rows(&self) -> usize {
    let height = self.height as usize;
    match self.pixel_format {
      PixelFormat::Nv12 => height + height.div_ceil(2),
      _ => height,
    }
  }
}

/// 一个已填充缓冲的各平面内容
///
/// 单平面 NV12 的 Y 与 UV 在同一平面中连续存放。
#[derive(Debug, Clone, Copy)]
pub struct Planes<'a> {
  planes: [&'a [u8]; MAX_PLANES],
  count: usize,
}

impl<'a> Planes<'a> {
  pub fn single(data: &'a [u8]) -> Self {
    Self {
      planes: [data, &[], &[]],
      count: 1,
    }
  }

  /// 超过 `MAX_PLANES` 的平面被忽略
  pub fn from_slices(slices: &[&'a [u8]]) -> Self {
    let mut planes: [&'a [u8]; MAX_PLANES] = [&[]; MAX_PLANES];
    let count = slices.len().min(MAX_PLANES);
    planes[..count].copy_from_slice(&slices[..count]);
    Self { planes, count }
  }

  pub fn len(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  pub fn get(&self, index: usize) -> Option<&'a [u8]> {
    if index < self.count {
      Some(self.planes[index])
    } else {
      None
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
    self.planes[..self.count].iter().copied()
  }

  /// 所有平面的字节总数
  pub fn total_len(&self) -> usize {
    self.iter().map(<[u8]>::len).sum()
  }
}

/// 摄像头驱动的最小接口
///
/// 缓冲在 `start` 之后全部归设备所有；`dequeue` 阻塞直到有缓冲填充完成，
/// 返回的平面借用设备内存，在 `enqueue` 同一下标之前必须拷出。
pub trait CaptureDevice {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 协商格式，返回设备实际采用的格式
  fn configure(&mut self, format: &CaptureFormat) -> Result<CaptureFormat, Self::Error>;

  fn start(&mut self) -> Result<(), Self::Error>;

  /// 缓冲数量，启动后不变
  fn depth(&self) -> usize;

  fn dequeue(&mut self) -> Result<(usize, Planes<'_>), Self::Error>;

  fn enqueue(&mut self, index: usize) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn planes_keep_order_and_total_length() {
    let y = [0u8; 8];
    let uv = [1u8; 4];
    let planes = Planes::from_slices(&[&y, &uv]);
    assert_eq!(planes.len(), 2);
    assert_eq!(planes.get(1), Some(&uv[..]));
    assert_eq!(planes.get(2), None);
    assert_eq!(planes.total_len(), 12);
  }

  #[test]
  fn default_format_is_vga_nv12() {
    let format = CaptureFormat::default();
    assert_eq!(format.pixel_format, PixelFormat::Nv12);
    assert_eq!(format.frame_size(), 640 * 480 * 3 / 2);
  }

  #[test]
  fn padded_rows_are_detected() {
    let mut format = CaptureFormat::default();
    assert!(!format.is_padded());
    assert_eq!(format.row_stride(), 640);
    assert_eq!(format.rows(), 720);

    format.bytes_per_line = 704;
    assert!(format.is_padded());
    assert_eq!(format.row_stride(), 704);
    assert_eq!(format.row_bytes(), 640);
  }
}
