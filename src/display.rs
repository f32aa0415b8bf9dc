// 该文件是 Shanan （山南西风） 项目的一部分。
// src/display.rs - 显示合成
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

#[cfg(feature = "fbdev_display")]
mod fbdev;

#[cfg(feature = "fbdev_display")]
pub use fbdev::{FbDisplay, FbDisplayError};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  accel::Accelerator,
  frame::{Frame, FrameError, PixelFormat},
};

/// 显示设备的固定几何，启动后不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
  pub width: u32,
  pub height: u32,
  /// 每行字节数，可能大于 `width * bpp`
  pub stride: usize,
  pub format: PixelFormat,
}

impl DisplayGeometry {
  /// 紧凑排列时一行的字节数
  pub fn row_bytes(&self) -> usize {
    self.format.row_bytes(self.width)
  }

  /// 显存至少需要的字节数
  pub fn required_len(&self) -> usize {
    match self.height {
      0 => 0,
      h => self.stride * (h as usize - 1) + self.row_bytes(),
    }
  }
}

/// 只写的映射显存
pub trait DisplaySurface {
  fn geometry(&self) -> DisplayGeometry;

  fn memory(&mut self) -> &mut [u8];
}

#[derive(Error, Debug)]
pub enum DisplayError {
  #[error("加速器转换失败: {0}")]
  Accelerator(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("显示格式 {0:?} 不受支持")]
  UnsupportedFormat(PixelFormat),
  #[error("显示行宽 {stride} 小于一行像素所需的 {row_bytes} 字节")]
  InvalidStride { stride: usize, row_bytes: usize },
  #[error("显存过小: 需要 {needed} 字节, 实际 {actual} 字节")]
  ShortMemory { needed: usize, actual: usize },
  #[error("显示设备几何与合成器不一致: {expected:?} / {actual:?}")]
  GeometryMismatch {
    expected: DisplayGeometry,
    actual: DisplayGeometry,
  },
  #[error("暂存帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 把标注后的帧转换到显示格式并写入显存
///
/// 单缓冲，不等待垂直同步。
pub struct Compositor {
  geometry: DisplayGeometry,
  staging: Frame,
}

impl Compositor {
  pub fn new(geometry: DisplayGeometry) -> Result<Self, DisplayError> {
    if !geometry.format.is_packed() {
      return Err(DisplayError::UnsupportedFormat(geometry.format));
    }
    if geometry.stride < geometry.row_bytes() {
      return Err(DisplayError::InvalidStride {
        stride: geometry.stride,
        row_bytes: geometry.row_bytes(),
      });
    }

    let staging = Frame::new(geometry.width, geometry.height, geometry.format)?;
    Ok(Self { geometry, staging })
  }

  pub fn geometry(&self) -> DisplayGeometry {
    self.geometry
  }

  /// 最近一次写入显存的内容
  pub fn staging(&self) -> &Frame {
    &self.staging
  }

  /// 清屏为黑色
  pub fn clear<S: DisplaySurface>(&self, surface: &mut S) {
    surface.memory().fill(0);
    info!(
      "清空显示: {}x{} {:?}",
      self.geometry.width, self.geometry.height, self.geometry.format
    );
  }

  pub fn present<A: Accelerator, S: DisplaySurface>(
    &mut self,
    accel: &A,
    frame: &Frame,
    surface: &mut S,
  ) -> Result<(), DisplayError> {
    let actual = surface.geometry();
    if actual != self.geometry {
      return Err(DisplayError::GeometryMismatch {
        expected: self.geometry,
        actual,
      });
    }

    accel
      .convert_or_resize(&frame.view(), &mut self.staging.view_mut())
      .map_err(|e| DisplayError::Accelerator(Box::new(e)))?;

    self.blit(surface.memory())
  }

  fn blit(&self, memory: &mut [u8]) -> Result<(), DisplayError> {
    let needed = self.geometry.required_len();
    if memory.len() < needed {
      return Err(DisplayError::ShortMemory {
        needed,
        actual: memory.len(),
      });
    }

    let row = self.geometry.row_bytes();
    let src = self.staging.as_bytes();
    if self.geometry.stride == row {
      memory[..src.len()].copy_from_slice(src);
    } else {
      for (dst, line) in memory
        .chunks_mut(self.geometry.stride)
        .zip(src.chunks_exact(row))
      {
        dst[..row].copy_from_slice(line);
      }
    }
    debug!("写入显存 {} 字节", src.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::accel::CpuAccelerator;

  struct Memory {
    geometry: DisplayGeometry,
    data: Vec<u8>,
  }

  impl DisplaySurface for Memory {
    fn geometry(&self) -> DisplayGeometry {
      self.geometry
    }

    fn memory(&mut self) -> &mut [u8] {
      &mut self.data
    }
  }

  fn geometry(stride: usize) -> DisplayGeometry {
    DisplayGeometry {
      width: 2,
      height: 2,
      stride,
      format: PixelFormat::Bgra8888,
    }
  }

  #[test]
  fn present_converts_and_respects_stride() {
    let mut surface = Memory {
      geometry: geometry(12),
      data: vec![0xaa; 24],
    };
    let mut compositor = Compositor::new(surface.geometry).unwrap();
    compositor.clear(&mut surface);
    assert!(surface.data.iter().all(|&b| b == 0));

    let mut frame = Frame::new(2, 2, PixelFormat::Rgba8888).unwrap();
    frame.fill(&[1, 2, 3, 255]);
    compositor
      .present(&CpuAccelerator::new(), &frame, &mut surface)
      .unwrap();

    assert_eq!(&surface.data[0..8], &[3, 2, 1, 255, 3, 2, 1, 255]);
    // 行尾填充不被写入
    assert_eq!(&surface.data[8..12], &[0, 0, 0, 0]);
    assert_eq!(&surface.data[12..20], &[3, 2, 1, 255, 3, 2, 1, 255]);
  }

  #[test]
  fn present_scales_to_display_size() {
    let mut surface = Memory {
      geometry: geometry(8),
      data: vec![0; 16],
    };
    let mut compositor = Compositor::new(surface.geometry).unwrap();
    let mut frame = Frame::new(4, 4, PixelFormat::Rgba8888).unwrap();
    frame.fill(&[9, 9, 9, 255]);
    compositor
      .present(&CpuAccelerator::new(), &frame, &mut surface)
      .unwrap();
    assert!(surface.data.chunks_exact(4).all(|px| px == [9, 9, 9, 255]));
  }

  #[test]
  fn short_memory_is_rejected() {
    let mut surface = Memory {
      geometry: geometry(8),
      data: vec![0; 10],
    };
    let mut compositor = Compositor::new(surface.geometry).unwrap();
    let frame = Frame::new(2, 2, PixelFormat::Rgba8888).unwrap();
    assert!(matches!(
      compositor.present(&CpuAccelerator::new(), &frame, &mut surface),
      Err(DisplayError::ShortMemory { needed: 16, actual: 10 })
    ));
  }

  #[test]
  fn narrow_stride_is_rejected() {
    assert!(matches!(
      Compositor::new(geometry(4)),
      Err(DisplayError::InvalidStride { .. })
    ));
  }
}
