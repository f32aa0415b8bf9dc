// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 帧与像素格式定义
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

use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("图像尺寸无效: {width}x{height} ({format:?})")]
  InvalidDimensions {
    width: u32,
    height: u32,
    format: PixelFormat,
  },
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
  /// YUV 4:2:0 半平面：Y 平面之后紧跟 UV 交错平面
  Nv12,
  Rgb888,
  Bgr888,
  Rgba8888,
  /// 32 位 framebuffer 常见的内存字节序
  Bgra8888,
  Rgb565,
}

impl PixelFormat {
  /// 打包格式每像素字节数，平面格式返回 `None`
  pub fn bytes_per_pixel(&self) -> Option<usize> {
    match self {
      PixelFormat::Nv12 => None,
      PixelFormat::Rgb888 | PixelFormat::Bgr888 => Some(3),
      PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => Some(4),
      PixelFormat::Rgb565 => Some(2),
    }
  }

  pub fn is_packed(&self) -> bool {
    self.bytes_per_pixel().is_some()
  }

  /// 第一平面的行字节数
  pub fn row_bytes(&self, width: u32) -> usize {
    match self.bytes_per_pixel() {
      Some(bpp) => width as usize * bpp,
      None => width as usize,
    }
  }

  /// 紧凑排列时整帧的字节数
  pub fn frame_size(&self, width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    match self.bytes_per_pixel() {
      Some(bpp) => w * h * bpp,
      // UV 平面按行宽存储，行数为亮度行数的一半（向上取整）
      None => w * h + w * h.div_ceil(2),
    }
  }

  /// 检查尺寸对该格式是否有效
  pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), FrameError> {
    let odd_chroma = matches!(self, PixelFormat::Nv12) && width % 2 != 0;
    if width == 0 || height == 0 || odd_chroma {
      return Err(FrameError::InvalidDimensions {
        width,
        height,
        format: *self,
      });
    }
    Ok(())
  }

  pub fn fourcc(&self) -> [u8; 4] {
    match self {
      PixelFormat::Nv12 => *b"NV12",
      PixelFormat::Rgb888 => *b"RGB3",
      PixelFormat::Bgr888 => *b"BGR3",
      PixelFormat::Rgba8888 => *b"AB24",
      PixelFormat::Bgra8888 => *b"AR24",
      PixelFormat::Rgb565 => *b"RGBP",
    }
  }

  pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
    match fourcc {
      b"NV12" => Some(PixelFormat::Nv12),
      b"RGB3" => Some(PixelFormat::Rgb888),
      b"BGR3" => Some(PixelFormat::Bgr888),
      b"AB24" => Some(PixelFormat::Rgba8888),
      b"AR24" => Some(PixelFormat::Bgra8888),
      b"RGBP" => Some(PixelFormat::Rgb565),
      _ => None,
    }
  }
}

/// 只读图像描述：内存、宽、高、像素格式
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc<'a> {
  pub data: &'a [u8],
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
}

/// 可写图像描述
#[derive(Debug)]
pub struct ImageDescMut<'a> {
  pub data: &'a mut [u8],
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
}

impl<'a> ImageDesc<'a> {
  pub fn new(
    data: &'a [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    check_buffer(data.len(), width, height, format)?;
    Ok(Self {
      data,
      width,
      height,
      format,
    })
  }
}

impl<'a> ImageDescMut<'a> {
  pub fn new(
    data: &'a mut [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Self, FrameError> {
    check_buffer(data.len(), width, height, format)?;
    Ok(Self {
      data,
      width,
      height,
      format,
    })
  }
}

fn check_buffer(len: usize, width: u32, height: u32, format: PixelFormat) -> Result<(), FrameError> {
  format.check_dimensions(width, height)?;
  let expected = format.frame_size(width, height);
  if len < expected {
    return Err(FrameError::SizeMismatch {
      expected,
      actual: len,
    });
  }
  Ok(())
}

/// 流水线私有的整帧图像，紧凑排列（stride 等于行字节数）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Vec<u8>,
}

impl Frame {
  /// 分配一帧全零图像
  pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self, FrameError> {
    format.check_dimensions(width, height)?;
    Ok(Self {
      width,
      height,
      format,
      data: vec![0u8; format.frame_size(width, height)],
    })
  }

  pub fn from_raw(
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    format.check_dimensions(width, height)?;
    let expected = format.frame_size(width, height);
    if data.len() != expected {
      return Err(FrameError::SizeMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      width,
      height,
      format,
      data,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn stride(&self) -> usize {
    self.format.row_bytes(self.width)
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  pub fn as_bytes_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }

  pub fn into_raw(self) -> Vec<u8> {
    self.data
  }

  /// 打包格式下 `(x, y)` 处像素的字节
  pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
    let bpp = self.format.bytes_per_pixel()?;
    if x >= self.width || y >= self.height {
      return None;
    }
    let offset = y as usize * self.stride() + x as usize * bpp;
    self.data.get(offset..offset + bpp)
  }

  /// 用同一像素值填满打包格式的帧
  pub fn fill(&mut self, pixel: &[u8]) {
    if let Some(bpp) = self.format.bytes_per_pixel()
      && pixel.len() == bpp
    {
      for chunk in self.data.chunks_exact_mut(bpp) {
        chunk.copy_from_slice(pixel);
      }
    }
  }

  pub fn view(&self) -> ImageDesc<'_> {
    ImageDesc {
      data: &self.data,
      width: self.width,
      height: self.height,
      format: self.format,
    }
  }

  pub fn view_mut(&mut self) -> ImageDescMut<'_> {
    ImageDescMut {
      data: &mut self.data,
      width: self.width,
      height: self.height,
      format: self.format,
    }
  }
}

/// 推理张量的排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorFormat {
  Nhwc,
  Nchw,
}

/// 推理张量的元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
  UInt8,
}

pub trait FrameFormat {
  fn tensor_format(&self) -> TensorFormat;
  fn tensor_type(&self) -> TensorType;
}

pub trait AsNhwcFrame {
  fn as_nhwc(&self) -> &[u8];
}

/// 模型输入张量：NHWC 排布、RGB 通道顺序、u8 元素
#[derive(Debug, Clone)]
pub struct RgbNhwcFrame {
  width: usize,
  height: usize,
  data: Box<[u8]>,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    let size = RGB_CHANNELS * width * height;
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 从同尺寸的打包 RGB 类帧填充张量，丢弃 alpha 并统一为 RGB 顺序
  pub fn fill_from(&mut self, frame: &Frame) -> Result<(), FrameError> {
    if frame.width() as usize != self.width || frame.height() as usize != self.height {
      return Err(FrameError::SizeMismatch {
        expected: self.data.len(),
        actual: frame.format().frame_size(frame.width(), frame.height()),
      });
    }

    let src = frame.as_bytes();
    match frame.format() {
      PixelFormat::Rgb888 => self.data.copy_from_slice(src),
      PixelFormat::Rgba8888 => {
        for (dst, px) in self.data.chunks_exact_mut(3).zip(src.chunks_exact(4)) {
          dst.copy_from_slice(&px[..3]);
        }
      }
      PixelFormat::Bgr888 | PixelFormat::Bgra8888 => {
        let bpp = frame.format().bytes_per_pixel().unwrap_or(3);
        for (dst, px) in self.data.chunks_exact_mut(3).zip(src.chunks_exact(bpp)) {
          dst[0] = px[2];
          dst[1] = px[1];
          dst[2] = px[0];
        }
      }
      format @ (PixelFormat::Nv12 | PixelFormat::Rgb565) => {
        return Err(FrameError::InvalidDimensions {
          width: frame.width(),
          height: frame.height(),
          format,
        });
      }
    }
    Ok(())
  }
}

impl FrameFormat for RgbNhwcFrame {
  fn tensor_format(&self) -> TensorFormat {
    TensorFormat::Nhwc
  }

  fn tensor_type(&self) -> TensorType {
    TensorType::UInt8
  }
}

impl AsNhwcFrame for RgbNhwcFrame {
  fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}
