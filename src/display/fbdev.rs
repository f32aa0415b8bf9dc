// 该文件是 Shanan （山南西风） 项目的一部分。
// src/display/fbdev.rs - Linux framebuffer 显示
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

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use memmap2::{MmapMut, MmapOptions};
use nix::libc::c_ulong;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{DisplayGeometry, DisplaySurface};
use crate::{FromUrl, FromUrlWithScheme, frame::PixelFormat};

const DEFAULT_FRAMEBUFFER: &str = "/dev/fb0";

const FBIOGET_VSCREENINFO: u32 = 0x4600;
const FBIOGET_FSCREENINFO: u32 = 0x4602;

#[derive(Error, Debug)]
pub enum FbDisplayError {
  #[error("URI scheme 不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("无法访问 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("{request} 失败: {source}")]
  Ioctl {
    request: &'static str,
    source: nix::Error,
  },
  #[error("不支持的色深: {0} bpp")]
  UnsupportedDepth(u32),
  #[error("framebuffer 几何无效: {0}")]
  InvalidGeometry(String),
}

/// `struct fb_bitfield`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code)]
struct FbBitfield {
  offset: u32,
  length: u32,
  msb_right: u32,
}

/// `struct fb_var_screeninfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code)]
struct FbVarScreeninfo {
  xres: u32,
  yres: u32,
  xres_virtual: u32,
  yres_virtual: u32,
  xoffset: u32,
  yoffset: u32,
  bits_per_pixel: u32,
  grayscale: u32,
  red: FbBitfield,
  green: FbBitfield,
  blue: FbBitfield,
  transp: FbBitfield,
  nonstd: u32,
  activate: u32,
  height: u32,
  width: u32,
  accel_flags: u32,
  pixclock: u32,
  left_margin: u32,
  right_margin: u32,
  upper_margin: u32,
  lower_margin: u32,
  hsync_len: u32,
  vsync_len: u32,
  sync: u32,
  vmode: u32,
  rotate: u32,
  colorspace: u32,
  reserved: [u32; 4],
}

/// `struct fb_fix_screeninfo`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
#[allow(dead_code)]
struct FbFixScreeninfo {
  id: [u8; 16],
  smem_start: c_ulong,
  smem_len: u32,
  type_: u32,
  type_aux: u32,
  visual: u32,
  xpanstep: u16,
  ypanstep: u16,
  ywrapstep: u16,
  line_length: u32,
  mmio_start: c_ulong,
  mmio_len: u32,
  accel: u32,
  capabilities: u16,
  reserved: [u16; 2],
}

nix::ioctl_read_bad!(fbioget_vscreeninfo, FBIOGET_VSCREENINFO, FbVarScreeninfo);
nix::ioctl_read_bad!(fbioget_fscreeninfo, FBIOGET_FSCREENINFO, FbFixScreeninfo);

/// 驱动报告的可见区域
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScreenLayout {
  geometry: DisplayGeometry,
  /// 可见区域在显存中的起始偏移，双缓冲平移后不为 0
  offset: usize,
}

impl ScreenLayout {
  fn map_len(&self) -> usize {
    self.offset + self.geometry.stride * self.geometry.height as usize
  }
}

/// 映射到进程内存的 framebuffer，释放时解除映射
pub struct FbDisplay {
  map: MmapMut,
  layout: ScreenLayout,
  path: String,
  _file: File,
}

impl FromUrl for FbDisplay {
  type Error = FbDisplayError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme 不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FbDisplayError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    // fb:///dev/fb0
    let path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_FRAMEBUFFER
    } else {
      url.path()
    };
    Self::open(path)
  }
}

impl FromUrlWithScheme for FbDisplay {
  const SCHEME: &'static str = "fb";
}

impl FbDisplay {
  pub fn open(path: &str) -> Result<Self, FbDisplayError> {
    let io_err = |source| FbDisplayError::Io {
      path: path.to_string(),
      source,
    };
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .open(path)
      .map_err(io_err)?;

    let mut var = FbVarScreeninfo::default();
    let mut fix = FbFixScreeninfo::default();
    let result = unsafe { fbioget_vscreeninfo(file.as_raw_fd(), &mut var) };
    result.map_err(|source| FbDisplayError::Ioctl {
      request: "FBIOGET_VSCREENINFO",
      source,
    })?;
    let result = unsafe { fbioget_fscreeninfo(file.as_raw_fd(), &mut fix) };
    result.map_err(|source| FbDisplayError::Ioctl {
      request: "FBIOGET_FSCREENINFO",
      source,
    })?;
    debug!(
      "framebuffer 虚拟分辨率 {}x{}, 偏移 ({}, {}), 显存 {} 字节",
      var.xres_virtual, var.yres_virtual, var.xoffset, var.yoffset, fix.smem_len
    );

    let layout = screen_layout(&var, &fix)?;
    let geometry = layout.geometry;

    // 字符设备的文件长度为 0，必须显式给出映射长度
    let map = unsafe { MmapOptions::new().len(layout.map_len()).map_mut(&file) }.map_err(io_err)?;

    info!(
      "打开显示 {}: {}x{}, 行宽 {} 字节, {:?}",
      path, geometry.width, geometry.height, geometry.stride, geometry.format
    );

    Ok(Self {
      map,
      layout,
      path: path.to_string(),
      _file: file,
    })
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

impl DisplaySurface for FbDisplay {
  fn geometry(&self) -> DisplayGeometry {
    self.layout.geometry
  }

  fn memory(&mut self) -> &mut [u8] {
    &mut self.map[self.layout.offset..]
  }
}

/// 由位深和红色分量的位置确定内存字节序
fn format_for_depth(bits_per_pixel: u32, red_offset: u32) -> Result<PixelFormat, FbDisplayError> {
  match (bits_per_pixel, red_offset) {
    // 小端 ARGB8888，内存中为 B G R A
    (32, 0) => Ok(PixelFormat::Rgba8888),
    (32, _) => Ok(PixelFormat::Bgra8888),
    (24, 0) => Ok(PixelFormat::Rgb888),
    (24, _) => Ok(PixelFormat::Bgr888),
    (16, _) => Ok(PixelFormat::Rgb565),
    (other, _) => Err(FbDisplayError::UnsupportedDepth(other)),
  }
}

/// 可见分辨率取 `xres`/`yres`，虚拟分辨率可能是它的数倍
fn screen_layout(
  var: &FbVarScreeninfo,
  fix: &FbFixScreeninfo,
) -> Result<ScreenLayout, FbDisplayError> {
  let format = format_for_depth(var.bits_per_pixel, var.red.offset)?;
  let (width, height) = (var.xres, var.yres);
  if width == 0 || height == 0 {
    return Err(FbDisplayError::InvalidGeometry(format!(
      "可见分辨率 {}x{}",
      width, height
    )));
  }

  let row_bytes = format.row_bytes(width);
  let stride = match fix.line_length as usize {
    0 => row_bytes,
    stride => stride,
  };
  if stride < row_bytes {
    return Err(FbDisplayError::InvalidGeometry(format!(
      "行宽 {} 字节小于一行像素 {} 字节",
      stride, row_bytes
    )));
  }

  let bytes_per_pixel = format.bytes_per_pixel().unwrap_or(1);
  let offset = var.yoffset as usize * stride + var.xoffset as usize * bytes_per_pixel;
  let layout = ScreenLayout {
    geometry: DisplayGeometry {
      width,
      height,
      stride,
      format,
    },
    offset,
  };

  if fix.smem_len != 0 && layout.map_len() > fix.smem_len as usize {
    return Err(FbDisplayError::InvalidGeometry(format!(
      "可见区域需要 {} 字节, 显存只有 {} 字节",
      layout.map_len(),
      fix.smem_len
    )));
  }

  info!(
    "framebuffer 几何: {}x{}, {} bpp, 行宽 {} 字节",
    width, height, var.bits_per_pixel, stride
  );
  Ok(layout)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn portrait_panel() -> (FbVarScreeninfo, FbFixScreeninfo) {
    let var = FbVarScreeninfo {
      xres: 1080,
      yres: 1920,
      xres_virtual: 1080,
      // 双缓冲驱动报告两倍高度
      yres_virtual: 3840,
      bits_per_pixel: 32,
      red: FbBitfield {
        offset: 16,
        length: 8,
        msb_right: 0,
      },
      ..Default::default()
    };
    let fix = FbFixScreeninfo {
      line_length: 4352,
      smem_len: 4352 * 3840,
      ..Default::default()
    };
    (var, fix)
  }

  #[test]
  fn screeninfo_structs_match_kernel_layout() {
    assert_eq!(std::mem::size_of::<FbVarScreeninfo>(), 160);
    assert_eq!(
      std::mem::size_of::<FbFixScreeninfo>(),
      if cfg!(target_pointer_width = "64") { 80 } else { 68 }
    );
  }

  #[test]
  fn depth_maps_to_memory_order() {
    assert_eq!(format_for_depth(32, 16).unwrap(), PixelFormat::Bgra8888);
    assert_eq!(format_for_depth(32, 0).unwrap(), PixelFormat::Rgba8888);
    assert_eq!(format_for_depth(24, 16).unwrap(), PixelFormat::Bgr888);
    assert_eq!(format_for_depth(16, 11).unwrap(), PixelFormat::Rgb565);
    assert!(matches!(
      format_for_depth(8, 0),
      Err(FbDisplayError::UnsupportedDepth(8))
    ));
  }

  #[test]
  fn visible_resolution_ignores_virtual_height() {
    let (var, fix) = portrait_panel();
    let layout = screen_layout(&var, &fix).unwrap();
    assert_eq!(
      layout.geometry,
      DisplayGeometry {
        width: 1080,
        height: 1920,
        stride: 4352,
        format: PixelFormat::Bgra8888,
      }
    );
    assert_eq!(layout.offset, 0);
    assert_eq!(layout.map_len(), 4352 * 1920);
  }

  #[test]
  fn panned_buffer_starts_at_offset() {
    let (mut var, fix) = portrait_panel();
    var.yoffset = 1920;
    let layout = screen_layout(&var, &fix).unwrap();
    assert_eq!(layout.offset, 4352 * 1920);
    assert_eq!(layout.map_len(), 4352 * 3840);

    var.yoffset = 1921;
    assert!(matches!(
      screen_layout(&var, &fix),
      Err(FbDisplayError::InvalidGeometry(_))
    ));
  }

  #[test]
  fn missing_line_length_falls_back_to_packed_rows() {
    let (var, mut fix) = portrait_panel();
    fix.line_length = 0;
    let layout = screen_layout(&var, &fix).unwrap();
    assert_eq!(layout.geometry.stride, 1080 * 4);
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      FbDisplay::from_url(&url),
      Err(FbDisplayError::SchemeMismatch { .. })
    ));
  }
}
