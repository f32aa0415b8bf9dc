// 该文件是 Shanan （山南西风） 项目的一部分。
// src/capture/v4l2.rs - V4L2 摄像头采集
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

mod sys;

use std::os::fd::RawFd;

use memmap2::{Mmap, MmapOptions};
use nix::errno::Errno;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::framesize::FrameSizeEnum;
use v4l::prelude::*;
use v4l::video::Capture;

use self::sys::{
  Buffer, BufferM, CaptureParm, FmtDesc, Format, FormatUnion, Fract, Plane, RequestBuffers,
  StreamParm, StreamParmUnion, VIDEO_MAX_PLANES, Zeroed,
};
use super::{CaptureDevice, CaptureFormat, MAX_PLANES, Planes};
use crate::{FromUrl, FromUrlWithScheme, frame::PixelFormat};

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum V4l2CaptureError {
  #[error("URI scheme 不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("无法打开设备 {path}: {source}")]
  Open {
    path: String,
    source: std::io::Error,
  },
  #[error("V4L2 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("{request} 失败: {source}")]
  Ioctl {
    request: &'static str,
    source: nix::Error,
  },
  #[error("设备不支持流式视频采集 (capabilities {0:#010x})")]
  NotCaptureDevice(u32),
  #[error("设备协商出不支持的像素格式: {0}")]
  UnsupportedFormat(String),
  #[error("驱动没有分配任何缓冲")]
  NoBuffers,
  #[error("采集流尚未启动")]
  NotStarted,
  #[error("采集流已启动，无法重新配置")]
  AlreadyStreaming,
  #[error("缓冲下标 {index} 越界（共 {count} 个）")]
  BadIndex { index: usize, count: usize },
  #[error("缓冲 {0} 已在驱动队列中")]
  AlreadyQueued(usize),
}

fn ioctl_error(request: &'static str) -> impl FnOnce(nix::Error) -> V4l2CaptureError {
  move |source| V4l2CaptureError::Ioctl { request, source }
}

/// 一个 mmap 缓冲的全部平面
struct MappedBuffer {
  planes: Vec<Mmap>,
  /// 是否在驱动队列中
  queued: bool,
}

/// V4L2 mmap 采集，驱动支持时使用多平面接口
///
/// 设备用 v4l 打开并查询能力，缓冲的申请、映射与出入队直接通过 ioctl 完成，
/// 出队得到的下标就是驱动填充的缓冲。
pub struct V4l2Capture {
  // 先于 device 释放，解除映射后再关闭设备
  buffers: Vec<MappedBuffer>,
  device: Device,
  fd: RawFd,
  buf_type: u32,
  num_planes: usize,
  path: String,
  depth: usize,
  streaming: bool,
}

impl FromUrl for V4l2Capture {
  type Error = V4l2CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme 不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2CaptureError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    // v4l2:///dev/video0
    let path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let depth = url
      .query_pairs()
      .find(|(k, _)| k == "buffers")
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .unwrap_or(DEFAULT_DEPTH);

    Self::open(&path, depth)
  }
}

impl FromUrlWithScheme for V4l2Capture {
  const SCHEME: &'static str = "v4l2";
}

impl V4l2Capture {
  pub fn open(path: &str, depth: usize) -> Result<Self, V4l2CaptureError> {
    let device = Device::with_path(path).map_err(|source| V4l2CaptureError::Open {
      path: path.to_string(),
      source,
    })?;

    let caps = device.query_caps()?;
    let bits = caps.capabilities.bits();
    info!("打开摄像头 {}: {} ({})", path, caps.card, caps.driver);

    let buf_type = match sys::buffer_type_for(bits) {
      Some(buf_type) if bits & sys::CAP_STREAMING != 0 => buf_type,
      _ => return Err(V4l2CaptureError::NotCaptureDevice(bits)),
    };
    info!(
      "使用{}采集接口",
      if buf_type == sys::BUF_TYPE_VIDEO_CAPTURE_MPLANE {
        "多平面"
      } else {
        "单平面"
      }
    );

    let fd = device.handle().fd();
    Ok(Self {
      buffers: Vec::new(),
      device,
      fd,
      buf_type,
      num_planes: 1,
      path: path.to_string(),
      depth: depth.max(1),
      streaming: false,
    })
  }

  pub fn path(&self) -> &str {
    &self.path
  }

  fn is_multi_planar(&self) -> bool {
    self.buf_type == sys::BUF_TYPE_VIDEO_CAPTURE_MPLANE
  }

  /// 打印设备支持的格式、分辨率与帧间隔
  pub fn log_capabilities(&self) -> Result<(), V4l2CaptureError> {
    for index in 0.. {
      let mut desc = FmtDesc::zeroed();
      desc.index = index;
      desc.type_ = self.buf_type;
      match unsafe { sys::vidioc_enum_fmt(self.fd, &mut desc) } {
        Ok(_) => {}
        Err(Errno::EINVAL) => break,
        Err(e) => return Err(ioctl_error("VIDIOC_ENUM_FMT")(e)),
      }

      let fourcc = FourCC::new(&desc.pixelformat.to_le_bytes());
      info!("支持的格式: {} ({})", fourcc, sys::description(&desc));
      for size in self.device.enum_framesizes(fourcc)? {
        match size.size {
          FrameSizeEnum::Discrete(d) => {
            info!("  分辨率: {}x{}", d.width, d.height);
            for interval in self
              .device
              .enum_frameintervals(fourcc, d.width, d.height)?
            {
              debug!("    帧间隔: {:?}", interval.interval);
            }
          }
          FrameSizeEnum::Stepwise(s) => {
            info!(
              "  分辨率: {}x{} - {}x{}, 步长 {}x{}",
              s.min_width, s.min_height, s.max_width, s.max_height, s.step_width, s.step_height
            );
          }
        }
      }
    }
    Ok(())
  }

  /// 设置分辨率与像素格式，返回 `(宽, 高, fourcc, 行字节数)`
  fn set_format(&mut self, format: &CaptureFormat) -> Result<(u32, u32, u32, u32), V4l2CaptureError> {
    let mut fmt = Format::zeroed();
    fmt.type_ = self.buf_type;
    unsafe { sys::vidioc_g_fmt(self.fd, &mut fmt).map_err(ioctl_error("VIDIOC_G_FMT"))? };

    let pixelformat = u32::from_le_bytes(format.pixel_format.fourcc());
    if self.is_multi_planar() {
      let mut mp = unsafe { fmt.fmt.pix_mp };
      mp.width = format.width;
      mp.height = format.height;
      mp.pixelformat = pixelformat;
      mp.field = sys::FIELD_ANY;
      fmt.fmt = FormatUnion { pix_mp: mp };
    } else {
      let mut pix = unsafe { fmt.fmt.pix };
      pix.width = format.width;
      pix.height = format.height;
      pix.pixelformat = pixelformat;
      pix.field = sys::FIELD_ANY;
      fmt.fmt = FormatUnion { pix };
    }
    unsafe { sys::vidioc_s_fmt(self.fd, &mut fmt).map_err(ioctl_error("VIDIOC_S_FMT"))? };

    // S_FMT 返回驱动实际采用的格式
    if self.is_multi_planar() {
      let mp = unsafe { fmt.fmt.pix_mp };
      let plane_fmt = mp.plane_fmt;
      self.num_planes = (mp.num_planes as usize).clamp(1, VIDEO_MAX_PLANES);
      Ok((mp.width, mp.height, mp.pixelformat, plane_fmt[0].bytesperline))
    } else {
      let pix = unsafe { fmt.fmt.pix };
      self.num_planes = 1;
      Ok((pix.width, pix.height, pix.pixelformat, pix.bytesperline))
    }
  }

  fn set_frame_rate(&self, fps: u32) -> Result<u32, V4l2CaptureError> {
    let mut parm = StreamParm::zeroed();
    parm.type_ = self.buf_type;
    unsafe { sys::vidioc_g_parm(self.fd, &mut parm).map_err(ioctl_error("VIDIOC_G_PARM"))? };

    let capture: CaptureParm = unsafe { parm.parm.capture };
    if capture.capability & sys::CAP_TIMEPERFRAME == 0 || fps == 0 {
      warn!("设备不支持设置帧率，保持驱动默认值");
      return Ok(interval_to_fps(
        capture.timeperframe.numerator,
        capture.timeperframe.denominator,
      ));
    }

    parm.parm = StreamParmUnion {
      capture: CaptureParm {
        timeperframe: Fract {
          numerator: 1,
          denominator: fps,
        },
        ..capture
      },
    };
    unsafe { sys::vidioc_s_parm(self.fd, &mut parm).map_err(ioctl_error("VIDIOC_S_PARM"))? };

    let interval = unsafe { parm.parm.capture }.timeperframe;
    let actual = interval_to_fps(interval.numerator, interval.denominator);
    info!("帧率设置为 {} fps（请求 {} fps）", actual, fps);
    Ok(actual)
  }

  /// 多平面接口的 `v4l2_buffer` 通过指针携带平面数组
  fn buffer_request(&self, index: u32, planes: &mut [Plane; VIDEO_MAX_PLANES]) -> Buffer {
    let mut buf = Buffer::zeroed();
    buf.index = index;
    buf.type_ = self.buf_type;
    buf.memory = sys::MEMORY_MMAP;
    if self.is_multi_planar() {
      buf.m = BufferM {
        planes: planes.as_mut_ptr(),
      };
      buf.length = self.num_planes as u32;
    }
    buf
  }

  fn map_buffer(&self, index: u32) -> Result<MappedBuffer, V4l2CaptureError> {
    let mut planes = [Plane::zeroed(); VIDEO_MAX_PLANES];
    let mut buf = self.buffer_request(index, &mut planes);
    unsafe { sys::vidioc_querybuf(self.fd, &mut buf).map_err(ioctl_error("VIDIOC_QUERYBUF"))? };

    let layout: Vec<(u64, usize)> = if self.is_multi_planar() {
      planes[..self.num_planes]
        .iter()
        .map(|p| (unsafe { p.m.mem_offset } as u64, p.length as usize))
        .collect()
    } else {
      vec![(unsafe { buf.m.offset } as u64, buf.length as usize)]
    };

    let mut maps = Vec::with_capacity(layout.len());
    for (offset, len) in layout {
      let map = unsafe { MmapOptions::new().offset(offset).len(len).map(self.fd) }?;
      debug!("缓冲 {} 平面映射: 偏移 {}, {} 字节", index, offset, len);
      maps.push(map);
    }
    Ok(MappedBuffer {
      planes: maps,
      queued: false,
    })
  }

  fn queue(&mut self, index: usize) -> Result<(), V4l2CaptureError> {
    let mut planes = [Plane::zeroed(); VIDEO_MAX_PLANES];
    let mut buf = self.buffer_request(index as u32, &mut planes);
    unsafe { sys::vidioc_qbuf(self.fd, &mut buf).map_err(ioctl_error("VIDIOC_QBUF"))? };
    self.buffers[index].queued = true;
    Ok(())
  }

  fn stream_off(&mut self) -> Result<(), V4l2CaptureError> {
    let buf_type = self.buf_type as i32;
    unsafe { sys::vidioc_streamoff(self.fd, &buf_type).map_err(ioctl_error("VIDIOC_STREAMOFF"))? };
    self.streaming = false;
    for buffer in &mut self.buffers {
      buffer.queued = false;
    }
    Ok(())
  }
}

fn interval_to_fps(numerator: u32, denominator: u32) -> u32 {
  if numerator == 0 {
    0
  } else {
    denominator / numerator
  }
}

/// 平面中有效数据的范围，`bytesused` 为 0 时视为整个平面
fn payload(bytesused: u32, data_offset: u32, len: usize) -> std::ops::Range<usize> {
  let end = match bytesused as usize {
    0 => len,
    n => n.min(len),
  };
  (data_offset as usize).min(end)..end
}

impl CaptureDevice for V4l2Capture {
  type Error = V4l2CaptureError;

  fn configure(&mut self, format: &CaptureFormat) -> Result<CaptureFormat, Self::Error> {
    if self.streaming || !self.buffers.is_empty() {
      return Err(V4l2CaptureError::AlreadyStreaming);
    }
    self.log_capabilities()?;

    let (width, height, fourcc, bytes_per_line) = self.set_format(format)?;
    let fourcc = fourcc.to_le_bytes();
    info!(
      "协商得到格式: {} {}x{} (行宽 {} 字节, {} 个平面)",
      FourCC::new(&fourcc),
      width,
      height,
      bytes_per_line,
      self.num_planes
    );

    let pixel_format = PixelFormat::from_fourcc(&fourcc)
      .ok_or_else(|| V4l2CaptureError::UnsupportedFormat(FourCC::new(&fourcc).to_string()))?;
    if pixel_format != format.pixel_format {
      warn!(
        "设备未接受 {:?}，改用 {:?}",
        format.pixel_format, pixel_format
      );
    }

    let fps = self.set_frame_rate(format.fps)?;

    Ok(CaptureFormat {
      width,
      height,
      pixel_format,
      fps,
      bytes_per_line,
    })
  }

  fn start(&mut self) -> Result<(), Self::Error> {
    if self.streaming {
      return Ok(());
    }

    let mut req = RequestBuffers::zeroed();
    req.count = self.depth as u32;
    req.type_ = self.buf_type;
    req.memory = sys::MEMORY_MMAP;
    unsafe { sys::vidioc_reqbufs(self.fd, &mut req).map_err(ioctl_error("VIDIOC_REQBUFS"))? };
    if req.count == 0 {
      return Err(V4l2CaptureError::NoBuffers);
    }
    if req.count as usize != self.depth {
      warn!("请求 {} 个缓冲，驱动分配了 {} 个", self.depth, req.count);
    }
    self.depth = req.count as usize;

    let buffers = (0..req.count)
      .map(|index| self.map_buffer(index))
      .collect::<Result<Vec<_>, _>>()?;
    self.buffers = buffers;
    for index in 0..self.depth {
      self.queue(index)?;
    }

    let buf_type = self.buf_type as i32;
    unsafe { sys::vidioc_streamon(self.fd, &buf_type).map_err(ioctl_error("VIDIOC_STREAMON"))? };
    self.streaming = true;
    info!("采集流已启动: {} 个 mmap 缓冲", self.depth);
    Ok(())
  }

  fn depth(&self) -> usize {
    self.depth
  }

  fn dequeue(&mut self) -> Result<(usize, Planes<'_>), Self::Error> {
    if !self.streaming {
      return Err(V4l2CaptureError::NotStarted);
    }

    let mut planes = [Plane::zeroed(); VIDEO_MAX_PLANES];
    let mut buf = self.buffer_request(0, &mut planes);
    loop {
      match unsafe { sys::vidioc_dqbuf(self.fd, &mut buf) } {
        Ok(_) => break,
        Err(Errno::EINTR) => continue,
        Err(e) => return Err(ioctl_error("VIDIOC_DQBUF")(e)),
      }
    }

    let index = buf.index as usize;
    let count = self.buffers.len();
    let buffer = self
      .buffers
      .get_mut(index)
      .ok_or(V4l2CaptureError::BadIndex { index, count })?;
    buffer.queued = false;

    let mut slices: [&[u8]; MAX_PLANES] = [&[]; MAX_PLANES];
    let used = buffer.planes.len().min(MAX_PLANES);
    for (p, map) in buffer.planes.iter().take(used).enumerate() {
      let range = if self.buf_type == sys::BUF_TYPE_VIDEO_CAPTURE_MPLANE {
        payload(planes[p].bytesused, planes[p].data_offset, map.len())
      } else {
        payload(buf.bytesused, 0, map.len())
      };
      slices[p] = &map[range];
    }

    debug!(
      "取出缓冲 {} (sequence {}, {} 个平面)",
      index, buf.sequence, used
    );
    Ok((index, Planes::from_slices(&slices[..used])))
  }

  fn enqueue(&mut self, index: usize) -> Result<(), Self::Error> {
    if !self.streaming {
      return Err(V4l2CaptureError::NotStarted);
    }
    let count = self.buffers.len();
    match self.buffers.get(index) {
      None => return Err(V4l2CaptureError::BadIndex { index, count }),
      Some(buffer) if buffer.queued => return Err(V4l2CaptureError::AlreadyQueued(index)),
      Some(_) => {}
    }
    self.queue(index)
  }
}

impl Drop for V4l2Capture {
  fn drop(&mut self) {
    if self.streaming {
      if let Err(e) = self.stream_off() {
        warn!("停止采集流失败: {}", e);
      }
    }
    // 解除映射后 device 才关闭
    self.buffers.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interval_converts_to_fps() {
    assert_eq!(interval_to_fps(1, 60), 60);
    assert_eq!(interval_to_fps(1001, 30000), 29);
    assert_eq!(interval_to_fps(0, 30), 0);
  }

  #[test]
  fn payload_honours_bytesused_and_offset() {
    assert_eq!(payload(0, 0, 4096), 0..4096);
    assert_eq!(payload(3000, 0, 4096), 0..3000);
    assert_eq!(payload(3000, 64, 4096), 64..3000);
    // 驱动报告的长度超出映射时截断
    assert_eq!(payload(8192, 0, 4096), 0..4096);
    assert_eq!(payload(100, 200, 4096), 100..100);
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("fb:///dev/fb0").unwrap();
    assert!(matches!(
      V4l2Capture::from_url(&url),
      Err(V4l2CaptureError::SchemeMismatch { .. })
    ));
  }
}
