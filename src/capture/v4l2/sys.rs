// 该文件是 Shanan （山南西风） 项目的一部分。
// src/capture/v4l2/sys.rs - V4L2 内核结构体与 ioctl
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

//! `videodev2.h` 中采集流程用到的部分，布局与内核一致。

#![allow(dead_code)]

use nix::libc::{c_ulong, c_void, timeval};

pub const VIDEO_MAX_PLANES: usize = 8;

pub const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
pub const BUF_TYPE_VIDEO_CAPTURE_MPLANE: u32 = 9;

pub const MEMORY_MMAP: u32 = 1;
pub const FIELD_ANY: u32 = 0;

pub const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
pub const CAP_VIDEO_CAPTURE_MPLANE: u32 = 0x0000_1000;
pub const CAP_STREAMING: u32 = 0x0400_0000;

/// `v4l2_captureparm.capability` 中的标志
pub const CAP_TIMEPERFRAME: u32 = 0x1000;

/// 全零是这些结构体的合法初始值
///
/// # Safety
///
/// 实现者必须只包含整数、数组、裸指针及由它们组成的联合体。
pub unsafe trait Zeroed: Sized {
  fn zeroed() -> Self {
    unsafe { std::mem::zeroed() }
  }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct PixFormat {
  pub width: u32,
  pub height: u32,
  pub pixelformat: u32,
  pub field: u32,
  pub bytesperline: u32,
  pub sizeimage: u32,
  pub colorspace: u32,
  pub priv_: u32,
  pub flags: u32,
  pub ycbcr_enc: u32,
  pub quantization: u32,
  pub xfer_func: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct PlanePixFormat {
  pub sizeimage: u32,
  pub bytesperline: u32,
  pub reserved: [u16; 6],
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct PixFormatMplane {
  pub width: u32,
  pub height: u32,
  pub pixelformat: u32,
  pub field: u32,
  pub colorspace: u32,
  pub plane_fmt: [PlanePixFormat; VIDEO_MAX_PLANES],
  pub num_planes: u8,
  pub flags: u8,
  pub ycbcr_enc: u8,
  pub quantization: u8,
  pub xfer_func: u8,
  pub reserved: [u8; 7],
}

/// `v4l2_format.fmt`，其中的 `v4l2_window` 带指针，联合体按指针对齐
#[repr(C)]
#[derive(Clone, Copy)]
pub union FormatUnion {
  pub pix: PixFormat,
  pub pix_mp: PixFormatMplane,
  pub raw_data: [u8; 200],
  align: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Format {
  pub type_: u32,
  pub fmt: FormatUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct FmtDesc {
  pub index: u32,
  pub type_: u32,
  pub flags: u32,
  pub description: [u8; 32],
  pub pixelformat: u32,
  pub mbus_code: u32,
  pub reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RequestBuffers {
  pub count: u32,
  pub type_: u32,
  pub memory: u32,
  pub capabilities: u32,
  pub flags: u8,
  pub reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union PlaneM {
  pub mem_offset: u32,
  pub userptr: c_ulong,
  pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Plane {
  pub bytesused: u32,
  pub length: u32,
  pub m: PlaneM,
  pub data_offset: u32,
  pub reserved: [u32; 11],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Timecode {
  pub type_: u32,
  pub flags: u32,
  pub frames: u8,
  pub seconds: u8,
  pub minutes: u8,
  pub hours: u8,
  pub userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union BufferM {
  pub offset: u32,
  pub userptr: c_ulong,
  pub planes: *mut Plane,
  pub fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Buffer {
  pub index: u32,
  pub type_: u32,
  pub bytesused: u32,
  pub flags: u32,
  pub field: u32,
  pub timestamp: timeval,
  pub timecode: Timecode,
  pub sequence: u32,
  pub memory: u32,
  pub m: BufferM,
  pub length: u32,
  pub reserved2: u32,
  pub request_fd: i32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct Fract {
  pub numerator: u32,
  pub denominator: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CaptureParm {
  pub capability: u32,
  pub capturemode: u32,
  pub timeperframe: Fract,
  pub extendedmode: u32,
  pub readbuffers: u32,
  pub reserved: [u32; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union StreamParmUnion {
  pub capture: CaptureParm,
  pub raw_data: [u8; 200],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct StreamParm {
  pub type_: u32,
  pub parm: StreamParmUnion,
}

unsafe impl Zeroed for Format {}
unsafe impl Zeroed for FmtDesc {}
unsafe impl Zeroed for RequestBuffers {}
unsafe impl Zeroed for Plane {}
unsafe impl Zeroed for Buffer {}
unsafe impl Zeroed for StreamParm {}

nix::ioctl_readwrite!(vidioc_enum_fmt, b'V', 2, FmtDesc);
nix::ioctl_readwrite!(vidioc_g_fmt, b'V', 4, Format);
nix::ioctl_readwrite!(vidioc_s_fmt, b'V', 5, Format);
nix::ioctl_readwrite!(vidioc_reqbufs, b'V', 8, RequestBuffers);
nix::ioctl_readwrite!(vidioc_querybuf, b'V', 9, Buffer);
nix::ioctl_readwrite!(vidioc_qbuf, b'V', 15, Buffer);
nix::ioctl_readwrite!(vidioc_dqbuf, b'V', 17, Buffer);
nix::ioctl_write_ptr!(vidioc_streamon, b'V', 18, i32);
nix::ioctl_write_ptr!(vidioc_streamoff, b'V', 19, i32);
nix::ioctl_readwrite!(vidioc_g_parm, b'V', 21, StreamParm);
nix::ioctl_readwrite!(vidioc_s_parm, b'V', 22, StreamParm);

/// 驱动支持时优先使用多平面接口
pub fn buffer_type_for(capabilities: u32) -> Option<u32> {
  if capabilities & CAP_VIDEO_CAPTURE_MPLANE != 0 {
    Some(BUF_TYPE_VIDEO_CAPTURE_MPLANE)
  } else if capabilities & CAP_VIDEO_CAPTURE != 0 {
    Some(BUF_TYPE_VIDEO_CAPTURE)
  } else {
    None
  }
}

/// `description` 是以 0 结尾的 C 字符串
pub fn description(desc: &FmtDesc) -> String {
  let end = desc
    .description
    .iter()
    .position(|&b| b == 0)
    .unwrap_or(desc.description.len());
  String::from_utf8_lossy(&desc.description[..end]).into_owned()
}
