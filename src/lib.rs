// 该文件是 Shanan （山南西风） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 摄像头 → NPU → LCD 的实时检测流水线。
//!
//! 每一帧依次经过：取出采集缓冲 → 颜色转换与旋转 → letterbox 推理 →
//! 叠加检测框 → 转换到屏幕格式并写入显存 → 归还采集缓冲。

pub mod accel;
pub mod buffer_pool;
pub mod capture;
pub mod config;
pub mod detector;
pub mod display;
pub mod frame;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod task;
pub mod transform;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
