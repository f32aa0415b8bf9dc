// 该文件是 Shanan （山南西风） 项目的一部分。
// src/accel.rs - 二维图像加速器抽象
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

use crate::{
  frame::{ImageDesc, ImageDescMut},
  transform::{ResizeFilter, TransformError, resample_into},
};

/// 一次调用完成复制、格式转换与缩放
///
/// 失败时目标缓冲内容未定义，调用方应丢弃本帧。
pub trait Accelerator {
  type Error: std::error::Error + Send + Sync + 'static;

  fn convert_or_resize(
    &self,
    src: &ImageDesc<'_>,
    dst: &mut ImageDescMut<'_>,
  ) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum AccelError {
  #[error("软件图像处理失败: {0}")]
  Transform(#[from] TransformError),
}

/// 用 CPU 实现的加速器，供没有 2D 硬件的平台与测试使用
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuAccelerator {
  filter: ResizeFilter,
}

impl CpuAccelerator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
    self.filter = filter;
    self
  }

  pub fn filter(&self) -> ResizeFilter {
    self.filter
  }
}

impl Accelerator for CpuAccelerator {
  type Error = AccelError;

  fn convert_or_resize(
    &self,
    src: &ImageDesc<'_>,
    dst: &mut ImageDescMut<'_>,
  ) -> Result<(), Self::Error> {
    resample_into(src, dst, self.filter)?;
    Ok(())
  }
}
