// 该文件是 Shanan （山南西风） 项目的一部分。
// src/pipeline.rs - 流水线驱动
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

//! 单线程逐帧驱动：每次迭代恰好处理一个采集缓冲。
//!
//! 错误分三类：
//! - 缓冲池错误是致命的，状态进入 `Failed` 并返回错误；
//! - 解码（加速器）失败跳过本帧的推理与显示；
//! - 推理失败仍然显示本帧，只是不绘制检测框。
//!
//! 无论哪种非致命失败，缓冲都会在 `Recycling` 阶段归还。

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  accel::Accelerator,
  buffer_pool::{BufferPool, PoolError},
  capture::{CaptureDevice, CaptureFormat},
  display::{Compositor, DisplayError, DisplaySurface},
  frame::{Frame, FrameError, PixelFormat},
  model::{DetectionList, Model},
  overlay::Overlay,
  transform::{Rotation, rotate_into},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
  Idle,
  WaitingForBuffer,
  Decoding,
  Inferring,
  Annotating,
  Presenting,
  Recycling,
  Failed,
  Stopped,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("缓冲池错误: {0}")]
  Pool(#[from] PoolError),
  #[error("显示初始化失败: {0}")]
  Display(#[from] DisplayError),
  #[error("帧分配失败: {0}")]
  Frame(#[from] FrameError),
  #[error("流水线处于 {0:?} 状态，不能继续运行")]
  NotRunnable(PipelineState),
}

/// 单帧处理结果
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
  /// 采集缓冲下标
  pub index: usize,
  pub detections: DetectionList,
  pub decoded: bool,
  pub inferred: bool,
  pub presented: bool,
  pub infer_time: Duration,
  pub total_time: Duration,
}

pub struct Pipeline<C, A, M, S>
where
  C: CaptureDevice,
  A: Accelerator,
  M: Model<Input = Frame, Output = DetectionList>,
  M::Error: std::fmt::Display,
  S: DisplaySurface,
{
  pool: BufferPool<C>,
  accel: A,
  model: M,
  overlay: Overlay,
  compositor: Compositor,
  display: S,
  capture_format: CaptureFormat,
  rotation: Rotation,
  /// 多平面缓冲先拼接到这里
  staging: Frame,
  /// 采集方向的 RGBA 帧
  decoded: Frame,
  /// 旋转后的 RGBA 帧，推理与绘制都在它上面进行
  rotated: Frame,
  state: PipelineState,
  frame_count: u64,
}

impl<C, A, M, S> Pipeline<C, A, M, S>
where
  C: CaptureDevice,
  A: Accelerator,
  M: Model<Input = Frame, Output = DetectionList>,
  M::Error: std::fmt::Display,
  S: DisplaySurface,
{
  /// 所有中间帧在这里一次性分配，显示在这里清屏
  pub fn new(
    pool: BufferPool<C>,
    accel: A,
    model: M,
    overlay: Overlay,
    mut display: S,
    capture_format: CaptureFormat,
    rotation: Rotation,
  ) -> Result<Self, PipelineError> {
    let compositor = Compositor::new(display.geometry())?;
    compositor.clear(&mut display);

    let (w, h) = (capture_format.width, capture_format.height);
    let staging = Frame::new(w, h, capture_format.pixel_format)?;
    let decoded = Frame::new(w, h, PixelFormat::Rgba8888)?;
    let (rw, rh) = rotation.output_size(w, h);
    let rotated = Frame::new(rw, rh, PixelFormat::Rgba8888)?;

    info!(
      "流水线就绪: 采集 {}x{} {:?}, 旋转 {:?} → {}x{}, 缓冲 {} 个",
      w,
      h,
      capture_format.pixel_format,
      rotation,
      rw,
      rh,
      pool.depth()
    );

    Ok(Self {
      pool,
      accel,
      model,
      overlay,
      compositor,
      display,
      capture_format,
      rotation,
      staging,
      decoded,
      rotated,
      state: PipelineState::Idle,
      frame_count: 0,
    })
  }

  pub fn state(&self) -> PipelineState {
    self.state
  }

  pub fn frame_count(&self) -> u64 {
    self.frame_count
  }

  pub fn pool(&self) -> &BufferPool<C> {
    &self.pool
  }

  pub fn display(&self) -> &S {
    &self.display
  }

  pub fn compositor(&self) -> &Compositor {
    &self.compositor
  }

  /// 最近一帧旋转并标注后的图像
  pub fn annotated(&self) -> &Frame {
    &self.rotated
  }

  /// 请求停止，之后 `run_once` 不再执行
  pub fn stop(&mut self) {
    if self.state != PipelineState::Failed {
      self.state = PipelineState::Stopped;
    }
  }

  /// 取出一个缓冲并解码到 `decoded`，返回缓冲下标与解码是否成功
  ///
  /// 返回时缓冲内存已不再被引用，但缓冲仍处于使用状态，需要归还。
  fn take_capture(&mut self) -> Result<(usize, bool), PoolError> {
    let buffer = self.pool.acquire_filled()?;
    let index = buffer.index();
    self.state = PipelineState::Decoding;

    let format = self.capture_format;
    let direct = if format.is_padded() {
      None
    } else {
      buffer.as_image(format.width, format.height, format.pixel_format)
    };
    let src = match direct {
      Some(Ok(image)) => image,
      Some(Err(e)) => {
        warn!("缓冲 {} 内容无效: {}", index, e);
        return Ok((index, false));
      }
      None => {
        // 多平面或行尾带填充的缓冲先拼成紧凑帧
        let copied = if format.is_padded() {
          buffer.copy_rows_to(
            format.row_stride(),
            format.row_bytes(),
            format.rows(),
            self.staging.as_bytes_mut(),
          )
        } else {
          buffer.copy_to(self.staging.as_bytes_mut())
        };
        if let Err(e) = copied {
          warn!("缓冲 {} 无法拼接: {}", index, e);
          return Ok((index, false));
        }
        self.staging.view()
      }
    };

    match self
      .accel
      .convert_or_resize(&src, &mut self.decoded.view_mut())
    {
      Ok(()) => Ok((index, true)),
      Err(e) => {
        warn!("缓冲 {} 颜色转换失败，跳过本帧: {}", index, e);
        Ok((index, false))
      }
    }
  }

  fn fail(&mut self, err: PoolError) -> PipelineError {
    error!("缓冲池错误，流水线停止: {}", err);
    self.state = PipelineState::Failed;
    PipelineError::Pool(err)
  }

  /// 处理一帧：取缓冲 → 解码 → 旋转 → 推理 → 绘制 → 显示 → 归还
  pub fn run_once(&mut self) -> Result<FrameReport, PipelineError> {
    if matches!(self.state, PipelineState::Failed | PipelineState::Stopped) {
      return Err(PipelineError::NotRunnable(self.state));
    }

    let start = Instant::now();
    self.state = PipelineState::WaitingForBuffer;
    let (index, decoded) = match self.take_capture() {
      Ok(taken) => taken,
      Err(e) => return Err(self.fail(e)),
    };

    let mut report = FrameReport {
      index,
      decoded,
      ..Default::default()
    };

    if report.decoded {
      if let Err(e) = rotate_into(
        &self.decoded.view(),
        self.rotation,
        &mut self.rotated.view_mut(),
      ) {
        warn!("缓冲 {} 旋转失败，跳过本帧: {}", index, e);
        report.decoded = false;
      }
    }

    if report.decoded {
      self.state = PipelineState::Inferring;
      let now = Instant::now();
      match self.model.infer(&self.rotated) {
        Ok(detections) => {
          report.inferred = true;
          report.detections = detections;
        }
        Err(e) => warn!("推理失败，本帧不绘制检测框: {}", e),
      }
      report.infer_time = now.elapsed();

      for item in &report.detections {
        info!("{}", item);
      }

      self.state = PipelineState::Annotating;
      self.overlay.draw(&mut self.rotated, &report.detections);

      self.state = PipelineState::Presenting;
      match self
        .compositor
        .present(&self.accel, &self.rotated, &mut self.display)
      {
        Ok(()) => report.presented = true,
        Err(e) => warn!("显示失败，跳过本帧: {}", e),
      }
    }

    self.state = PipelineState::Recycling;
    if let Err(e) = self.pool.release(index) {
      return Err(self.fail(e));
    }
    self.state = PipelineState::WaitingForBuffer;

    self.frame_count += 1;
    report.total_time = start.elapsed();
    info!(
      "第 {} 帧（缓冲 {}）: {} 个目标, 推理耗时 {:.2?}, 总耗时 {:.2?}",
      self.frame_count,
      index,
      report.detections.len(),
      report.infer_time,
      report.total_time
    );
    debug!(
      "解码 {}, 推理 {}, 显示 {}",
      report.decoded, report.inferred, report.presented
    );

    Ok(report)
  }
}
