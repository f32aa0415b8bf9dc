// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/common/mod.rs - 集成测试用的假设备
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

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;

use shanan_live::{
  accel::{AccelError, Accelerator, CpuAccelerator},
  capture::{CaptureDevice, CaptureFormat, Planes},
  display::{DisplayGeometry, DisplaySurface},
  frame::{ImageDesc, ImageDescMut, PixelFormat, RgbNhwcFrame},
  model::{DetectItem, DetectionList, InferenceEngine, PostProcess, RawOutputs},
  transform::BoundingBox,
};

pub const CAPTURE_WIDTH: u32 = 640;
pub const CAPTURE_HEIGHT: u32 = 480;
pub const MODEL_SIZE: u32 = 640;

#[derive(Debug, thiserror::Error)]
pub enum StubError {
  #[error("采集设备已断开")]
  Disconnected,
  #[error("注入的加速器故障")]
  Injected,
  #[error("推理引擎故障")]
  Engine,
  #[error(transparent)]
  Cpu(#[from] AccelError),
}

pub fn capture_format() -> CaptureFormat {
  CaptureFormat {
    width: CAPTURE_WIDTH,
    height: CAPTURE_HEIGHT,
    pixel_format: PixelFormat::Nv12,
    fps: 60,
    bytes_per_line: 0,
  }
}

/// 单色 NV12 帧
pub fn solid_nv12(y: u8, u: u8, v: u8) -> Vec<u8> {
  let luma = (CAPTURE_WIDTH * CAPTURE_HEIGHT) as usize;
  let mut data = vec![y; luma];
  for _ in 0..luma / 4 {
    data.push(u);
    data.push(v);
  }
  data
}

/// 亮度逐行渐变的 NV12 帧
pub fn striped_nv12() -> Vec<u8> {
  let (w, h) = (CAPTURE_WIDTH as usize, CAPTURE_HEIGHT as usize);
  let mut data = Vec::with_capacity(w * h * 3 / 2);
  for row in 0..h {
    data.extend(std::iter::repeat_n(row as u8, w));
  }
  for row in 0..h / 2 {
    for _ in 0..w / 2 {
      data.push(96 + (row % 64) as u8);
      data.push(160);
    }
  }
  data
}

/// 把紧凑帧的每一行填充到 `stride` 字节，填充内容为 0xff
pub fn pad_rows(packed: &[u8], stride: usize) -> Vec<u8> {
  let w = CAPTURE_WIDTH as usize;
  let mut data = Vec::with_capacity(packed.len() / w * stride);
  for row in packed.chunks(w) {
    data.extend_from_slice(row);
    data.resize(data.len() + stride - w, 0xff);
  }
  data
}

/// 按脚本交出缓冲的摄像头，脚本耗尽后按轮转顺序交出
pub struct StubCapture {
  buffers: Vec<Vec<u8>>,
  script: VecDeque<usize>,
  next: usize,
  enqueued: Vec<usize>,
  dequeues: usize,
  fail_after: Option<usize>,
  started: bool,
}

impl StubCapture {
  pub fn new(depth: usize, frame: Vec<u8>) -> Self {
    Self {
      buffers: vec![frame; depth],
      script: VecDeque::new(),
      next: 0,
      enqueued: Vec::new(),
      dequeues: 0,
      fail_after: None,
      started: false,
    }
  }

  pub fn with_script(mut self, script: &[usize]) -> Self {
    self.script = script.iter().copied().collect();
    self
  }

  /// 第 `n` 次之后的取缓冲全部失败
  pub fn fail_after(mut self, n: usize) -> Self {
    self.fail_after = Some(n);
    self
  }

  pub fn enqueued(&self) -> &[usize] {
    &self.enqueued
  }
}

impl CaptureDevice for StubCapture {
  type Error = StubError;

  fn configure(&mut self, format: &CaptureFormat) -> Result<CaptureFormat, Self::Error> {
    Ok(*format)
  }

  fn start(&mut self) -> Result<(), Self::Error> {
    self.started = true;
    Ok(())
  }

  fn depth(&self) -> usize {
    self.buffers.len()
  }

  fn dequeue(&mut self) -> Result<(usize, Planes<'_>), Self::Error> {
    if self.fail_after.map(|n| self.dequeues >= n).unwrap_or(false) {
      return Err(StubError::Disconnected);
    }
    self.dequeues += 1;

    let index = match self.script.pop_front() {
      Some(index) => index,
      None => {
        let index = self.next;
        self.next = (self.next + 1) % self.buffers.len();
        index
      }
    };
    Ok((index, Planes::single(&self.buffers[index])))
  }

  fn enqueue(&mut self, index: usize) -> Result<(), Self::Error> {
    self.enqueued.push(index);
    Ok(())
  }
}

/// 前 `failures` 次调用失败，之后交给 CPU 实现
pub struct FailingAccelerator {
  remaining: Cell<usize>,
  inner: CpuAccelerator,
}

impl FailingAccelerator {
  pub fn new(failures: usize) -> Self {
    Self {
      remaining: Cell::new(failures),
      inner: CpuAccelerator::new(),
    }
  }
}

impl Accelerator for FailingAccelerator {
  type Error = StubError;

  fn convert_or_resize(
    &self,
    src: &ImageDesc<'_>,
    dst: &mut ImageDescMut<'_>,
  ) -> Result<(), Self::Error> {
    let remaining = self.remaining.get();
    if remaining > 0 {
      self.remaining.set(remaining - 1);
      return Err(StubError::Injected);
    }
    Ok(self.inner.convert_or_resize(src, dst)?)
  }
}

/// 不做计算的引擎，输出由后处理决定
pub struct FixedEngine {
  fail: bool,
  outputs: RawOutputs,
}

impl FixedEngine {
  pub fn new() -> Self {
    Self {
      fail: false,
      outputs: RawOutputs::default(),
    }
  }

  pub fn failing() -> Self {
    Self {
      fail: true,
      outputs: RawOutputs::default(),
    }
  }
}

impl InferenceEngine for FixedEngine {
  type Error = StubError;

  fn input_size(&self) -> (u32, u32) {
    (MODEL_SIZE, MODEL_SIZE)
  }

  fn set_input(&mut self, tensor: &RgbNhwcFrame) -> Result<(), Self::Error> {
    assert_eq!(tensor.width(), MODEL_SIZE as usize);
    assert_eq!(tensor.height(), MODEL_SIZE as usize);
    Ok(())
  }

  fn run(&mut self) -> Result<(), Self::Error> {
    if self.fail {
      return Err(StubError::Engine);
    }
    Ok(())
  }

  fn outputs(&mut self) -> Result<&RawOutputs, Self::Error> {
    Ok(&self.outputs)
  }
}

/// 模型坐标下固定返回一个检测框，或什么都不返回
pub struct FixedPostProcess {
  item: Option<DetectItem>,
}

impl FixedPostProcess {
  pub fn person() -> Self {
    Self {
      item: Some(DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: BoundingBox::new(100.0, 100.0, 200.0, 200.0),
      }),
    }
  }

  pub fn nothing() -> Self {
    Self { item: None }
  }
}

impl PostProcess for FixedPostProcess {
  fn post_process(
    &self,
    _outputs: &RawOutputs,
    _box_threshold: f32,
    _nms_threshold: f32,
  ) -> DetectionList {
    self.item.iter().cloned().collect()
  }
}

/// 竖屏 RGBA 内存显示，初始内容为非零以便检查清屏
pub struct MemoryDisplay {
  geometry: DisplayGeometry,
  pub data: Vec<u8>,
}

impl MemoryDisplay {
  pub fn portrait() -> Self {
    let geometry = DisplayGeometry {
      width: CAPTURE_HEIGHT,
      height: CAPTURE_WIDTH,
      stride: CAPTURE_HEIGHT as usize * 4,
      format: PixelFormat::Rgba8888,
    };
    Self {
      geometry,
      data: vec![0xaa; geometry.required_len()],
    }
  }

  pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
    let offset = y as usize * self.geometry.stride + x as usize * 4;
    &self.data[offset..offset + 4]
  }
}

impl DisplaySurface for MemoryDisplay {
  fn geometry(&self) -> DisplayGeometry {
    self.geometry
  }

  fn memory(&mut self) -> &mut [u8] {
    &mut self.data
  }
}
