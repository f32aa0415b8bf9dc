// 该文件是 Shanan （山南西风） 项目的一部分。
// src/buffer_pool.rs - 采集缓冲池
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

//! 固定深度的采集缓冲池。
//!
//! 每个缓冲在任意时刻只处于一种状态：
//! `Queued`（设备持有）→ `Filled`（设备报告填充完成）→ `InUse`（流水线读取）→ `Queued`。
//! 缓冲池只是状态表，缓冲内存始终属于采集设备。

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  capture::{CaptureDevice, Planes},
  frame::{FrameError, ImageDesc, PixelFormat},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
  Queued,
  Filled,
  InUse,
}

#[derive(Error, Debug)]
pub enum PoolError {
  #[error("采集设备错误: {0}")]
  Device(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("缓冲池深度为 0")]
  EmptyPool,
  #[error("缓冲下标 {index} 越界（深度 {depth}）")]
  OutOfRange { index: usize, depth: usize },
  #[error("设备交出的缓冲 {index} 处于 {state:?} 状态")]
  NotQueued { index: usize, state: SlotState },
  #[error("缓冲 {0} 仍在使用，不能同时取出第二个缓冲")]
  AlreadyInFlight(usize),
  #[error("缓冲 {index} 处于 {state:?} 状态，不能归还")]
  NotInUse { index: usize, state: SlotState },
  #[error("目标缓冲过小: 需要 {needed} 字节, 实际 {actual} 字节")]
  ShortBuffer { needed: usize, actual: usize },
}

impl PoolError {
  fn device<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    PoolError::Device(Box::new(err))
  }
}

/// 已取出的缓冲，借用缓冲池，存活期间不能再次取出或归还
#[derive(Debug)]
pub struct CaptureBuffer<'a> {
  index: usize,
  planes: Planes<'a>,
}

impl<'a> CaptureBuffer<'a> {
  pub fn index(&self) -> usize {
    self.index
  }

  pub fn planes(&self) -> &Planes<'a> {
    &self.planes
  }

  pub fn len(&self) -> usize {
    self.planes.total_len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 单平面缓冲可以直接作为图像读取
  pub fn as_image(
    &self,
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Option<Result<ImageDesc<'a>, FrameError>> {
    if self.planes.len() != 1 {
      return None;
    }
    let data = self.planes.get(0)?;
    Some(ImageDesc::new(data, width, height, format))
  }

  /// 按平面顺序把内容拷贝到 `dst`，返回写入的字节数
  pub fn copy_to(&self, dst: &mut [u8]) -> Result<usize, PoolError> {
    let needed = self.len();
    if dst.len() < needed {
      return Err(PoolError::ShortBuffer {
        needed,
        actual: dst.len(),
      });
    }

    let mut offset = 0;
    for plane in self.planes.iter() {
      dst[offset..offset + plane.len()].copy_from_slice(plane);
      offset += plane.len();
    }
    Ok(offset)
  }

  /// 去掉行尾填充，把 `rows` 行有效数据紧凑地拷贝到 `dst`
  ///
  /// 各平面按同一个行间距 `stride` 存放，平面之间按顺序衔接。
  pub fn copy_rows_to(
    &self,
    stride: usize,
    row_bytes: usize,
    rows: usize,
    dst: &mut [u8],
  ) -> Result<usize, PoolError> {
    let needed = row_bytes * rows;
    if dst.len() < needed {
      return Err(PoolError::ShortBuffer {
        needed,
        actual: dst.len(),
      });
    }
    if stride < row_bytes {
      return Err(PoolError::ShortBuffer {
        needed: row_bytes,
        actual: stride,
      });
    }

    let mut out = dst[..needed].chunks_exact_mut(row_bytes);
    for plane in self.planes.iter() {
      for row in plane.chunks(stride) {
        let Some(target) = out.next() else {
          return Ok(needed);
        };
        // 最后一行可以不带填充，但不能短于有效数据
        let Some(pixels) = row.get(..row_bytes) else {
          return Err(PoolError::ShortBuffer {
            needed: row_bytes,
            actual: row.len(),
          });
        };
        target.copy_from_slice(pixels);
      }
    }

    let missing = out.count();
    if missing > 0 {
      return Err(PoolError::ShortBuffer {
        needed,
        actual: needed - missing * row_bytes,
      });
    }
    Ok(needed)
  }
}

pub struct BufferPool<C: CaptureDevice> {
  device: C,
  slots: Vec<SlotState>,
  /// 轮转顺序中预期的下一个下标
  cursor: usize,
  in_flight: Option<usize>,
}

impl<C: CaptureDevice> BufferPool<C> {
  /// 接管已启动的采集设备，此时所有缓冲都在设备队列中
  pub fn new(device: C) -> Result<Self, PoolError> {
    let depth = device.depth();
    if depth == 0 {
      return Err(PoolError::EmptyPool);
    }

    Ok(Self {
      device,
      slots: vec![SlotState::Queued; depth],
      cursor: 0,
      in_flight: None,
    })
  }

  pub fn depth(&self) -> usize {
    self.slots.len()
  }

  pub fn state(&self, index: usize) -> Option<SlotState> {
    self.slots.get(index).copied()
  }

  pub fn in_flight(&self) -> Option<usize> {
    self.in_flight
  }

  pub fn device(&self) -> &C {
    &self.device
  }

  /// 阻塞等待下一个填充完成的缓冲
  pub fn acquire_filled(&mut self) -> Result<CaptureBuffer<'_>, PoolError> {
    if let Some(index) = self.in_flight {
      return Err(PoolError::AlreadyInFlight(index));
    }

    let depth = self.slots.len();
    let (index, planes) = self.device.dequeue().map_err(PoolError::device)?;

    let state = self
      .slots
      .get_mut(index)
      .ok_or(PoolError::OutOfRange { index, depth })?;
    if *state != SlotState::Queued {
      return Err(PoolError::NotQueued {
        index,
        state: *state,
      });
    }
    *state = SlotState::Filled;

    if index != self.cursor {
      warn!("设备未按轮转顺序交出缓冲: 期望 {}, 实际 {}", self.cursor, index);
    }
    self.cursor = (index + 1) % depth;

    // 所有权交给流水线
    *state = SlotState::InUse;
    self.in_flight = Some(index);
    debug!("缓冲 {} 进入使用 ({} 字节)", index, planes.total_len());

    Ok(CaptureBuffer { index, planes })
  }

  /// 把缓冲交还给设备，每次取出恰好对应一次归还
  pub fn release(&mut self, index: usize) -> Result<(), PoolError> {
    let depth = self.slots.len();
    let state = self
      .slots
      .get_mut(index)
      .ok_or(PoolError::OutOfRange { index, depth })?;
    if *state != SlotState::InUse {
      return Err(PoolError::NotInUse {
        index,
        state: *state,
      });
    }

    self.device.enqueue(index).map_err(PoolError::device)?;
    *state = SlotState::Queued;
    self.in_flight = None;
    debug!("缓冲 {} 归还设备", index);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capture::CaptureFormat;
  use proptest::prelude::*;
  use std::collections::VecDeque;

  #[derive(Debug, thiserror::Error)]
  #[error("mock device failure")]
  struct MockError;

  /// 按脚本交出下标的假设备，脚本耗尽后按轮转顺序交出
  struct MockDevice {
    buffers: Vec<Vec<u8>>,
    script: VecDeque<usize>,
    next: usize,
    enqueued: Vec<usize>,
    fail_dequeue: bool,
  }

  impl MockDevice {
    fn new(depth: usize) -> Self {
      Self {
        buffers: (0..depth).map(|i| vec![i as u8; 6]).collect(),
        script: VecDeque::new(),
        next: 0,
        enqueued: Vec::new(),
        fail_dequeue: false,
      }
    }
  }

  impl CaptureDevice for MockDevice {
    type Error = MockError;

    fn configure(&mut self, format: &CaptureFormat) -> Result<CaptureFormat, Self::Error> {
      Ok(*format)
    }

    fn start(&mut self) -> Result<(), Self::Error> {
      Ok(())
    }

    fn depth(&self) -> usize {
      self.buffers.len()
    }

    fn dequeue(&mut self) -> Result<(usize, Planes<'_>), Self::Error> {
      if self.fail_dequeue {
        return Err(MockError);
      }
      let index = match self.script.pop_front() {
        Some(index) => index,
        None => {
          let index = self.next;
          self.next = (self.next + 1) % self.buffers.len();
          index
        }
      };
      let data = self.buffers.get(index).map(Vec::as_slice).unwrap_or(&[]);
      Ok((index, Planes::single(data)))
    }

    fn enqueue(&mut self, index: usize) -> Result<(), Self::Error> {
      self.enqueued.push(index);
      Ok(())
    }
  }

  #[test]
  fn buffers_cycle_in_round_robin_order() {
    let mut pool = BufferPool::new(MockDevice::new(3)).unwrap();
    for expected in [0, 1, 2, 0, 1] {
      let buffer = pool.acquire_filled().unwrap();
      assert_eq!(buffer.index(), expected);
      let mut out = [0u8; 6];
      assert_eq!(buffer.copy_to(&mut out).unwrap(), 6);
      assert_eq!(out, [expected as u8; 6]);
      assert_eq!(pool.state(expected), Some(SlotState::InUse));
      pool.release(expected).unwrap();
      assert_eq!(pool.state(expected), Some(SlotState::Queued));
    }
    assert_eq!(pool.device().enqueued, vec![0, 1, 2, 0, 1]);
  }

  #[test]
  fn second_acquire_while_in_use_is_rejected() {
    let mut pool = BufferPool::new(MockDevice::new(2)).unwrap();
    let index = pool.acquire_filled().unwrap().index();
    assert!(matches!(
      pool.acquire_filled(),
      Err(PoolError::AlreadyInFlight(i)) if i == index
    ));
  }

  #[test]
  fn double_release_is_rejected() {
    let mut pool = BufferPool::new(MockDevice::new(2)).unwrap();
    let index = pool.acquire_filled().unwrap().index();
    pool.release(index).unwrap();
    assert!(matches!(
      pool.release(index),
      Err(PoolError::NotInUse {
        state: SlotState::Queued,
        ..
      })
    ));
    assert_eq!(pool.device().enqueued, vec![index]);
  }

  #[test]
  fn release_of_unknown_index_is_rejected() {
    let mut pool = BufferPool::new(MockDevice::new(2)).unwrap();
    assert!(matches!(pool.release(1), Err(PoolError::NotInUse { .. })));
    assert!(matches!(
      pool.release(7),
      Err(PoolError::OutOfRange { index: 7, depth: 2 })
    ));
  }

  #[test]
  fn out_of_order_buffer_is_accepted() {
    let mut device = MockDevice::new(4);
    device.script.extend([2, 0]);
    let mut pool = BufferPool::new(device).unwrap();
    assert_eq!(pool.acquire_filled().unwrap().index(), 2);
    pool.release(2).unwrap();
    assert_eq!(pool.acquire_filled().unwrap().index(), 0);
  }

  #[test]
  fn device_out_of_range_index_is_fatal() {
    let mut device = MockDevice::new(2);
    device.script.push_back(5);
    let mut pool = BufferPool::new(device).unwrap();
    assert!(matches!(
      pool.acquire_filled(),
      Err(PoolError::OutOfRange { index: 5, .. })
    ));
  }

  #[test]
  fn device_failure_is_reported() {
    let mut device = MockDevice::new(2);
    device.fail_dequeue = true;
    let mut pool = BufferPool::new(device).unwrap();
    assert!(matches!(pool.acquire_filled(), Err(PoolError::Device(_))));
  }

  #[test]
  fn short_destination_is_rejected() {
    let mut pool = BufferPool::new(MockDevice::new(1)).unwrap();
    let buffer = pool.acquire_filled().unwrap();
    let mut out = [0u8; 4];
    assert!(matches!(
      buffer.copy_to(&mut out),
      Err(PoolError::ShortBuffer { needed: 6, actual: 4 })
    ));
  }

  #[test]
  fn padded_rows_are_compacted_across_planes() {
    // 2 像素宽、每行填充到 4 字节：亮度 2 行，色度 1 行
    let y = [1, 2, 0, 0, 3, 4, 0, 0];
    let uv = [5, 6];
    let buffer = CaptureBuffer {
      index: 0,
      planes: Planes::from_slices(&[&y, &uv]),
    };
    let mut out = [0u8; 6];
    assert_eq!(buffer.copy_rows_to(4, 2, 3, &mut out).unwrap(), 6);
    assert_eq!(out, [1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn missing_rows_are_reported() {
    let y = [1, 2, 0, 0];
    let buffer = CaptureBuffer {
      index: 0,
      planes: Planes::single(&y),
    };
    let mut out = [0u8; 4];
    assert!(matches!(
      buffer.copy_rows_to(4, 2, 2, &mut out),
      Err(PoolError::ShortBuffer { needed: 4, actual: 2 })
    ));
  }

  proptest! {
    #[test]
    fn at_most_one_buffer_is_in_use(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
      let mut pool = BufferPool::new(MockDevice::new(4)).unwrap();
      for acquire in ops {
        if acquire {
          let _ = pool.acquire_filled().map(|b| b.index());
        } else if let Some(index) = pool.in_flight() {
          pool.release(index).unwrap();
        }
        let in_use = (0..pool.depth())
          .filter(|&i| pool.state(i) == Some(SlotState::InUse))
          .count();
        prop_assert!(in_use <= 1);
        prop_assert_eq!(in_use == 1, pool.in_flight().is_some());
      }
    }
  }
}
