// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;

use crate::{frame::RgbNhwcFrame, transform::BoundingBox};

mod labels;
mod yolov5;

#[cfg(feature = "rknn")]
mod rknn;

pub use self::labels::{COCO_CLASSES, coco_label};
pub use self::yolov5::Yolov5PostProcess;

#[cfg(feature = "rknn")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnError};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: BoundingBox,
}

impl DetectItem {
  pub fn label(&self) -> &'static str {
    coco_label(self.class_id)
  }
}

impl fmt::Display for DetectItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} @ ({:.0} {:.0} {:.0} {:.0}) {:.3}",
      self.label(),
      self.bbox.left,
      self.bbox.top,
      self.bbox.right,
      self.bbox.bottom,
      self.score
    )
  }
}

pub type DetectionList = Vec<DetectItem>;

/// 推理引擎的原始 f32 输出，每个输出张量一项
#[derive(Debug, Clone, Default)]
pub struct RawOutputs {
  tensors: Vec<Vec<f32>>,
}

impl RawOutputs {
  pub fn new(tensors: Vec<Vec<f32>>) -> Self {
    Self { tensors }
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&[f32]> {
    self.tensors.get(index).map(Vec::as_slice)
  }

  /// 覆盖第 `index` 个张量，沿用上一帧的分配
  pub fn set(&mut self, index: usize, data: &[f32]) {
    if self.tensors.len() <= index {
      self.tensors.resize_with(index + 1, Vec::new);
    }
    let tensor = &mut self.tensors[index];
    tensor.clear();
    tensor.extend_from_slice(data);
  }
}

/// 同步推理引擎
///
/// 调用顺序固定为 `set_input` → `run` → `outputs`。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型输入的 `(宽, 高)`
  fn input_size(&self) -> (u32, u32);

  fn set_input(&mut self, tensor: &RgbNhwcFrame) -> Result<(), Self::Error>;

  fn run(&mut self) -> Result<(), Self::Error>;

  /// 本次推理的输出，缓冲归引擎所有并在下一次调用时覆盖
  fn outputs(&mut self) -> Result<&RawOutputs, Self::Error>;
}

/// 把原始输出解码为模型输入坐标系下的检测框
pub trait PostProcess {
  fn post_process(
    &self,
    outputs: &RawOutputs,
    box_threshold: f32,
    nms_threshold: f32,
  ) -> DetectionList;
}

/// 按分数降序做同类别非极大值抑制
pub fn nms(mut items: DetectionList, nms_threshold: f32) -> DetectionList {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: DetectionList = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = keep
      .iter()
      .any(|k| k.class_id == item.class_id && k.bbox.iou(&item.bbox) > nms_threshold);
    if !suppressed {
      keep.push(item);
    }
  }
  keep
}
