// 该文件是 Shanan （山南西风） 项目的一部分。
// src/detector.rs - 检测调用
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
use tracing::debug;

use crate::{
  frame::{Frame, FrameError, PixelFormat, RgbNhwcFrame},
  model::{DetectionList, InferenceEngine, Model, PostProcess},
  transform::{LetterboxTransform, TransformError, letterbox_pack_into},
};

/// 检测框置信度阈值
pub const BOX_THRESHOLD: f32 = 0.25;
/// NMS 的 IoU 阈值
pub const NMS_THRESHOLD: f32 = 0.45;
/// letterbox 填充灰度
pub const LETTERBOX_BACKGROUND: u8 = 114;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("letterbox 失败: {0}")]
  Letterbox(#[from] TransformError),
  #[error("输入张量打包失败: {0}")]
  Tensor(#[from] FrameError),
  #[error("推理引擎错误: {0}")]
  Engine(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DetectError {
  fn engine<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
    DetectError::Engine(Box::new(err))
  }
}

/// letterbox → 推理 → 后处理 → 坐标映射
///
/// 画布与输入张量在构造时按模型输入尺寸分配，之后每帧复用。
pub struct Detector<E, P> {
  engine: E,
  post: P,
  canvas: Frame,
  tensor: RgbNhwcFrame,
  box_threshold: f32,
  nms_threshold: f32,
  background: u8,
}

impl<E: InferenceEngine, P: PostProcess> Detector<E, P> {
  pub fn new(engine: E, post: P) -> Result<Self, DetectError> {
    let (width, height) = engine.input_size();
    let canvas = Frame::new(width, height, PixelFormat::Rgba8888)?;
    let tensor = RgbNhwcFrame::with_shape(height as usize, width as usize);

    Ok(Self {
      engine,
      post,
      canvas,
      tensor,
      box_threshold: BOX_THRESHOLD,
      nms_threshold: NMS_THRESHOLD,
      background: LETTERBOX_BACKGROUND,
    })
  }

  pub fn with_thresholds(mut self, box_threshold: f32, nms_threshold: f32) -> Self {
    self.box_threshold = box_threshold;
    self.nms_threshold = nms_threshold;
    self
  }

  pub fn with_background(mut self, background: u8) -> Self {
    self.background = background;
    self
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.canvas.width(), self.canvas.height())
  }

  /// 最近一次送入模型的 letterbox 画布
  pub fn canvas(&self) -> &Frame {
    &self.canvas
  }

  /// 返回的检测框位于 `frame` 的坐标系
  pub fn detect(&mut self, frame: &Frame) -> Result<DetectionList, DetectError> {
    if self.canvas.format() != frame.format() {
      let (width, height) = self.input_size();
      self.canvas = Frame::new(width, height, frame.format())?;
    }

    let transform = letterbox_pack_into(frame, &mut self.canvas, self.background)?;
    debug!(
      "letterbox: scale {:.3}, pad ({}, {})",
      transform.scale(),
      transform.pad_x(),
      transform.pad_y()
    );
    self.infer_letterboxed(&transform)
  }

  fn infer_letterboxed(
    &mut self,
    transform: &LetterboxTransform,
  ) -> Result<DetectionList, DetectError> {
    self.tensor.fill_from(&self.canvas)?;

    self
      .engine
      .set_input(&self.tensor)
      .map_err(DetectError::engine)?;
    self.engine.run().map_err(DetectError::engine)?;
    let outputs = self.engine.outputs().map_err(DetectError::engine)?;

    let items = self
      .post
      .post_process(outputs, self.box_threshold, self.nms_threshold);

    Ok(
      items
        .into_iter()
        .map(|mut item| {
          item.bbox = transform.remap_box(item.bbox);
          item
        })
        .collect(),
    )
  }
}

impl<E: InferenceEngine, P: PostProcess> Model for Detector<E, P> {
  type Input = Frame;
  type Output = DetectionList;
  type Error = DetectError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::AsNhwcFrame,
    model::{DetectItem, RawOutputs},
    transform::BoundingBox,
  };

  #[derive(Debug, thiserror::Error)]
  #[error("engine offline")]
  struct Offline;

  struct RecordingEngine {
    size: (u32, u32),
    last_input: Vec<u8>,
    fail: bool,
    outputs: RawOutputs,
  }

  impl InferenceEngine for RecordingEngine {
    type Error = Offline;

    fn input_size(&self) -> (u32, u32) {
      self.size
    }

    fn set_input(&mut self, tensor: &RgbNhwcFrame) -> Result<(), Self::Error> {
      self.last_input = tensor.as_nhwc().to_vec();
      Ok(())
    }

    fn run(&mut self) -> Result<(), Self::Error> {
      if self.fail {
        return Err(Offline);
      }
      let runs = self.outputs.get(0).map_or(0.0, |t| t[0]);
      self.outputs.set(0, &[runs + 1.0]);
      Ok(())
    }

    fn outputs(&mut self) -> Result<&RawOutputs, Self::Error> {
      Ok(&self.outputs)
    }
  }

  struct OneBox;

  impl PostProcess for OneBox {
    fn post_process(&self, _: &RawOutputs, _: f32, _: f32) -> DetectionList {
      vec![DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: BoundingBox::new(100.0, 100.0, 200.0, 200.0),
      }]
    }
  }

  fn engine(fail: bool) -> RecordingEngine {
    RecordingEngine {
      size: (640, 640),
      last_input: Vec::new(),
      fail,
      outputs: RawOutputs::new(vec![vec![0.0]]),
    }
  }

  /// 把第 0 个输出当作检测框分数原样交出
  struct EchoScore;

  impl PostProcess for EchoScore {
    fn post_process(&self, outputs: &RawOutputs, _: f32, _: f32) -> DetectionList {
      outputs
        .get(0)
        .map(|t| DetectItem {
          class_id: 0,
          score: t[0],
          bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        })
        .into_iter()
        .collect()
    }
  }

  #[test]
  fn boxes_are_remapped_into_frame_space() {
    let mut detector = Detector::new(engine(false), OneBox).unwrap();
    let mut frame = Frame::new(480, 640, PixelFormat::Rgba8888).unwrap();
    frame.fill(&[10, 20, 30, 255]);

    let items = detector.infer(&frame).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].bbox, BoundingBox::new(20.0, 100.0, 120.0, 200.0));

    // 左侧 80 列为填充，之后为 RGB 图像
    let input = &detector.engine().last_input;
    assert_eq!(&input[..3], &[114, 114, 114]);
    assert_eq!(&input[80 * 3..80 * 3 + 3], &[10, 20, 30]);
  }

  #[test]
  fn engine_failure_is_reported() {
    let mut detector = Detector::new(engine(true), OneBox).unwrap();
    let frame = Frame::new(64, 64, PixelFormat::Rgba8888).unwrap();
    assert!(matches!(
      detector.infer(&frame),
      Err(DetectError::Engine(_))
    ));
  }

  #[test]
  fn engine_outputs_reach_post_process_every_frame() {
    let mut detector = Detector::new(engine(false), EchoScore).unwrap();
    let frame = Frame::new(64, 64, PixelFormat::Rgba8888).unwrap();
    assert_eq!(detector.infer(&frame).unwrap()[0].score, 1.0);
    assert_eq!(detector.infer(&frame).unwrap()[0].score, 2.0);
  }
}
