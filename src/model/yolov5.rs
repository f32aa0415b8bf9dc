// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 后处理
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

use tracing::{debug, warn};

use super::{DetectItem, DetectionList, PostProcess, RawOutputs, nms};
use crate::transform::BoundingBox;

const YOLOV5_CLASS_NUM: usize = 80;
const YOLOV5_PROP_BOX_SIZE: usize = 5 + YOLOV5_CLASS_NUM;
const YOLOV5_NUM_ANCHORS: usize = 3;
const YOLOV5_STRIDES: [u32; 3] = [8, 16, 32];
const YOLOV5_ANCHORS: [[f32; 6]; 3] = [
  [10.0, 13.0, 16.0, 30.0, 33.0, 23.0],
  [30.0, 61.0, 62.0, 45.0, 59.0, 119.0],
  [116.0, 90.0, 156.0, 198.0, 373.0, 326.0],
];

/// 三个检测头（步长 8/16/32）、NCHW 排布的 YOLOv5 输出解码
#[derive(Debug, Clone, Copy)]
pub struct Yolov5PostProcess {
  input_width: u32,
  input_height: u32,
}

impl Yolov5PostProcess {
  pub fn new(input_width: u32, input_height: u32) -> Self {
    Self {
      input_width,
      input_height,
    }
  }

  /// 第 `head` 个输出张量应有的元素数
  pub fn expected_len(&self, head: usize) -> usize {
    let stride = YOLOV5_STRIDES[head];
    let grid = (self.input_height / stride) as usize * (self.input_width / stride) as usize;
    YOLOV5_NUM_ANCHORS * YOLOV5_PROP_BOX_SIZE * grid
  }

  fn decode_head(
    &self,
    head: usize,
    tensor: &[f32],
    box_threshold: f32,
    items: &mut DetectionList,
  ) {
    let stride = YOLOV5_STRIDES[head];
    let grid_h = (self.input_height / stride) as usize;
    let grid_w = (self.input_width / stride) as usize;
    let grid_len = grid_h * grid_w;

    if tensor.len() < self.expected_len(head) {
      warn!(
        "检测头 {}: 输出大小 {} 小于期望 {}",
        head,
        tensor.len(),
        self.expected_len(head)
      );
      return;
    }

    let anchors = &YOLOV5_ANCHORS[head];
    let (max_w, max_h) = (self.input_width as f32, self.input_height as f32);
    let stride = stride as f32;

    for a in 0..YOLOV5_NUM_ANCHORS {
      let base = YOLOV5_PROP_BOX_SIZE * a * grid_len;
      for i in 0..grid_h {
        for j in 0..grid_w {
          let cell = i * grid_w + j;
          let at = |k: usize| tensor[base + k * grid_len + cell];

          let box_conf = at(4);
          if box_conf < box_threshold {
            continue;
          }

          let mut class_id = 0usize;
          let mut max_prob = at(5);
          for c in 1..YOLOV5_CLASS_NUM {
            let prob = at(5 + c);
            if prob > max_prob {
              max_prob = prob;
              class_id = c;
            }
          }

          // 门限分别作用于目标置信度和类别概率，分数是两者之积
          if max_prob <= box_threshold {
            continue;
          }
          let score = box_conf * max_prob;

          let bx = at(0) * 2.0 - 0.5;
          let by = at(1) * 2.0 - 0.5;
          let bw = (at(2) * 2.0).powi(2) * anchors[a * 2];
          let bh = (at(3) * 2.0).powi(2) * anchors[a * 2 + 1];

          let cx = (bx + j as f32) * stride;
          let cy = (by + i as f32) * stride;
          let left = cx - bw / 2.0;
          let top = cy - bh / 2.0;

          items.push(DetectItem {
            class_id: class_id as u32,
            score,
            bbox: BoundingBox {
              left: left.clamp(0.0, max_w),
              top: top.clamp(0.0, max_h),
              right: (left + bw).clamp(0.0, max_w),
              bottom: (top + bh).clamp(0.0, max_h),
            },
          });
        }
      }
    }
  }
}

impl PostProcess for Yolov5PostProcess {
  fn post_process(
    &self,
    outputs: &RawOutputs,
    box_threshold: f32,
    nms_threshold: f32,
  ) -> DetectionList {
    let mut items = Vec::new();

    for head in 0..YOLOV5_STRIDES.len() {
      match outputs.get(head) {
        Some(tensor) => self.decode_head(head, tensor, box_threshold, &mut items),
        None => warn!("缺少第 {} 个输出张量", head),
      }
    }

    debug!("NMS 前候选框数量: {}", items.len());
    let items = nms(items, nms_threshold);
    debug!("检测到 {} 个物体", items.len());
    items
  }
}
