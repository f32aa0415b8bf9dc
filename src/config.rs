// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 流水线配置
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

//! 流水线的全部设计常量。
//!
//! 命令行只接收摄像头设备，部署相关的覆盖项来自环境变量。

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  capture::CaptureFormat,
  detector::{BOX_THRESHOLD, LETTERBOX_BACKGROUND, NMS_THRESHOLD},
  frame::PixelFormat,
  transform::Rotation,
};

pub const ENV_MODEL: &str = "SHANAN_MODEL";
pub const ENV_FRAMEBUFFER: &str = "SHANAN_FRAMEBUFFER";
pub const ENV_FONT: &str = "SHANAN_FONT";
pub const ENV_CAPTURE_SIZE: &str = "SHANAN_CAPTURE_SIZE";
pub const ENV_CAPTURE_FPS: &str = "SHANAN_CAPTURE_FPS";

const MAX_BUFFER_COUNT: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("环境变量 {name} 的值无效: {value:?}")]
  InvalidEnv { name: String, value: String },
  #[error("配置无效: {0}")]
  Invalid(String),
  #[error("无法构造 URL {input}: {source}")]
  Url {
    input: String,
    source: url::ParseError,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub capture: CaptureFormat,
  pub buffer_count: usize,
  pub model_path: String,
  /// 模型输入 `(宽, 高)`
  pub model_input: (u32, u32),
  pub framebuffer: String,
  pub font: Option<PathBuf>,
  pub box_threshold: f32,
  pub nms_threshold: f32,
  pub letterbox_background: u8,
  pub rotation: Rotation,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      capture: CaptureFormat::default(),
      buffer_count: 4,
      model_path: "model/yolov5.rknn".to_string(),
      model_input: (640, 640),
      framebuffer: "/dev/fb0".to_string(),
      font: None,
      box_threshold: BOX_THRESHOLD,
      nms_threshold: NMS_THRESHOLD,
      letterbox_background: LETTERBOX_BACKGROUND,
      rotation: Rotation::CounterClockwise90,
    }
  }
}

fn invalid_env(name: &str, value: &str) -> ConfigError {
  ConfigError::InvalidEnv {
    name: name.to_string(),
    value: value.to_string(),
  }
}

/// `640x480`
fn parse_size(value: &str) -> Option<(u32, u32)> {
  let (w, h) = value.trim().split_once(['x', 'X'])?;
  Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn parse_url(input: String) -> Result<Url, ConfigError> {
  Url::parse(&input).map_err(|source| ConfigError::Url { input, source })
}

impl PipelineConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Self::default().apply_env(|name| std::env::var(name).ok())
  }

  /// 用 `lookup` 提供的变量覆盖默认值并校验
  pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(model) = lookup(ENV_MODEL) {
      info!("{} = {}", ENV_MODEL, model);
      self.model_path = model;
    }
    if let Some(fb) = lookup(ENV_FRAMEBUFFER) {
      info!("{} = {}", ENV_FRAMEBUFFER, fb);
      self.framebuffer = fb;
    }
    if let Some(font) = lookup(ENV_FONT) {
      info!("{} = {}", ENV_FONT, font);
      self.font = Some(PathBuf::from(font));
    }
    if let Some(size) = lookup(ENV_CAPTURE_SIZE) {
      let (width, height) = parse_size(&size).ok_or_else(|| invalid_env(ENV_CAPTURE_SIZE, &size))?;
      self.capture.width = width;
      self.capture.height = height;
    }
    if let Some(fps) = lookup(ENV_CAPTURE_FPS) {
      self.capture.fps = fps
        .trim()
        .parse()
        .map_err(|_| invalid_env(ENV_CAPTURE_FPS, &fps))?;
    }

    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let capture = &self.capture;
    if capture.width == 0 || capture.height == 0 {
      return Err(ConfigError::Invalid(format!(
        "采集尺寸不能为 0: {}x{}",
        capture.width, capture.height
      )));
    }
    if capture.pixel_format == PixelFormat::Nv12 && capture.width % 2 != 0 {
      return Err(ConfigError::Invalid(format!(
        "NV12 采集宽度必须为偶数: {}",
        capture.width
      )));
    }
    if capture.fps == 0 {
      return Err(ConfigError::Invalid("采集帧率不能为 0".to_string()));
    }
    if !(1..=MAX_BUFFER_COUNT).contains(&self.buffer_count) {
      return Err(ConfigError::Invalid(format!(
        "缓冲数量必须在 1 到 {} 之间: {}",
        MAX_BUFFER_COUNT, self.buffer_count
      )));
    }
    if self.model_path.trim().is_empty() {
      return Err(ConfigError::Invalid("模型路径为空".to_string()));
    }
    if self.model_input.0 == 0 || self.model_input.1 == 0 {
      return Err(ConfigError::Invalid(format!(
        "模型输入尺寸不能为 0: {:?}",
        self.model_input
      )));
    }
    if self.framebuffer.trim().is_empty() {
      return Err(ConfigError::Invalid("framebuffer 路径为空".to_string()));
    }
    for (name, value) in [
      ("box_threshold", self.box_threshold),
      ("nms_threshold", self.nms_threshold),
    ] {
      if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::Invalid(format!(
          "{} 必须在 (0, 1] 内: {}",
          name, value
        )));
      }
    }
    Ok(())
  }

  /// 命令行的设备参数 → `v4l2://` URL
  ///
  /// 接受 `/dev/video0`、`video0` 或完整的 `v4l2:///dev/video0`。
  pub fn capture_url(&self, device: &str) -> Result<Url, ConfigError> {
    let mut url = if device.contains("://") {
      parse_url(device.to_string())?
    } else if device.starts_with('/') {
      parse_url(format!("v4l2://{}", device))?
    } else {
      parse_url(format!("v4l2:///dev/{}", device))?
    };

    if !url.query_pairs().any(|(k, _)| k == "buffers") {
      url
        .query_pairs_mut()
        .append_pair("buffers", &self.buffer_count.to_string());
    }
    Ok(url)
  }

  /// 绝对路径为 `rknn:///...`，相对路径为 `rknn://...`
  pub fn model_url(&self) -> Result<Url, ConfigError> {
    let mut url = parse_url(format!("rknn://{}", self.model_path))?;
    url
      .query_pairs_mut()
      .append_pair("width", &self.model_input.0.to_string())
      .append_pair("height", &self.model_input.1.to_string());
    Ok(url)
  }

  pub fn framebuffer_url(&self) -> Result<Url, ConfigError> {
    parse_url(format!("fb://{}", self.framebuffer))
  }
}
