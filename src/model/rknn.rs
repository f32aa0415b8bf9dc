// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknn.rs - RKNN 推理引擎
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

use rknpu::{Context, InitFlags};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{InferenceEngine, RawOutputs};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, FrameFormat, RgbNhwcFrame, TensorFormat, TensorType},
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 3;
const RKNN_DEFAULT_INPUT: (u32, u32) = (640, 640);

#[derive(Error, Debug)]
pub enum RknnError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("读取第 {index} 个输出失败: {message}")]
  OutputError { index: usize, message: String },
  #[error("输入张量尺寸 {actual:?} 与模型输入 {expected:?} 不一致")]
  InputShape {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

impl From<std::io::Error> for RknnError {
  fn from(err: std::io::Error) -> Self {
    RknnError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnError {
  fn from(err: rknpu::Error) -> Self {
    RknnError::RknnError(err)
  }
}

impl RknnError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
  input_size: (u32, u32),
}

impl FromUrl for RknnEngineBuilder {
  type Error = RknnError;

  /// `rknn:///绝对路径.rknn` 或 `rknn://相对目录/模型.rknn`，
  /// 可选参数 `?width=640&height=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = match url.host_str() {
      Some(host) if !host.is_empty() => format!("{}{}", host, url.path()),
      _ => url.path().to_string(),
    };
    if model_path.is_empty() || model_path == "/" {
      return Err(RknnError::ModelPathError(url.to_string()));
    }

    let mut input_size = RKNN_DEFAULT_INPUT;
    for (key, value) in url.query_pairs() {
      let parsed = value
        .parse::<u32>()
        .map_err(|_| RknnError::ModelPathError(format!("{}={} 不是有效数字", key, value)))?;
      match key.as_ref() {
        "width" => input_size.0 = parsed,
        "height" => input_size.1 = parsed,
        _ => debug!("忽略未知参数: {}", key),
      }
    }

    Ok(Self::new(model_path).input_size(input_size.0, input_size.1))
  }
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl RknnEngineBuilder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      flags: InitFlags::default(),
      input_size: RKNN_DEFAULT_INPUT,
    }
  }

  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_size = (width, height);
    self
  }

  pub fn model_path(&self) -> &str {
    &self.model_path
  }

  pub fn build(self) -> Result<RknnEngine, RknnError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;
    info!("模型加载完成");

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          info!("RKNN API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          info!("RKNN 驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnError::invalid("无法获取输出数量", e))?;
    info!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);

    if num_inputs != RKNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(RknnError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if num_outputs != RKNN_NUM_OUTPUTS {
      let msg = format!(
        "预期模型输出数量为 {}, 实际为 {}",
        RKNN_NUM_OUTPUTS, num_outputs
      );
      error!("{}", msg);
      return Err(RknnError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    Ok(RknnEngine {
      context,
      input_size: self.input_size,
      num_outputs: num_outputs as usize,
      outputs: RawOutputs::default(),
    })
  }
}

fn rknn_format(format: TensorFormat) -> rknpu::TensorFormat {
  match format {
    TensorFormat::Nhwc => rknpu::TensorFormat::NHWC,
    TensorFormat::Nchw => rknpu::TensorFormat::NCHW,
  }
}

fn rknn_type(ty: TensorType) -> rknpu::TensorType {
  match ty {
    TensorType::UInt8 => rknpu::TensorType::UInt8,
  }
}

pub struct RknnEngine {
  context: Context,
  input_size: (u32, u32),
  num_outputs: usize,
  outputs: RawOutputs,
}

impl InferenceEngine for RknnEngine {
  type Error = RknnError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn set_input(&mut self, tensor: &RgbNhwcFrame) -> Result<(), Self::Error> {
    let actual = (tensor.width() as u32, tensor.height() as u32);
    if actual != self.input_size {
      return Err(RknnError::InputShape {
        expected: self.input_size,
        actual,
      });
    }

    debug!("设置模型输入");
    self.context.set_input(
      0,
      tensor.as_nhwc(),
      rknn_format(tensor.tensor_format()),
      rknn_type(tensor.tensor_type()),
    )?;
    Ok(())
  }

  fn run(&mut self) -> Result<(), Self::Error> {
    debug!("执行模型推理");
    self.context.run()?;
    Ok(())
  }

  fn outputs(&mut self) -> Result<&RawOutputs, Self::Error> {
    debug!("获取模型输出");
    let output = self.context.get_outputs()?;

    for index in 0..self.num_outputs {
      let data = output
        .get_f32(index)
        .map_err(|e| RknnError::OutputError {
          index,
          message: e.to_string(),
        })?;
      self.outputs.set(index, data);
    }
    Ok(&self.outputs)
  }
}
