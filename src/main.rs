// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shanan_live::{
  FromUrl,
  accel::CpuAccelerator,
  buffer_pool::BufferPool,
  capture::{CaptureDevice, V4l2Capture},
  config::PipelineConfig,
  detector::Detector,
  display::FbDisplay,
  model::{RknnEngineBuilder, Yolov5PostProcess},
  overlay::Overlay,
  pipeline::Pipeline,
  task::ContinuousTask,
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = PipelineConfig::from_env().context("配置无效")?;

  let capture_url = config.capture_url(&args.device)?;
  let model_url = config.model_url()?;
  let framebuffer_url = config.framebuffer_url()?;
  info!("摄像头: {}", capture_url);
  info!("模型: {}", model_url);
  info!("显示: {}", framebuffer_url);

  // 显示设备先于摄像头打开，失败时不必启动采集
  let display = FbDisplay::from_url(&framebuffer_url).context("无法打开显示设备")?;

  let mut capture = V4l2Capture::from_url(&capture_url).context("无法打开摄像头")?;
  let capture_format = capture
    .configure(&config.capture)
    .context("无法设置采集格式")?;
  capture.start().context("无法启动采集")?;
  let pool = BufferPool::new(capture)?;

  let engine = RknnEngineBuilder::from_url(&model_url)?
    .build()
    .context("无法加载模型")?;
  let post = Yolov5PostProcess::new(config.model_input.0, config.model_input.1);
  let detector = Detector::new(engine, post)?
    .with_thresholds(config.box_threshold, config.nms_threshold)
    .with_background(config.letterbox_background);

  let overlay = match &config.font {
    Some(path) => Overlay::default().load_font(path)?,
    None => {
      info!("使用内置标签字体");
      Overlay::default()
    }
  };

  let mut pipeline = Pipeline::new(
    pool,
    CpuAccelerator::new(),
    detector,
    overlay,
    display,
    capture_format,
    config.rotation,
  )?;

  let frames = ContinuousTask::default()
    .with_ctrlc()
    .context("无法设置 Ctrl-C 处理")?
    .run_task(&mut pipeline)?;

  info!("退出，共处理 {} 帧", frames);
  Ok(())
}
