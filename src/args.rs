// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use clap::Parser;

/// 摄像头 → NPU → LCD 实时检测
///
/// 模型、显示设备与字体通过环境变量 SHANAN_MODEL、SHANAN_FRAMEBUFFER、
/// SHANAN_FONT 覆盖，采集参数通过 SHANAN_CAPTURE_SIZE、SHANAN_CAPTURE_FPS 覆盖。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 摄像头设备：/dev/video0 或 v4l2:///dev/video0
  #[arg(value_name = "DEVICE")]
  pub device: String,
}
