// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 连续运行任务
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

use std::sync::mpsc::{Receiver, Sender, channel};
use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
  accel::Accelerator,
  capture::CaptureDevice,
  display::DisplaySurface,
  frame::Frame,
  model::{DetectionList, Model},
  pipeline::{Pipeline, PipelineError},
};

/// 收到中断后等待主循环退出的最长时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每次迭代之间检查 `stop`，收到消息即停止
  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 安装 Ctrl-C 处理：通知主循环退出，超时后强制结束进程
  pub fn with_ctrlc(self) -> Result<Self, ctrlc::Error> {
    let (tx, rx): (Sender<()>, Receiver<()>) = channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    Ok(self.with_stop_signal(rx))
  }

  fn stop_requested(&self) -> bool {
    self
      .stop
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  /// 返回处理的帧数；缓冲池错误会中止循环并返回
  pub fn run_task<C, A, M, S>(
    &self,
    pipeline: &mut Pipeline<C, A, M, S>,
  ) -> Result<usize, PipelineError>
  where
    C: CaptureDevice,
    A: Accelerator,
    M: Model<Input = Frame, Output = DetectionList>,
    M::Error: std::fmt::Display,
    S: DisplaySurface,
  {
    info!("开始任务...");
    let mut frames = 0usize;

    loop {
      if self.stop_requested() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      pipeline.run_once()?;
      frames += 1;

      if self.frame_number.map(|n| frames >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frames);
        break;
      }
    }

    pipeline.stop();
    info!("任务完成，共处理 {} 帧", frames);
    Ok(frames)
  }
}
