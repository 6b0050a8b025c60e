// 该文件是 Qianli （千里眼） 项目的一部分。
// src/task.rs - 帧生产任务
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

use std::{
  sync::mpsc::{self, Receiver},
  thread,
  time::Duration,
};

use tracing::{info, warn};
use tract_onnx::prelude::tract_ndarray::ArrayD;

use crate::{
  frame::VideoFrame,
  model::Model,
  preprocess::InferenceBlob,
  scheduler::InferenceScheduler,
};

pub trait Task<I, M>: Sized {
  type Error;
  fn run_task(self, input: I, scheduler: &InferenceScheduler<M>) -> Result<TaskReport, Self::Error>;
}

/// 已交付帧的统计。`accepted` 为启动了推理的帧数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
  pub submitted: u64,
  pub accepted: u64,
}

impl TaskReport {
  pub fn dropped(&self) -> u64 {
    self.submitted - self.accepted
  }
}

/// 交付一帧并等待推理结束
pub struct OneShotTask;

impl<I, M> Task<I, M> for OneShotTask
where
  I: Iterator<Item = VideoFrame>,
  M: Model<Input = InferenceBlob, Output = ArrayD<f32>> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    scheduler: &InferenceScheduler<M>,
  ) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let now = std::time::Instant::now();
    let (_, accepted) = scheduler.try_submit(frame);
    if !accepted {
      warn!("该帧没有启动推理");
    }
    scheduler.wait_idle();
    info!("推理完成，耗时: {:.2?}", now.elapsed());

    Ok(TaskReport {
      submitted: 1,
      accepted: accepted as u64,
    })
  }
}

/// 按视频源节奏持续交付帧，推理忙碌时帧被丢弃
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  stop: Option<Receiver<()>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 收到消息或发送端断开时停止
  pub fn with_stop_signal(mut self, stop: Receiver<()>) -> Self {
    self.stop = Some(stop);
    self
  }

  /// 安装 Ctrl-C 处理器作为停止信号
  pub fn with_ctrlc(self) -> Result<Self, ctrlc::Error> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(self.with_stop_signal(rx))
  }

  fn should_stop(&self) -> bool {
    match &self.stop {
      Some(rx) => !matches!(rx.try_recv(), Err(mpsc::TryRecvError::Empty)),
      None => false,
    }
  }
}

impl<I, M> Task<I, M> for ContinuousTask
where
  I: Iterator<Item = VideoFrame>,
  M: Model<Input = InferenceBlob, Output = ArrayD<f32>> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, scheduler: &InferenceScheduler<M>) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let mut report = TaskReport::default();

    for frame in input {
      if self.should_stop() {
        warn!("中断信号接收，退出任务循环");
        break;
      }

      let (_, accepted) = scheduler.try_submit(frame);
      report.submitted += 1;
      report.accepted += accepted as u64;

      if self.frame_number.is_some_and(|n| report.submitted >= n) {
        info!("达到指定帧数 {}, 退出任务循环", report.submitted);
        break;
      }
    }

    scheduler.wait_idle();
    info!(
      "任务完成，共交付 {} 帧，推理 {} 帧，丢弃 {} 帧",
      report.submitted,
      report.accepted,
      report.dropped()
    );
    Ok(report)
  }
}
