// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/stream.rs - 连续视频流检测
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

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use qianli::{
  FromUrl,
  config::PipelineConfig,
  emit::ResultEmitter,
  input::InputWrapper,
  output::{OutputWrapper, Subscribe},
  startup,
  task::{ContinuousTask, Task},
};

/// Qianli 视频流检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径，缺省时使用默认配置
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 检测结果输出
  #[arg(long, value_name = "OUTPUT", default_value = "stdout://")]
  pub output: Url,
  /// 置信度阈值，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::load(path)?,
    None => PipelineConfig::default(),
  };
  if let Some(threshold) = args.threshold {
    config.detection.confidence_threshold = threshold;
  }
  config.validate()?;

  let emitter = Arc::new(ResultEmitter::new());
  OutputWrapper::from_url(&args.output)?.subscribe(&emitter);

  let scheduler = startup::start(&config, emitter);
  let input = InputWrapper::from_url(&args.input)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_ctrlc()?
    .run_task(input, &scheduler)?;

  scheduler.shutdown();
  Ok(())
}
