// 该文件是 Qianli （千里眼） 项目的一部分。
// src/bin/oneshot.rs - 单帧检测
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
  task::{OneShotTask, Task},
};

/// Qianli 单帧检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,
  /// 输入来源，例如 image:///path/to/picture.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  #[arg(long, value_name = "OUTPUT", default_value = "stdout://")]
  pub output: Url,
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,
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
  if scheduler.is_passthrough() {
    anyhow::bail!("模型未加载，无法进行检测");
  }

  let input = InputWrapper::from_url(&args.input)?;
  let report = OneShotTask.run_task(input, &scheduler)?;
  info!("交付 {} 帧，推理 {} 帧", report.submitted, report.accepted);

  scheduler.shutdown();
  Ok(())
}
