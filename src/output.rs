// 该文件是 Qianli （千里眼） 项目的一部分。
// src/output.rs - 检测结果订阅者
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

use std::io::Write;

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  emit::{DetectionEvent, ResultEmitter, events_to_json},
};

pub trait Subscribe: Sized {
  /// 将自身注册为发布器的订阅者
  fn subscribe(self, emitter: &ResultEmitter);
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 每个批次输出一行 JSON 数组到标准输出
///
/// `stdout://`
#[derive(Debug, Default)]
pub struct StdoutOutput;

impl StdoutOutput {
  pub fn render(events: &[DetectionEvent]) -> Option<String> {
    match events_to_json(events) {
      Ok(line) => Some(line),
      Err(e) => {
        error!("无法序列化检测结果: {}", e);
        None
      }
    }
  }
}

impl FromUrl for StdoutOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(StdoutOutput)
  }
}

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl Subscribe for StdoutOutput {
  fn subscribe(self, emitter: &ResultEmitter) {
    emitter.register_listener(|events| {
      let Some(line) = StdoutOutput::render(events) else {
        return;
      };
      let mut stdout = std::io::stdout().lock();
      if let Err(e) = writeln!(stdout, "{}", line).and_then(|_| stdout.flush()) {
        error!("无法写入标准输出: {}", e);
      }
    });
  }
}

/// 把每个检测对象写入日志
///
/// `log://`
#[derive(Debug, Default)]
pub struct LogOutput;

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(LogOutput)
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl Subscribe for LogOutput {
  fn subscribe(self, emitter: &ResultEmitter) {
    emitter.register_listener(|events| {
      for event in events {
        info!(
          "检测到 {} 位于 ({:.3}, {:.3}) 尺寸 {:.3}x{:.3}",
          event.class_name, event.r_x, event.r_y, event.r_width, event.r_height
        );
      }
    });
  }
}

pub enum OutputWrapper {
  Stdout(StdoutOutput),
  Log(LogOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      StdoutOutput::SCHEME => Ok(OutputWrapper::Stdout(StdoutOutput::from_url(url)?)),
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Subscribe for OutputWrapper {
  fn subscribe(self, emitter: &ResultEmitter) {
    match self {
      OutputWrapper::Stdout(output) => output.subscribe(emitter),
      OutputWrapper::Log(output) => output.subscribe(emitter),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::postprocess::{Detection, DetectionBatch};

  #[test]
  fn dispatches_on_scheme() {
    let stdout = Url::parse("stdout://").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&stdout),
      Ok(OutputWrapper::Stdout(_))
    ));
    let log = Url::parse("log://").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&log),
      Ok(OutputWrapper::Log(_))
    ));
    let other = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&other),
      Err(OutputError::SchemeMismatch)
    ));
  }

  #[test]
  fn renders_one_json_array_per_batch() {
    let events = vec![DetectionEvent {
      class_name: "cat".to_string(),
      r_x: 0.5,
      r_y: 0.25,
      r_width: 0.5,
      r_height: 0.5,
    }];
    assert_eq!(
      StdoutOutput::render(&events).unwrap(),
      r#"[{"className":"cat","rX":0.5,"rY":0.25,"rWidth":0.5,"rHeight":0.5}]"#
    );
  }

  #[test]
  fn subscribing_registers_a_listener() {
    let emitter = ResultEmitter::new();
    LogOutput.subscribe(&emitter);
    let batch = DetectionBatch {
      frame_index: 0,
      items: vec![Detection {
        class_name: "cat".to_string(),
        r_x: 0.0,
        r_y: 0.0,
        r_width: 1.0,
        r_height: 1.0,
      }],
    };
    assert!(emitter.emit(&batch));
  }
}
