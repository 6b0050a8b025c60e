// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model/onnx.rs - ONNX 模型加载与推理
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

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use tract_onnx::prelude::*;

use super::{DETECTION_ROW_WIDTH, Model};
use crate::preprocess::InferenceBlob;

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("无法创建存储目录 {path}: {source}")]
  StorageDir {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("缺少内置资源文件: {0}")]
  AssetMissing(String),
  #[error("无法安装资源文件 {path}: {source}")]
  Install {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("无法设置文件权限 {path}: {source}")]
  Permissions {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("模型文件不存在: {0}")]
  MissingFile(String),
  #[error("无法读取图定义文件 {path}: {source}")]
  GraphRead {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("图定义文件格式错误: {0}")]
  GraphParse(#[from] toml::de::Error),
  #[error("模型输入 {model:?} 与预处理尺寸 {config:?} 不一致")]
  ShapeMismatch { model: (u32, u32), config: (u32, u32) },
  #[error("模型描述无效: {0}")]
  InvalidGraph(String),
  #[error(transparent)]
  Backend(#[from] TractError),
}

#[derive(Error, Debug)]
pub enum ModelRunError {
  #[error(transparent)]
  Backend(#[from] TractError),
  #[error("模型没有输出")]
  NoOutput,
}

fn default_channels() -> u32 {
  3
}

fn default_row_width() -> usize {
  DETECTION_ROW_WIDTH
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputDescriptor {
  #[serde(default)]
  pub name: Option<String>,
  pub width: u32,
  pub height: u32,
  #[serde(default = "default_channels")]
  pub channels: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutputDescriptor {
  #[serde(default = "default_row_width")]
  pub row_width: usize,
}

impl Default for OutputDescriptor {
  fn default() -> Self {
    Self {
      row_width: DETECTION_ROW_WIDTH,
    }
  }
}

/// 图定义文件，描述网络输入尺寸与输出布局
///
/// ```toml
/// [input]
/// name = "image_tensor"
/// width = 300
/// height = 300
///
/// [output]
/// row_width = 7
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GraphDescriptor {
  pub input: InputDescriptor,
  #[serde(default)]
  pub output: OutputDescriptor,
}

impl GraphDescriptor {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ModelLoadError::GraphRead {
      path: path.display().to_string(),
      source,
    })?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, ModelLoadError> {
    let descriptor: GraphDescriptor = toml::from_str(text)?;
    descriptor.validate()?;
    Ok(descriptor)
  }

  fn validate(&self) -> Result<(), ModelLoadError> {
    if self.input.width == 0 || self.input.height == 0 {
      return Err(ModelLoadError::InvalidGraph(format!(
        "输入尺寸 {}x{} 无效",
        self.input.width, self.input.height
      )));
    }
    if self.input.channels != 3 {
      return Err(ModelLoadError::InvalidGraph(format!(
        "输入通道数必须为 3, 实际为 {}",
        self.input.channels
      )));
    }
    if self.output.row_width != DETECTION_ROW_WIDTH {
      return Err(ModelLoadError::InvalidGraph(format!(
        "输出行宽必须为 {}, 实际为 {}",
        DETECTION_ROW_WIDTH, self.output.row_width
      )));
    }
    Ok(())
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.input.width, self.input.height)
  }
}

/// 已加载的网络（图 + 权重），加载后只读，可在线程间共享
pub struct ModelHandle {
  plan: TypedRunnableModel<TypedModel>,
  descriptor: GraphDescriptor,
}

impl ModelHandle {
  /// 由权重文件与图定义文件构建，使用 CPU 推理后端
  pub fn load(weights: impl AsRef<Path>, graph: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    let weights = weights.as_ref();
    let descriptor = GraphDescriptor::load(graph)?;
    if !weights.is_file() {
      return Err(ModelLoadError::MissingFile(weights.display().to_string()));
    }

    info!("加载模型文件: {}", weights.display());
    let (width, height) = descriptor.input_size();
    let shape = [
      1,
      descriptor.input.channels as usize,
      height as usize,
      width as usize,
    ];
    debug!("模型输入形状: {:?}", shape);

    let plan = tract_onnx::onnx()
      .model_for_path(weights)?
      .with_input_fact(0, f32::fact(shape).into())?
      .into_optimized()?
      .into_runnable()?;
    info!("模型加载完成，使用 CPU 推理后端");

    Ok(Self { plan, descriptor })
  }

  pub fn descriptor(&self) -> &GraphDescriptor {
    &self.descriptor
  }
}

impl Model for ModelHandle {
  type Input = InferenceBlob;
  type Output = tract_ndarray::ArrayD<f32>;
  type Error = ModelRunError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let tensor: Tensor = input.as_array().clone().into();
    let outputs = self.plan.run(tvec!(tensor.into()))?;
    let output = outputs.first().ok_or(ModelRunError::NoOutput)?;
    Ok(output.to_array_view::<f32>()?.to_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_descriptor_with_defaults() {
    let descriptor = GraphDescriptor::parse("[input]\nwidth = 300\nheight = 300\n").unwrap();
    assert_eq!(descriptor.input_size(), (300, 300));
    assert_eq!(descriptor.input.channels, 3);
    assert_eq!(descriptor.output.row_width, 7);
  }

  #[test]
  fn rejects_bad_descriptors() {
    assert!(matches!(
      GraphDescriptor::parse("[input]\nwidth = 300\n"),
      Err(ModelLoadError::GraphParse(_))
    ));
    assert!(matches!(
      GraphDescriptor::parse("[input]\nwidth = 0\nheight = 300\n"),
      Err(ModelLoadError::InvalidGraph(_))
    ));
    assert!(matches!(
      GraphDescriptor::parse("[input]\nwidth = 300\nheight = 300\n[output]\nrow_width = 6\n"),
      Err(ModelLoadError::InvalidGraph(_))
    ));
  }

  #[test]
  fn missing_weights_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let graph = dir.path().join("graph.toml");
    std::fs::write(&graph, "[input]\nwidth = 300\nheight = 300\n").unwrap();
    let result = ModelHandle::load(dir.path().join("model.onnx"), &graph);
    assert!(matches!(result, Err(ModelLoadError::MissingFile(_))));
  }

  #[test]
  fn corrupt_weights_fail_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let graph = dir.path().join("graph.toml");
    let weights = dir.path().join("model.onnx");
    std::fs::write(&graph, "[input]\nwidth = 300\nheight = 300\n").unwrap();
    std::fs::write(&weights, b"definitely not protobuf").unwrap();
    assert!(ModelHandle::load(&weights, &graph).is_err());
  }
}
