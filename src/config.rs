// 该文件是 Qianli （千里眼） 项目的一部分。
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

//! 流水线配置，全部字段都有默认值：
//!
//! ```toml
//! [preprocess]
//! target_width = 300
//! target_height = 300
//! scale_factor = 0.007843
//! mean_value = 127.5
//! swap_red_blue = true
//!
//! [detection]
//! confidence_threshold = 0.5
//! rotation = "none"
//!
//! [storage]
//! storage_dir = "/tmp/qianli"
//! assets_dir = "assets"
//! weights_file = "frozen_inference_graph.onnx"
//! graph_file = "graph.toml"
//! labels_file = "labels.txt"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{acquire::Rotation, preprocess::PreprocessConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
  pub confidence_threshold: f32,
  pub rotation: Rotation,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.5,
      rotation: Rotation::None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
  /// 可写的本地存储目录，模型文件安装于此
  pub storage_dir: PathBuf,
  /// 内置资源目录
  pub assets_dir: PathBuf,
  pub weights_file: String,
  pub graph_file: String,
  pub labels_file: String,
}

impl Default for StorageConfig {
  fn default() -> Self {
    Self {
      storage_dir: std::env::temp_dir().join("qianli"),
      assets_dir: PathBuf::from("assets"),
      weights_file: "frozen_inference_graph.onnx".to_string(),
      graph_file: "graph.toml".to_string(),
      labels_file: "labels.txt".to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub preprocess: PreprocessConfig,
  pub detection: DetectionConfig,
  pub storage: StorageConfig,
}

impl PipelineConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    Self::parse(&text)
  }

  pub fn parse(text: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let pre = &self.preprocess;
    if pre.target_width == 0 || pre.target_height == 0 {
      return Err(ConfigError::Invalid(format!(
        "预处理尺寸 {}x{} 无效",
        pre.target_width, pre.target_height
      )));
    }
    if !pre.scale_factor.is_finite() || !pre.mean_value.is_finite() {
      return Err(ConfigError::Invalid("预处理系数必须是有限值".to_string()));
    }
    if !self.detection.confidence_threshold.is_finite() {
      return Err(ConfigError::Invalid("置信度阈值必须是有限值".to_string()));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_document_gives_defaults() {
    let config = PipelineConfig::parse("").unwrap();
    assert_eq!(config, PipelineConfig::default());
    assert_eq!(config.preprocess.target_width, 300);
    assert_eq!(config.detection.confidence_threshold, 0.5);
    assert_eq!(config.detection.rotation, Rotation::None);
    assert_eq!(config.storage.labels_file, "labels.txt");
  }

  #[test]
  fn partial_sections_keep_other_defaults() {
    let config = PipelineConfig::parse(
      "[detection]\nconfidence_threshold = 0.7\nrotation = \"cw90\"\n\n[preprocess]\nswap_red_blue = false\n",
    )
    .unwrap();
    assert_eq!(config.detection.confidence_threshold, 0.7);
    assert_eq!(config.detection.rotation, Rotation::Cw90);
    assert!(!config.preprocess.swap_red_blue);
    assert_eq!(config.preprocess.mean_value, 127.5);
  }

  #[test]
  fn rejects_zero_target_size() {
    assert!(matches!(
      PipelineConfig::parse("[preprocess]\ntarget_width = 0\n"),
      Err(ConfigError::Invalid(_))
    ));
  }

  #[test]
  fn missing_file_is_read_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      PipelineConfig::load(dir.path().join("none.toml")),
      Err(ConfigError::Read { .. })
    ));
  }
}
