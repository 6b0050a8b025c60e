// 该文件是 Qianli （千里眼） 项目的一部分。
// src/startup.rs - 启动与模型安装
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
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  acquire::FrameAcquirer,
  config::PipelineConfig,
  emit::ResultEmitter,
  labels::{ClassNameTable, ClassTableLoadError},
  model::{DetectionEngine, ModelHandle, ModelLoadError},
  scheduler::{Detector, InferenceScheduler},
};

#[derive(Error, Debug)]
pub enum StartupError {
  #[error(transparent)]
  Model(#[from] ModelLoadError),
  #[error(transparent)]
  ClassTable(#[from] ClassTableLoadError),
}

pub struct LoadedModel {
  pub model: ModelHandle,
  pub classes: ClassNameTable,
}

pub fn ensure_storage_dir(dir: &Path) -> Result<(), ModelLoadError> {
  fs::create_dir_all(dir).map_err(|source| ModelLoadError::StorageDir {
    path: dir.display().to_string(),
    source,
  })
}

/// 把内置资源复制到存储目录。目标已存在时不覆盖。
pub fn install_asset(
  assets_dir: &Path,
  storage_dir: &Path,
  name: &str,
) -> Result<PathBuf, ModelLoadError> {
  let target = storage_dir.join(name);
  if target.is_file() {
    debug!("资源文件已存在: {}", target.display());
    return Ok(target);
  }

  let source = assets_dir.join(name);
  if !source.is_file() {
    return Err(ModelLoadError::AssetMissing(source.display().to_string()));
  }
  fs::copy(&source, &target).map_err(|source| ModelLoadError::Install {
    path: target.display().to_string(),
    source,
  })?;
  make_read_write(&target)?;
  info!("安装资源文件 {} -> {}", source.display(), target.display());
  Ok(target)
}

#[cfg(unix)]
fn make_read_write(path: &Path) -> Result<(), ModelLoadError> {
  use std::os::unix::fs::PermissionsExt;

  fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(|source| {
    ModelLoadError::Permissions {
      path: path.display().to_string(),
      source,
    }
  })
}

#[cfg(not(unix))]
fn make_read_write(path: &Path) -> Result<(), ModelLoadError> {
  let to_err = |source| ModelLoadError::Permissions {
    path: path.display().to_string(),
    source,
  };
  let mut perms = fs::metadata(path).map_err(to_err)?.permissions();
  perms.set_readonly(false);
  fs::set_permissions(path, perms).map_err(to_err)
}

/// 安装模型文件，加载类别表与模型，并校验模型输入尺寸
pub fn load(config: &PipelineConfig) -> Result<LoadedModel, StartupError> {
  let storage = &config.storage;
  ensure_storage_dir(&storage.storage_dir)?;
  let weights = install_asset(&storage.assets_dir, &storage.storage_dir, &storage.weights_file)?;
  let graph = install_asset(&storage.assets_dir, &storage.storage_dir, &storage.graph_file)?;

  let classes = ClassNameTable::load(storage.assets_dir.join(&storage.labels_file))?;
  let model = ModelHandle::load(&weights, &graph)?;

  let expected = (
    config.preprocess.target_width,
    config.preprocess.target_height,
  );
  let actual = model.descriptor().input_size();
  if actual != expected {
    return Err(
      ModelLoadError::ShapeMismatch {
        model: actual,
        config: expected,
      }
      .into(),
    );
  }

  Ok(LoadedModel { model, classes })
}

/// 构建调度器。任何加载失败都会使调度器进入直通模式。
pub fn start(config: &PipelineConfig, emitter: Arc<ResultEmitter>) -> InferenceScheduler {
  let acquirer = FrameAcquirer::new(config.detection.rotation);
  match load(config) {
    Ok(LoadedModel { model, classes }) => {
      let detector = Detector::new(
        DetectionEngine::new(model),
        classes,
        config.preprocess.clone(),
        config.detection.confidence_threshold,
      );
      InferenceScheduler::new(detector, acquirer, emitter)
    }
    Err(e) => {
      error!("模型加载失败: {}", e);
      InferenceScheduler::passthrough(acquirer, emitter)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::StorageConfig;

  fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig {
      storage: StorageConfig {
        storage_dir: root.join("storage"),
        assets_dir: root.join("assets"),
        ..Default::default()
      },
      ..Default::default()
    }
  }

  #[test]
  fn installs_missing_asset() {
    let dir = tempfile::tempdir().unwrap();
    let assets = dir.path().join("assets");
    let storage = dir.path().join("storage");
    fs::create_dir_all(&assets).unwrap();
    fs::write(assets.join("graph.toml"), "bundled").unwrap();
    ensure_storage_dir(&storage).unwrap();

    let installed = install_asset(&assets, &storage, "graph.toml").unwrap();
    assert_eq!(installed, storage.join("graph.toml"));
    assert_eq!(fs::read_to_string(&installed).unwrap(), "bundled");

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      let mode = fs::metadata(&installed).unwrap().permissions().mode();
      assert_eq!(mode & 0o777, 0o644);
    }
  }

  #[test]
  fn existing_file_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let assets = dir.path().join("assets");
    let storage = dir.path().join("storage");
    fs::create_dir_all(&assets).unwrap();
    fs::create_dir_all(&storage).unwrap();
    fs::write(assets.join("graph.toml"), "bundled").unwrap();
    fs::write(storage.join("graph.toml"), "local").unwrap();

    install_asset(&assets, &storage, "graph.toml").unwrap();
    assert_eq!(fs::read_to_string(storage.join("graph.toml")).unwrap(), "local");
  }

  #[test]
  fn missing_asset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let result = install_asset(dir.path(), dir.path(), "model.onnx");
    assert!(matches!(result, Err(ModelLoadError::AssetMissing(_))));
  }

  #[test]
  fn storage_dir_is_created_before_assets_are_checked() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let result = load(&config);
    assert!(matches!(
      result,
      Err(StartupError::Model(ModelLoadError::AssetMissing(_)))
    ));
    assert!(config.storage.storage_dir.is_dir());
  }

  #[test]
  fn missing_class_table_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    fs::create_dir_all(&config.storage.assets_dir).unwrap();
    fs::write(config.storage.assets_dir.join("frozen_inference_graph.onnx"), b"x").unwrap();
    fs::write(
      config.storage.assets_dir.join("graph.toml"),
      "[input]\nwidth = 300\nheight = 300\n",
    )
    .unwrap();

    assert!(matches!(load(&config), Err(StartupError::ClassTable(_))));
  }

  #[test]
  fn failed_load_starts_in_passthrough() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = start(&config_in(dir.path()), Arc::new(ResultEmitter::new()));
    assert!(scheduler.is_passthrough());
  }
}
