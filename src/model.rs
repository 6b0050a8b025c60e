// 该文件是 Qianli （千里眼） 项目的一部分。
// src/model.rs - 模型与检测引擎
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

use thiserror::Error;
use tract_onnx::prelude::tract_ndarray::ArrayD;
use tracing::debug;

use crate::preprocess::InferenceBlob;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 每行 `(batch, class, confidence, x1, y1, x2, y2)`
pub const DETECTION_ROW_WIDTH: usize = 7;

/// 网络输出的一行，坐标已归一化到 `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionRaw {
  pub batch_index: usize,
  pub class_id: i32,
  pub confidence: f32,
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl DetectionRaw {
  fn from_row(row: &[f32]) -> Self {
    Self {
      batch_index: row[0] as usize,
      class_id: row[1] as i32,
      confidence: row[2],
      left: row[3],
      top: row[4],
      right: row[5],
      bottom: row[6],
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型推理失败: {0}")]
  Model(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("模型输出形状异常: {0:?}")]
  UnexpectedShape(Vec<usize>),
}

/// 持有一个已加载的模型，将其输出整理为检测行
pub struct DetectionEngine<M = ModelHandle> {
  model: M,
}

impl<M> DetectionEngine<M>
where
  M: Model<Input = InferenceBlob, Output = ArrayD<f32>>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M) -> Self {
    Self { model }
  }

  pub fn infer(&self, blob: &InferenceBlob) -> Result<Vec<DetectionRaw>, InferenceError> {
    let output = self
      .model
      .infer(blob)
      .map_err(|e| InferenceError::Model(Box::new(e)))?;
    let rows = rows_from_output(&output)?;
    debug!("模型输出 {} 行检测结果", rows.len());
    Ok(rows)
  }
}

/// 按最后一维（必须为 7）把输出切成检测行，前面的维度全部展平
pub fn rows_from_output(output: &ArrayD<f32>) -> Result<Vec<DetectionRaw>, InferenceError> {
  if output.shape().last() != Some(&DETECTION_ROW_WIDTH) {
    return Err(InferenceError::UnexpectedShape(output.shape().to_vec()));
  }

  let values: Vec<f32> = output.iter().copied().collect();
  Ok(
    values
      .chunks_exact(DETECTION_ROW_WIDTH)
      .map(DetectionRaw::from_row)
      .collect(),
  )
}

mod onnx;
pub use self::onnx::{GraphDescriptor, ModelHandle, ModelLoadError, ModelRunError};

#[cfg(test)]
mod tests {
  use super::*;
  use tract_onnx::prelude::tract_ndarray::IxDyn;

  struct Fixed(ArrayD<f32>);

  #[derive(Error, Debug)]
  #[error("fixed model never fails")]
  struct Never;

  impl Model for Fixed {
    type Input = InferenceBlob;
    type Output = ArrayD<f32>;
    type Error = Never;

    fn infer(&self, _input: &InferenceBlob) -> Result<ArrayD<f32>, Never> {
      Ok(self.0.clone())
    }
  }

  fn blob() -> InferenceBlob {
    tract_onnx::prelude::tract_ndarray::Array4::<f32>::zeros((1, 3, 2, 2)).into()
  }

  #[test]
  fn reshapes_ssd_output_into_rows() {
    let values = vec![
      0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.4, //
      0.0, 15.0, 0.3, 0.5, 0.5, 0.6, 0.7,
    ];
    let output = ArrayD::from_shape_vec(IxDyn(&[1, 1, 2, 7]), values).unwrap();
    let engine = DetectionEngine::new(Fixed(output));
    let rows = engine.infer(&blob()).unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].class_id, 1);
    assert!((rows[0].confidence - 0.9).abs() < 1e-6);
    assert_eq!(rows[1].class_id, 15);
    assert!((rows[1].bottom - 0.7).abs() < 1e-6);
  }

  #[test]
  fn empty_output_gives_no_rows() {
    let output = ArrayD::from_shape_vec(IxDyn(&[1, 1, 0, 7]), vec![]).unwrap();
    let engine = DetectionEngine::new(Fixed(output));
    assert!(engine.infer(&blob()).unwrap().is_empty());
  }

  #[test]
  fn rejects_wrong_row_width() {
    let output = ArrayD::from_shape_vec(IxDyn(&[1, 6]), vec![0.0; 6]).unwrap();
    let engine = DetectionEngine::new(Fixed(output));
    assert!(matches!(
      engine.infer(&blob()),
      Err(InferenceError::UnexpectedShape(shape)) if shape == vec![1, 6]
    ));
  }
}
