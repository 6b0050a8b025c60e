// 该文件是 Qianli （千里眼） 项目的一部分。
// src/preprocess.rs - 推理输入预处理
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

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use serde::Deserialize;
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::frame::{CanonicalImage, RGB_CHANNELS};

const DEFAULT_INPUT_SIZE: u32 = 300;
// 255 / 2
const DEFAULT_MEAN_VALUE: f32 = 127.5;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
  pub target_width: u32,
  pub target_height: u32,
  pub scale_factor: f32,
  pub mean_value: f32,
  pub swap_red_blue: bool,
}

impl Default for PreprocessConfig {
  fn default() -> Self {
    Self {
      target_width: DEFAULT_INPUT_SIZE,
      target_height: DEFAULT_INPUT_SIZE,
      scale_factor: 1.0 / DEFAULT_MEAN_VALUE,
      mean_value: DEFAULT_MEAN_VALUE,
      swap_red_blue: true,
    }
  }
}

/// NCHW 单批次 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceBlob {
  tensor: Array4<f32>,
}

impl InferenceBlob {
  /// `[batch, channels, height, width]`
  pub fn shape(&self) -> [usize; 4] {
    let (n, c, h, w) = self.tensor.dim();
    [n, c, h, w]
  }

  pub fn as_array(&self) -> &Array4<f32> {
    &self.tensor
  }
}

impl From<Array4<f32>> for InferenceBlob {
  fn from(tensor: Array4<f32>) -> Self {
    Self { tensor }
  }
}

/// 缩放到目标尺寸，逐通道 `(pixel - mean) * scale`，按需交换红蓝通道
pub fn preprocess(image: &CanonicalImage, cfg: &PreprocessConfig) -> InferenceBlob {
  let (width, height) = (cfg.target_width, cfg.target_height);
  let resized = if image.width() == width && image.height() == height {
    Cow::Borrowed(image.as_rgb())
  } else {
    Cow::Owned(imageops::resize(
      image.as_rgb(),
      width,
      height,
      FilterType::Triangle,
    ))
  };

  let tensor = Array4::from_shape_fn(
    (1, RGB_CHANNELS, height as usize, width as usize),
    |(_, c, y, x)| {
      let channel = if cfg.swap_red_blue { RGB_CHANNELS - 1 - c } else { c };
      let value = resized.get_pixel(x as u32, y as u32)[channel] as f32;
      (value - cfg.mean_value) * cfg.scale_factor
    },
  );

  InferenceBlob { tensor }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn gradient(width: u32, height: u32) -> CanonicalImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    })
    .into()
  }

  #[test]
  fn output_shape_follows_config() {
    let blob = preprocess(&gradient(640, 480), &PreprocessConfig::default());
    assert_eq!(blob.shape(), [1, 3, 300, 300]);
  }

  #[test]
  fn identical_inputs_give_identical_tensors() {
    let image = gradient(123, 77);
    let cfg = PreprocessConfig::default();
    assert_eq!(preprocess(&image, &cfg), preprocess(&image, &cfg));
  }

  #[test]
  fn values_are_mean_shifted_and_scaled() {
    let image: CanonicalImage = RgbImage::from_pixel(4, 4, Rgb([255, 0, 255])).into();
    let cfg = PreprocessConfig {
      target_width: 4,
      target_height: 4,
      swap_red_blue: false,
      ..Default::default()
    };
    let blob = preprocess(&image, &cfg);
    let tensor = blob.as_array();
    assert!((tensor[[0, 0, 1, 1]] - 1.0).abs() < 1e-6);
    assert!((tensor[[0, 1, 1, 1]] + 1.0).abs() < 1e-6);
    assert!((tensor[[0, 2, 1, 1]] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn swap_moves_blue_into_first_channel() {
    let image: CanonicalImage = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0])).into();
    let cfg = PreprocessConfig {
      target_width: 2,
      target_height: 2,
      ..Default::default()
    };
    let blob = preprocess(&image, &cfg);
    let tensor = blob.as_array();
    assert!((tensor[[0, 0, 0, 0]] + 1.0).abs() < 1e-6);
    assert!((tensor[[0, 2, 0, 0]] - 1.0).abs() < 1e-6);
  }
}
