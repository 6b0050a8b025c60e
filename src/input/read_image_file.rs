// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::{collections::HashMap, thread, time::Duration};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CpuBuffer, PixelFormat, VideoFrame},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 把一张静态图片当作视频源，重复产出同一帧
///
/// `image:///path/to/picture.png?repeat=100&fps=30`
pub struct ImageFileInput {
  image: RgbImage,
  remaining: Option<u64>,
  interval: Option<Duration>,
  next_index: u64,
}

impl ImageFileInput {
  pub fn new(image: RgbImage) -> Self {
    Self {
      image,
      remaining: Some(1),
      interval: None,
      next_index: 0,
    }
  }

  /// `None` 表示无限重复
  pub fn with_repeat(mut self, repeat: Option<u64>) -> Self {
    self.remaining = repeat;
    self
  }

  pub fn with_fps(mut self, fps: Option<f64>) -> Self {
    self.interval = fps
      .filter(|fps| *fps > 0.0)
      .map(|fps| Duration::from_secs_f64(1.0 / fps));
    self
  }

  fn frame(&self, index: u64) -> VideoFrame {
    let (width, height) = self.image.dimensions();
    VideoFrame::from_cpu(
      index,
      width,
      height,
      CpuBuffer::packed(PixelFormat::Rgb24, width, self.image.as_raw().clone()),
    )
  }
}

fn parse_param<T: std::str::FromStr>(
  query: &HashMap<String, String>,
  key: &str,
) -> Result<Option<T>, ImageFileInputError> {
  query
    .get(key)
    .map(|value| {
      value
        .parse::<T>()
        .map_err(|_| ImageFileInputError::InvalidParameter {
          key: key.to_string(),
          value: value.clone(),
        })
    })
    .transpose()
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    // repeat=0 表示无限重复
    let repeat = parse_param::<u64>(&query, "repeat")?.unwrap_or(1);
    let fps = parse_param::<f64>(&query, "fps")?;

    let image = ImageReader::open(url.path())?.decode()?;

    Ok(
      ImageFileInput::new(image.into())
        .with_repeat((repeat > 0).then_some(repeat))
        .with_fps(fps),
    )
  }
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl Iterator for ImageFileInput {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.remaining.as_mut() {
      Some(0) => return None,
      Some(n) => *n -= 1,
      None => {}
    }

    if self.next_index > 0 {
      if let Some(interval) = self.interval {
        thread::sleep(interval);
      }
    }

    let index = self.next_index;
    self.next_index += 1;
    Some(self.frame(index))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_png(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("frame.png");
    RgbImage::from_pixel(4, 2, image::Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();
    path
  }

  #[test]
  fn yields_rgb_frames_with_increasing_index() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path());
    let url = Url::parse(&format!("image://{}?repeat=3", path.display())).unwrap();

    let frames: Vec<_> = ImageFileInput::from_url(&url).unwrap().collect();
    assert_eq!(frames.len(), 3);
    assert_eq!(
      frames.iter().map(|f| f.index).collect::<Vec<_>>(),
      vec![0, 1, 2]
    );
    assert_eq!(frames[0].width, 4);
    assert_eq!(frames[0].height, 2);
    match &frames[0].handle {
      crate::frame::FrameHandle::NoHandle(buffer) => {
        assert_eq!(buffer.format, PixelFormat::Rgb24);
        assert_eq!(buffer.stride, 12);
        assert_eq!(&buffer.data[..3], &[10, 20, 30]);
      }
      other => panic!("unexpected handle {:?}", other),
    }
  }

  #[test]
  fn single_frame_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path());
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    assert_eq!(ImageFileInput::from_url(&url).unwrap().count(), 1);
  }

  #[test]
  fn zero_repeat_is_unbounded() {
    let input = ImageFileInput::new(RgbImage::new(1, 1)).with_repeat(None);
    assert_eq!(input.take(5).count(), 5);
  }

  #[test]
  fn rejects_bad_parameters_and_scheme() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path());
    let url = Url::parse(&format!("image://{}?fps=fast", path.display())).unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::InvalidParameter { .. })
    ));

    let url = Url::parse("file:///tmp/frame.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
