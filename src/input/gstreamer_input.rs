// 该文件是 Qianli （千里眼） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
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

//! # GStreamer 视频输入
//!
//! 通过 appsink 拉取帧，按协商到的像素格式原样封装为 [`VideoFrame`]，
//! 格式转换由采集阶段完成。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## URL
//!
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&format=NV12`
//! - `gst://file/path/to/video.mp4?format=BGRx`
//!
//! `format` 决定 appsink 前 `videoconvert` 的目标格式，默认 `RGB`。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{CpuBuffer, PixelFormat, VideoFrame},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法将元素转换为 appsink")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const GSTREAMER_INPUT_SCHEME: &str = "gst";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,width={},height={},framerate={}/1",
          camera, io_mode_str, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str| query.get(key).and_then(|v| v.parse::<u32>().ok());
    let items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: parse("io-mode"),
      width: parse("width").unwrap_or(DEFAULT_WIDTH),
      height: parse("height").unwrap_or(DEFAULT_HEIGHT),
      fps: parse("fps").unwrap_or(DEFAULT_FPS),
    }];
    GStreamerInputPipelineBuilder { items }
  }

  fn build_file_pipeline(path: &str) -> Self {
    GStreamerInputPipelineBuilder {
      items: vec![GStreamerInputBuilderItem::FileSource(path.to_string())],
    }
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let full_pipeline = format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    );

    info!("GStreamer 管道描述: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      next_index: 0,
    })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(url.path(), &query),
      Some("file") => Self::build_file_pipeline(url.path()),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| "RGB".to_string()),
    });

    Ok(builder)
  }
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = GSTREAMER_INPUT_SCHEME;
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  next_index: u64,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl GStreamerInput {
  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        info!("视频流结束: {}", e);
        e
      })
      .ok()
  }
}

impl Iterator for GStreamerInput {
  type Item = VideoFrame;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      let sample = self.pull_sample()?;
      let index = self.next_index;
      self.next_index += 1;
      match sample_to_frame(index, &sample) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("无法读取第 {} 帧: {}", index, e),
      }
    }
  }
}

fn pixel_format(format: gst_video::VideoFormat) -> PixelFormat {
  match format {
    gst_video::VideoFormat::Rgb => PixelFormat::Rgb24,
    gst_video::VideoFormat::Bgr => PixelFormat::Bgr24,
    gst_video::VideoFormat::Rgba | gst_video::VideoFormat::Rgbx => PixelFormat::Rgba32,
    gst_video::VideoFormat::Bgra | gst_video::VideoFormat::Bgrx => PixelFormat::Bgra32,
    gst_video::VideoFormat::Gray8 => PixelFormat::Gray8,
    gst_video::VideoFormat::Nv12 => PixelFormat::Nv12,
    _ => PixelFormat::Unknown,
  }
}

/// 把 caps 中声明的格式原样带给采集阶段，无法识别的格式标记为 `Unknown`
fn sample_to_frame(index: u64, sample: &gst::Sample) -> Result<VideoFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let width = video_info.width();
  let height = video_info.height();
  let format = pixel_format(video_info.format());
  let stride = video_info.stride()[0].max(0) as usize;
  let offsets = video_info.offset();

  let data = if format == PixelFormat::Nv12 {
    let uv_stride = video_info.stride()[1].max(0) as usize;
    repack_nv12(data, height as usize, stride, offsets[0], uv_stride, offsets[1])
  } else {
    data.get(offsets[0]..).unwrap_or_default().to_vec()
  };

  Ok(VideoFrame::from_cpu(
    index,
    width,
    height,
    CpuBuffer {
      format,
      stride,
      data,
    },
  ))
}

/// 把两个平面拼成 Y 平面紧跟 UV 平面、行跨度一致的布局
fn repack_nv12(
  data: &[u8],
  height: usize,
  stride: usize,
  y_offset: usize,
  uv_stride: usize,
  uv_offset: usize,
) -> Vec<u8> {
  let uv_rows = height.div_ceil(2);
  let mut out = vec![0u8; stride * (height + uv_rows)];
  let copy_plane = |out: &mut [u8], rows: usize, src_offset: usize, src_stride: usize| {
    let len = stride.min(src_stride);
    for row in 0..rows {
      let start = src_offset + row * src_stride;
      if let Some(src) = data.get(start..start + len) {
        out[row * stride..row * stride + len].copy_from_slice(src);
      }
    }
  };
  let (y_plane, uv_plane) = out.split_at_mut(stride * height);
  copy_plane(y_plane, height, y_offset, stride);
  copy_plane(uv_plane, uv_rows, uv_offset, uv_stride);
  out
}
