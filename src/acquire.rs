// 该文件是 Qianli （千里眼） 项目的一部分。
// src/acquire.rs - 帧采集与格式转换
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

use image::{RgbImage, imageops};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{CanonicalImage, CpuBuffer, FrameHandle, PixelFormat, RGB_CHANNELS, VideoFrame},
  gl,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AcquireError {
  #[error("帧转换错误: {0}")]
  Conversion(String),
  #[error("当前线程没有绑定图形上下文，无法读回纹理")]
  GpuContext,
}

impl AcquireError {
  fn conversion(msg: impl Into<String>) -> Self {
    AcquireError::Conversion(msg.into())
  }
}

/// 摆正图像所需的顺时针旋转角度
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rotation {
  #[default]
  None,
  Cw90,
  Cw180,
  Cw270,
}

/// 将视频帧转换为规范 RGB888 图像
#[derive(Debug, Clone, Default)]
pub struct FrameAcquirer {
  rotation: Rotation,
}

impl FrameAcquirer {
  pub fn new(rotation: Rotation) -> Self {
    Self { rotation }
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  /// 同步转换一帧。纹理句柄要求调用线程持有图形上下文。
  pub fn to_canonical_image(&self, frame: &VideoFrame) -> Result<CanonicalImage, AcquireError> {
    if !frame.is_valid() {
      return Err(AcquireError::conversion(format!(
        "无效的帧尺寸 {}x{}",
        frame.width, frame.height
      )));
    }

    match &frame.handle {
      FrameHandle::NoHandle(buffer) => convert_cpu_buffer(frame.width, frame.height, buffer),
      FrameHandle::GlTexture(texture) => read_texture(frame.width, frame.height, *texture),
      FrameHandle::Other(kind) => Err(AcquireError::conversion(format!(
        "不支持的帧句柄类型: {}",
        kind
      ))),
    }
  }

  /// 按部署目标的旋转策略摆正图像
  pub fn upright(&self, image: CanonicalImage) -> CanonicalImage {
    match self.rotation {
      Rotation::None => image,
      Rotation::Cw90 => imageops::rotate90(image.as_rgb()).into(),
      Rotation::Cw180 => imageops::rotate180(image.as_rgb()).into(),
      Rotation::Cw270 => imageops::rotate270(image.as_rgb()).into(),
    }
  }
}

fn required_len(format: PixelFormat, width: usize, height: usize, stride: usize) -> usize {
  match format {
    PixelFormat::Nv12 => stride * height + stride * height.div_ceil(2),
    _ => stride * (height - 1) + width * format.bytes_per_pixel(),
  }
}

/// 按声明的像素格式将 CPU 缓冲区转换为 RGB888
pub fn convert_cpu_buffer(
  width: u32,
  height: u32,
  buffer: &CpuBuffer,
) -> Result<CanonicalImage, AcquireError> {
  let bpp = buffer.format.bytes_per_pixel();
  if bpp == 0 {
    return Err(AcquireError::conversion(format!(
      "无法识别的像素格式: {:?}",
      buffer.format
    )));
  }

  let (w, h) = (width as usize, height as usize);
  if w == 0 || h == 0 {
    return Err(AcquireError::conversion("空图像"));
  }
  if buffer.stride < w * bpp {
    return Err(AcquireError::conversion(format!(
      "行跨度 {} 小于行宽 {}",
      buffer.stride,
      w * bpp
    )));
  }
  // 奇数宽度时最后一组 UV 仍占两个字节
  let chroma_row = w.div_ceil(2) * 2;
  if buffer.format == PixelFormat::Nv12 && buffer.stride < chroma_row {
    return Err(AcquireError::conversion(format!(
      "NV12 行跨度 {} 小于色度行宽 {}",
      buffer.stride, chroma_row
    )));
  }

  let required = required_len(buffer.format, w, h, buffer.stride);
  if buffer.data.len() < required {
    return Err(AcquireError::conversion(format!(
      "缓冲区长度不足: 期望至少 {} 字节, 实际 {} 字节",
      required,
      buffer.data.len()
    )));
  }

  let mut rgb = vec![0u8; w * h * RGB_CHANNELS];
  if buffer.format == PixelFormat::Nv12 {
    nv12_to_rgb(w, h, buffer.stride, &buffer.data, &mut rgb);
  } else {
    for y in 0..h {
      let src = &buffer.data[y * buffer.stride..y * buffer.stride + w * bpp];
      let dst = &mut rgb[y * w * RGB_CHANNELS..(y + 1) * w * RGB_CHANNELS];
      for (s, d) in src.chunks_exact(bpp).zip(dst.chunks_exact_mut(RGB_CHANNELS)) {
        d.copy_from_slice(&packed_to_rgb(buffer.format, s));
      }
    }
  }

  RgbImage::from_raw(width, height, rgb)
    .map(CanonicalImage::from)
    .ok_or_else(|| AcquireError::conversion("RGB 缓冲区尺寸不匹配"))
}

fn packed_to_rgb(format: PixelFormat, px: &[u8]) -> [u8; 3] {
  match format {
    PixelFormat::Rgb24 | PixelFormat::Rgba32 => [px[0], px[1], px[2]],
    PixelFormat::Bgr24 | PixelFormat::Bgra32 => [px[2], px[1], px[0]],
    PixelFormat::Gray8 => [px[0], px[0], px[0]],
    PixelFormat::Nv12 | PixelFormat::Unknown => [0, 0, 0],
  }
}

fn nv12_to_rgb(width: usize, height: usize, stride: usize, data: &[u8], rgb: &mut [u8]) {
  let uv_plane = stride * height;
  for y in 0..height {
    for x in 0..width {
      let luma = data[y * stride + x] as i32;
      let uv = uv_plane + (y / 2) * stride + (x / 2) * 2;
      let c = luma - 16;
      let d = data[uv] as i32 - 128;
      let e = data[uv + 1] as i32 - 128;

      let offset = (y * width + x) * RGB_CHANNELS;
      rgb[offset] = clamp_u8((298 * c + 409 * e + 128) >> 8);
      rgb[offset + 1] = clamp_u8((298 * c - 100 * d - 208 * e + 128) >> 8);
      rgb[offset + 2] = clamp_u8((298 * c + 516 * d + 128) >> 8);
    }
  }
}

fn clamp_u8(value: i32) -> u8 {
  value.clamp(0, 255) as u8
}

fn swap_red_blue(pixels: &mut [u8]) {
  for px in pixels.chunks_exact_mut(4) {
    px.swap(0, 2);
  }
}

/// 通过临时帧缓冲读回纹理。
///
/// 读回缓冲区按本机 32 位像素（`Bgra32`）解释，因此先交换红蓝通道再按
/// `Bgra32` 解码。两次交换相互抵消，最终通道顺序与 GL 给出的 RGBA 一致。
fn read_texture(width: u32, height: u32, texture: u32) -> Result<CanonicalImage, AcquireError> {
  let mut pixels = gl::with_current(|functions| {
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    let framebuffer = functions.gen_framebuffer();
    let previous = functions.framebuffer_binding();
    functions.bind_framebuffer(framebuffer);
    functions.attach_color_texture(texture);
    functions.read_pixels(width, height, &mut pixels);
    functions.bind_framebuffer(previous);
    functions.delete_framebuffer(framebuffer);
    debug!("纹理 {} 读回完成, 恢复帧缓冲绑定 {}", texture, previous);
    pixels
  })
  .ok_or(AcquireError::GpuContext)?;

  swap_red_blue(&mut pixels);
  convert_cpu_buffer(
    width,
    height,
    &CpuBuffer::packed(PixelFormat::Bgra32, width, pixels),
  )
}
