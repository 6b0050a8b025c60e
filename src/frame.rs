// 该文件是 Qianli （千里眼） 项目的一部分。
// src/frame.rs - 视频帧与规范图像定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// CPU 像素缓冲区的像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgb24,
  Bgr24,
  Rgba32,
  /// 小端 32 位 0xAARRGGBB，内存顺序为 B G R A
  Bgra32,
  Gray8,
  /// Y 平面后紧跟交错的 UV 平面，BT.601 有限范围
  Nv12,
  Unknown,
}

impl PixelFormat {
  /// 每像素字节数，平面格式返回 Y 平面的字节数
  pub fn bytes_per_pixel(&self) -> usize {
    match self {
      PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
      PixelFormat::Rgba32 | PixelFormat::Bgra32 => 4,
      PixelFormat::Gray8 | PixelFormat::Nv12 => 1,
      PixelFormat::Unknown => 0,
    }
  }
}

/// 位于 CPU 内存中的像素数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuBuffer {
  pub format: PixelFormat,
  /// 每行字节数
  pub stride: usize,
  pub data: Vec<u8>,
}

impl CpuBuffer {
  /// 紧密排列（无行填充）的缓冲区
  pub fn packed(format: PixelFormat, width: u32, data: Vec<u8>) -> Self {
    let stride = width as usize * format.bytes_per_pixel();
    Self {
      format,
      stride,
      data,
    }
  }
}

/// 帧数据的来源，决定采集路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHandle {
  /// 无句柄，像素位于 CPU 缓冲区
  NoHandle(CpuBuffer),
  /// GL 纹理句柄，只能在持有图形上下文的线程上读回
  GlTexture(u32),
  /// 其他句柄类型，当前不支持
  Other(String),
}

/// 外部视频源传入的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
  pub index: u64,
  pub width: u32,
  pub height: u32,
  pub handle: FrameHandle,
}

impl VideoFrame {
  pub fn from_cpu(index: u64, width: u32, height: u32, buffer: CpuBuffer) -> Self {
    Self {
      index,
      width,
      height,
      handle: FrameHandle::NoHandle(buffer),
    }
  }

  pub fn from_texture(index: u64, width: u32, height: u32, texture: u32) -> Self {
    Self {
      index,
      width,
      height,
      handle: FrameHandle::GlTexture(texture),
    }
  }

  pub fn is_valid(&self) -> bool {
    self.width > 0 && self.height > 0
  }
}

/// RGB888 规范图像，通道顺序固定为 R G B
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalImage {
  image: RgbImage,
}

impl CanonicalImage {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 每行字节数
  pub fn stride(&self) -> usize {
    self.image.width() as usize * RGB_CHANNELS
  }

  pub fn as_rgb(&self) -> &RgbImage {
    &self.image
  }
}

impl From<RgbImage> for CanonicalImage {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl AsRef<[u8]> for CanonicalImage {
  fn as_ref(&self) -> &[u8] {
    self.image.as_raw()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn canonical_image_buffer_matches_stride() {
    let image: CanonicalImage = RgbImage::new(7, 5).into();
    assert_eq!(image.stride(), 21);
    assert_eq!(image.as_ref().len(), image.stride() * image.height() as usize);
  }

  #[test]
  fn packed_buffer_stride_follows_format() {
    let buffer = CpuBuffer::packed(PixelFormat::Bgra32, 10, vec![0; 40]);
    assert_eq!(buffer.stride, 40);
    let buffer = CpuBuffer::packed(PixelFormat::Nv12, 10, vec![0; 150]);
    assert_eq!(buffer.stride, 10);
  }
}
