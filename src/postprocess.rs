// 该文件是 Qianli （千里眼） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
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

use tracing::debug;

use crate::{labels::ClassNameTable, model::DetectionRaw};

/// 归一化矩形，坐标为帧宽高的比例
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_name: String,
  pub r_x: f32,
  pub r_y: f32,
  pub r_width: f32,
  pub r_height: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
  pub frame_index: u64,
  pub items: Vec<Detection>,
}

impl DetectionBatch {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

/// 按阈值（严格大于）过滤并换算成归一化矩形，输出顺序与输入行一致。
/// 类别编号不在类别表中的行会被丢弃。
pub fn postprocess(
  rows: &[DetectionRaw],
  frame_width: u32,
  frame_height: u32,
  threshold: f32,
  classes: &ClassNameTable,
) -> Vec<Detection> {
  if frame_width == 0 || frame_height == 0 {
    return Vec::new();
  }
  let (fw, fh) = (frame_width as f32, frame_height as f32);

  rows
    .iter()
    .filter(|row| row.confidence > threshold)
    .filter_map(|row| {
      let Some(class_name) = classes.get(row.class_id) else {
        debug!("类别编号 {} 不在类别表中，丢弃该检测", row.class_id);
        return None;
      };

      let left = row.left * fw;
      let top = row.top * fh;
      let right = row.right * fw;
      let bottom = row.bottom * fh;

      Some(Detection {
        class_name: class_name.to_string(),
        r_x: left / fw,
        r_y: top / fh,
        r_width: (right - left) / fw,
        r_height: (bottom - top) / fh,
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn row(class_id: i32, confidence: f32, ltrb: [f32; 4]) -> DetectionRaw {
    DetectionRaw {
      batch_index: 0,
      class_id,
      confidence,
      left: ltrb[0],
      top: ltrb[1],
      right: ltrb[2],
      bottom: ltrb[3],
    }
  }

  fn table() -> ClassNameTable {
    [(1, "person"), (3, "car")].into_iter().collect()
  }

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-5
  }

  #[test]
  fn converts_pixel_box_to_normalized_rect() {
    let rows = [row(
      1,
      0.9,
      [100.0 / 640.0, 50.0 / 480.0, 300.0 / 640.0, 250.0 / 480.0],
    )];
    let out = postprocess(&rows, 640, 480, 0.5, &table());

    assert_eq!(out.len(), 1);
    let d = &out[0];
    assert_eq!(d.class_name, "person");
    assert!(close(d.r_x, 0.15625));
    assert!(close(d.r_y, 0.104_167));
    assert!(close(d.r_width, 0.3125));
    assert!(close(d.r_height, 0.416_667));
  }

  #[test]
  fn threshold_is_strict() {
    let rows = [
      row(1, 0.5, [0.0, 0.0, 0.1, 0.1]),
      row(3, 0.500_001, [0.0, 0.0, 0.1, 0.1]),
    ];
    let out = postprocess(&rows, 100, 100, 0.5, &table());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "car");
  }

  #[test]
  fn unknown_class_is_dropped() {
    let rows = [
      row(99, 0.95, [0.0, 0.0, 0.5, 0.5]),
      row(-1, 0.95, [0.0, 0.0, 0.5, 0.5]),
      row(1, 0.95, [0.0, 0.0, 0.5, 0.5]),
    ];
    let out = postprocess(&rows, 100, 100, 0.5, &table());
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].class_name, "person");
  }

  #[test]
  fn keeps_row_order() {
    let rows = [
      row(3, 0.6, [0.1, 0.1, 0.2, 0.2]),
      row(1, 0.99, [0.3, 0.3, 0.4, 0.4]),
      row(3, 0.7, [0.5, 0.5, 0.6, 0.6]),
    ];
    let out = postprocess(&rows, 320, 240, 0.5, &table());
    let names: Vec<_> = out.iter().map(|d| d.class_name.as_str()).collect();
    assert_eq!(names, ["car", "person", "car"]);
    assert!(close(out[2].r_x, 0.5));
  }

  #[test]
  fn nan_confidence_never_passes() {
    let rows = [row(1, f32::NAN, [0.0, 0.0, 0.5, 0.5])];
    assert!(postprocess(&rows, 100, 100, 0.5, &table()).is_empty());
  }
}
