// 该文件是 Qianli （千里眼） 项目的一部分。
// src/emit.rs - 检测结果发布
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

use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::postprocess::{Detection, DetectionBatch};

/// 发布给订阅者的单个检测对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
  pub class_name: String,
  pub r_x: f32,
  pub r_y: f32,
  pub r_width: f32,
  pub r_height: f32,
}

impl From<&Detection> for DetectionEvent {
  fn from(d: &Detection) -> Self {
    Self {
      class_name: d.class_name.clone(),
      r_x: d.r_x,
      r_y: d.r_y,
      r_width: d.r_width,
      r_height: d.r_height,
    }
  }
}

/// 将事件列表渲染为 JSON 数组
pub fn events_to_json(events: &[DetectionEvent]) -> Result<String, serde_json::Error> {
  serde_json::to_string(events)
}

pub type Listener = Box<dyn Fn(&[DetectionEvent]) + Send + Sync>;

/// 单订阅者的结果发布器，空批次不发布
#[derive(Default)]
pub struct ResultEmitter {
  listener: RwLock<Option<Listener>>,
}

impl ResultEmitter {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册订阅者，替换之前的订阅者
  pub fn register_listener(&self, listener: impl Fn(&[DetectionEvent]) + Send + Sync + 'static) {
    let mut slot = self.listener.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
      warn!("替换已注册的结果订阅者");
    }
    *slot = Some(Box::new(listener));
  }

  /// 发布一个批次，返回是否实际发布
  pub fn emit(&self, batch: &DetectionBatch) -> bool {
    if batch.is_empty() {
      return false;
    }

    let slot = self.listener.read().unwrap_or_else(PoisonError::into_inner);
    let Some(listener) = slot.as_ref() else {
      debug!("帧 {} 的检测结果没有订阅者", batch.frame_index);
      return false;
    };

    let events: Vec<DetectionEvent> = batch.items.iter().map(DetectionEvent::from).collect();
    listener(&events);
    true
  }
}
