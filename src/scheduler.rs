// 该文件是 Qianli （千里眼） 项目的一部分。
// src/scheduler.rs - 单飞推理调度
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

//! # 推理调度
//!
//! 生产者线程（视频回调）调用 [`InferenceScheduler::submit`] 交付帧。调度器只有
//! 空闲与忙碌两种状态：
//!
//! - 忙碌时帧原样返回，不排队，不产生检测结果；
//! - 空闲时切换为忙碌，在生产者线程上同步完成帧采集，随后把
//!   预处理、推理、后处理与发布交给一个工作线程，帧立即原样返回；
//! - 工作线程结束（无论成功与否）时切换回空闲。
//!
//! 任意时刻最多只有一个工作线程在执行流水线。模型加载失败时调度器处于直通模式，
//! 所有帧原样返回。

use std::{
  sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, JoinHandle},
};

use tract_onnx::prelude::tract_ndarray::ArrayD;
use tracing::{debug, error, info, warn};

use crate::{
  acquire::FrameAcquirer,
  emit::ResultEmitter,
  frame::{CanonicalImage, VideoFrame},
  labels::ClassNameTable,
  model::{DetectionEngine, InferenceError, Model, ModelHandle},
  postprocess::{DetectionBatch, postprocess},
  preprocess::{InferenceBlob, PreprocessConfig, preprocess},
};

const WORKER_THREAD_NAME: &str = "qianli-infer";

/// 无状态的检测流水线：预处理 → 推理 → 后处理
pub struct Detector<M = ModelHandle> {
  engine: DetectionEngine<M>,
  classes: ClassNameTable,
  preprocess: PreprocessConfig,
  threshold: f32,
}

impl<M> Detector<M>
where
  M: Model<Input = InferenceBlob, Output = ArrayD<f32>>,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(
    engine: DetectionEngine<M>,
    classes: ClassNameTable,
    preprocess: PreprocessConfig,
    threshold: f32,
  ) -> Self {
    Self {
      engine,
      classes,
      preprocess,
      threshold,
    }
  }

  pub fn detect(
    &self,
    image: &CanonicalImage,
    frame_index: u64,
  ) -> Result<DetectionBatch, InferenceError> {
    let blob = preprocess(image, &self.preprocess);
    let rows = self.engine.infer(&blob)?;
    let items = postprocess(
      &rows,
      image.width(),
      image.height(),
      self.threshold,
      &self.classes,
    );
    Ok(DetectionBatch { frame_index, items })
  }
}

/// 释放时把调度器切回空闲
struct IdleOnDrop(Arc<AtomicBool>);

impl Drop for IdleOnDrop {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

pub struct InferenceScheduler<M = ModelHandle> {
  detector: Option<Arc<Detector<M>>>,
  acquirer: FrameAcquirer,
  emitter: Arc<ResultEmitter>,
  busy: Arc<AtomicBool>,
  closed: AtomicBool,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl<M> InferenceScheduler<M> {
  /// 直通模式：所有帧原样返回，从不推理
  pub fn passthrough(acquirer: FrameAcquirer, emitter: Arc<ResultEmitter>) -> Self {
    warn!("调度器处于直通模式，不会产生检测结果");
    Self {
      detector: None,
      acquirer,
      emitter,
      busy: Arc::new(AtomicBool::new(false)),
      closed: AtomicBool::new(false),
      worker: Mutex::new(None),
    }
  }

  pub fn is_passthrough(&self) -> bool {
    self.detector.is_none()
  }

  pub fn is_busy(&self) -> bool {
    self.busy.load(Ordering::Acquire)
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// 等待当前工作线程结束，不关闭调度器
  pub fn wait_idle(&self) {
    let handle = self
      .worker
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = handle {
      if handle.join().is_err() {
        error!("推理线程异常退出");
      }
    }
  }

  /// 阻止新的推理任务并等待正在执行的任务完成。推理过程不可中途取消。
  pub fn shutdown(&self) {
    let handle = {
      let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
      if !self.closed.swap(true, Ordering::AcqRel) {
        info!("调度器关闭");
      }
      worker.take()
    };
    if let Some(handle) = handle {
      debug!("等待推理线程结束");
      if handle.join().is_err() {
        error!("推理线程异常退出");
      }
    }
  }
}

impl<M> InferenceScheduler<M>
where
  M: Model<Input = InferenceBlob, Output = ArrayD<f32>> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(detector: Detector<M>, acquirer: FrameAcquirer, emitter: Arc<ResultEmitter>) -> Self {
    Self {
      detector: Some(Arc::new(detector)),
      acquirer,
      emitter,
      busy: Arc::new(AtomicBool::new(false)),
      closed: AtomicBool::new(false),
      worker: Mutex::new(None),
    }
  }

  /// 交付一帧，总是立即原样返回该帧，不会等待推理
  pub fn submit(&self, frame: VideoFrame) -> VideoFrame {
    self.dispatch(&frame);
    frame
  }

  /// 与 [`submit`](Self::submit) 相同，同时返回该帧是否启动了推理
  pub fn try_submit(&self, frame: VideoFrame) -> (VideoFrame, bool) {
    let accepted = self.dispatch(&frame);
    (frame, accepted)
  }

  fn dispatch(&self, frame: &VideoFrame) -> bool {
    let Some(detector) = self.detector.as_ref() else {
      return false;
    };
    if self.is_closed() {
      return false;
    }

    if self
      .busy
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("推理进行中，丢弃帧 {}", frame.index);
      return false;
    }
    let idle = IdleOnDrop(self.busy.clone());

    let image = match self.acquirer.to_canonical_image(frame) {
      Ok(image) => image,
      Err(e) => {
        warn!("帧 {} 采集失败，已跳过: {}", frame.index, e);
        return false;
      }
    };

    let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
    if self.is_closed() {
      return false;
    }

    let detector = detector.clone();
    let emitter = self.emitter.clone();
    let acquirer = self.acquirer.clone();
    let frame_index = frame.index;

    let spawned = thread::Builder::new()
      .name(WORKER_THREAD_NAME.to_string())
      .spawn(move || {
        // 捕获的资源在切回空闲之前释放
        let _idle = idle;
        let (detector, emitter, acquirer) = (detector, emitter, acquirer);
        let image = acquirer.upright(image);
        let now = std::time::Instant::now();
        match detector.detect(&image, frame_index) {
          Ok(batch) => {
            debug!(
              "帧 {} 推理完成，耗时: {:.2?}，检测到 {} 个对象",
              frame_index,
              now.elapsed(),
              batch.len()
            );
            emitter.emit(&batch);
          }
          Err(e) => error!("帧 {} 推理失败: {}", frame_index, e),
        }
      });

    match spawned {
      // 之前的线程已释放全部资源，直接分离
      Ok(handle) => {
        drop(worker.replace(handle));
        true
      }
      Err(e) => {
        error!("无法启动推理线程: {}", e);
        false
      }
    }
  }
}

impl<M> Drop for InferenceScheduler<M> {
  fn drop(&mut self) {
    self.shutdown();
  }
}
