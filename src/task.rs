// 该文件是 Larder （灶间） 项目的一部分。
// src/task.rs - 检测循环
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

//! # 检测循环
//!
//! 每个调度周期取一帧，依次经过预处理、推理、解码、渲染与汇总。
//! 推理以 `&mut` 借用引擎完成，上一帧的推理结束之前不会开始下一帧。
//! 每一帧的数值缓冲区都登记在该帧的 [`FrameScope`] 中，周期结束时
//! 无论成功与否都会全部释放。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
  aggregate::SessionHandle,
  arena::{BufferLedger, FrameScope},
  config::{DEFAULT_TICK_HZ, DetectConfig},
  decode::{decode, labels_of},
  input::FrameSource,
  model::{InferenceEngine, InferenceError, warm_up},
  output::{FrameResult, Render},
  preprocess::{PreprocessError, Preprocessor, ResizeMode},
  vocabulary::LabelVocabulary,
};

type DetectCallback = Box<dyn FnMut(&[String])>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  Idle,
  AwaitingFrame,
  Preprocessing,
  Inferring,
  Decoding,
  Rendering,
  Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
  Preprocess,
  Inference,
}

/// 单个调度周期的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
  /// 循环已停止，本周期没有做任何事
  Stopped,
  /// 没有可用的帧，跳过
  NoFrame,
  Failed(FailedStage),
  /// 推理期间循环被停止，结果丢弃
  Discarded,
  Processed {
    detections: usize,
    render_failed: bool,
  },
}

/// `run` 返回的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
  Stopped,
  FrameLimit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
  pub ticks: u64,
  pub frames: u64,
  pub empty_ticks: u64,
  pub preprocess_failures: u64,
  pub inference_failures: u64,
  pub render_failures: u64,
  pub discarded: u64,
  pub detections: u64,
}

impl fmt::Display for LoopStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "周期 {}, 帧 {}, 空转 {}, 预处理失败 {}, 推理失败 {}, 渲染失败 {}, 丢弃 {}, 检测 {}",
      self.ticks,
      self.frames,
      self.empty_ticks,
      self.preprocess_failures,
      self.inference_failures,
      self.render_failures,
      self.discarded,
      self.detections
    )
  }
}

/// 外部控制句柄，可以在循环运行时停止或重新启动
#[derive(Debug, Clone)]
pub struct LoopHandle {
  running: Arc<watch::Sender<bool>>,
  session: SessionHandle,
}

impl LoopHandle {
  pub fn stop(&self) {
    if self.running.send_replace(false) {
      info!("停止检测");
    }
  }

  /// 重新启动不会清空会话标签
  pub fn start(&self) {
    if !self.running.send_replace(true) {
      info!("启动检测");
    }
  }

  pub fn is_running(&self) -> bool {
    *self.running.borrow()
  }

  pub fn session(&self) -> &SessionHandle {
    &self.session
  }
}

pub struct DetectionLoop<S, E, R> {
  source: S,
  engine: E,
  renderer: R,
  preprocessor: Preprocessor,
  vocabulary: Arc<LabelVocabulary>,
  config: DetectConfig,
  session: SessionHandle,
  ledger: BufferLedger,
  control: Arc<watch::Sender<bool>>,
  running: watch::Receiver<bool>,
  tick_period: Duration,
  max_frames: Option<u64>,
  on_detect: Option<DetectCallback>,
  state: LoopState,
  stats: LoopStats,
}

pub struct DetectionLoopBuilder<S, E, R> {
  source: S,
  engine: E,
  renderer: R,
  vocabulary: Arc<LabelVocabulary>,
  config: DetectConfig,
  resize: ResizeMode,
  tick_period: Duration,
  max_frames: Option<u64>,
  on_detect: Option<DetectCallback>,
  session: Option<SessionHandle>,
  ledger: Option<BufferLedger>,
}

impl<S, E, R> DetectionLoopBuilder<S, E, R>
where
  S: FrameSource,
  E: InferenceEngine,
  R: Render,
  R::Error: fmt::Display,
{
  pub fn config(mut self, config: DetectConfig) -> Self {
    self.config = config;
    self
  }

  pub fn resize(mut self, resize: ResizeMode) -> Self {
    self.resize = resize;
    self
  }

  pub fn tick_period(mut self, period: Duration) -> Self {
    self.tick_period = period;
    self
  }

  pub fn max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames;
    self
  }

  /// 每帧解码后以本帧（未去重）的标签调用
  pub fn on_detect(mut self, callback: impl FnMut(&[String]) + 'static) -> Self {
    self.on_detect = Some(Box::new(callback));
    self
  }

  pub fn session(mut self, session: SessionHandle) -> Self {
    self.session = Some(session);
    self
  }

  pub fn ledger(mut self, ledger: BufferLedger) -> Self {
    self.ledger = Some(ledger);
    self
  }

  pub fn build(self) -> Result<DetectionLoop<S, E, R>, PreprocessError> {
    let preprocessor = Preprocessor::new(self.engine.input_shape(), self.resize)?;
    let session = self
      .session
      .unwrap_or_else(|| SessionHandle::new(self.vocabulary.clone()));
    let (control, running) = watch::channel(true);

    Ok(DetectionLoop {
      source: self.source,
      engine: self.engine,
      renderer: self.renderer,
      preprocessor,
      vocabulary: self.vocabulary,
      config: self.config,
      session,
      ledger: self.ledger.unwrap_or_default(),
      control: Arc::new(control),
      running,
      tick_period: self.tick_period,
      max_frames: self.max_frames,
      on_detect: self.on_detect,
      state: LoopState::Idle,
      stats: LoopStats::default(),
    })
  }
}

impl<S, E, R> DetectionLoop<S, E, R>
where
  S: FrameSource,
  E: InferenceEngine,
  R: Render,
  R::Error: fmt::Display,
{
  pub fn builder(
    source: S,
    engine: E,
    renderer: R,
    vocabulary: Arc<LabelVocabulary>,
  ) -> DetectionLoopBuilder<S, E, R> {
    DetectionLoopBuilder {
      source,
      engine,
      renderer,
      vocabulary,
      config: DetectConfig::default(),
      resize: ResizeMode::default(),
      tick_period: Duration::from_secs_f64(1.0 / DEFAULT_TICK_HZ as f64),
      max_frames: None,
      on_detect: None,
      session: None,
      ledger: None,
    }
  }

  pub fn handle(&self) -> LoopHandle {
    LoopHandle {
      running: self.control.clone(),
      session: self.session.clone(),
    }
  }

  pub fn session(&self) -> &SessionHandle {
    &self.session
  }

  pub fn ledger(&self) -> &BufferLedger {
    &self.ledger
  }

  pub fn state(&self) -> LoopState {
    self.state
  }

  pub fn stats(&self) -> LoopStats {
    self.stats
  }

  pub fn is_running(&self) -> bool {
    *self.running.borrow()
  }

  pub async fn warm_up(&mut self) -> Result<(), InferenceError> {
    warm_up(&mut self.engine, &self.ledger).await
  }

  fn reached_frame_limit(&self) -> bool {
    self
      .max_frames
      .is_some_and(|max| self.stats.frames >= max)
  }

  /// 按固定周期调度，直到被停止或达到帧数上限
  ///
  /// 停止后可以通过 [`LoopHandle::start`] 重新启动并再次调用本方法，
  /// 会话标签保持不变。
  pub async fn run(&mut self) -> LoopExit {
    let mut ticker = tokio::time::interval(self.tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut running = self.running.clone();
    info!("开始检测循环，调度周期: {:.2?}", self.tick_period);

    loop {
      if !*running.borrow_and_update() {
        self.state = LoopState::Stopped;
        info!("检测循环已停止: {}", self.stats);
        return LoopExit::Stopped;
      }
      if self.reached_frame_limit() {
        self.state = LoopState::Idle;
        info!("达到指定帧数 {}, 退出检测循环", self.stats.frames);
        return LoopExit::FrameLimit;
      }

      tokio::select! {
        biased;
        changed = running.changed() => {
          if changed.is_err() {
            self.state = LoopState::Stopped;
            return LoopExit::Stopped;
          }
          continue;
        }
        _ = ticker.tick() => {}
      }

      self.step().await;
    }
  }

  /// 执行一个调度周期
  pub async fn step(&mut self) -> TickOutcome {
    if !self.is_running() {
      self.state = LoopState::Stopped;
      return TickOutcome::Stopped;
    }

    self.stats.ticks += 1;
    self.state = LoopState::AwaitingFrame;
    let Some(frame) = self.source.next_frame() else {
      self.stats.empty_ticks += 1;
      return TickOutcome::NoFrame;
    };
    self.stats.frames += 1;

    // 作用域先于缓冲区声明，缓冲区总是先被释放
    let scope = self.ledger.scope(frame.index());
    let outcome = self.process(&frame, &scope).await;
    drop(scope);

    if self.is_running() {
      self.state = LoopState::AwaitingFrame;
    } else {
      self.state = LoopState::Stopped;
    }
    outcome
  }

  /// 没有取到帧时按调度周期重试，直到处理了一帧或超过 `wait`
  pub async fn step_until_frame(&mut self, wait: Duration) -> TickOutcome {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
      let outcome = self.step().await;
      if outcome != TickOutcome::NoFrame || tokio::time::Instant::now() >= deadline {
        return outcome;
      }
      tokio::time::sleep(self.tick_period).await;
    }
  }

  async fn process(&mut self, frame: &crate::frame::RawFrame, scope: &FrameScope) -> TickOutcome {
    let started = Instant::now();

    self.state = LoopState::Preprocessing;
    let (input, ratio) = match self.preprocessor.preprocess(frame, scope) {
      Ok(prepared) => prepared,
      Err(e) => {
        warn!("第 {} 帧预处理失败: {}", frame.index(), e);
        self.stats.preprocess_failures += 1;
        return TickOutcome::Failed(FailedStage::Preprocess);
      }
    };

    self.state = LoopState::Inferring;
    let inferred = self.engine.infer(&input, scope).await;
    drop(input);
    let elapsed = started.elapsed();

    if !self.is_running() {
      debug!("第 {} 帧推理结束时检测已停止，丢弃结果", frame.index());
      self.stats.discarded += 1;
      return TickOutcome::Discarded;
    }

    let outputs = match inferred {
      Ok(outputs) => outputs,
      Err(e) => {
        warn!("第 {} 帧推理失败: {}", frame.index(), e);
        self.stats.inference_failures += 1;
        return TickOutcome::Failed(FailedStage::Inference);
      }
    };

    self.state = LoopState::Decoding;
    let threshold = self.config.threshold();
    let detections = decode(&outputs, threshold, &self.vocabulary);
    drop(outputs);

    self.state = LoopState::Rendering;
    let result = FrameResult {
      frame,
      detections: &detections,
      threshold,
      ratio,
    };
    let render_failed = match self.renderer.render_result(&result) {
      Ok(()) => false,
      Err(e) => {
        warn!("第 {} 帧渲染失败: {}", frame.index(), e);
        self.stats.render_failures += 1;
        true
      }
    };

    let labels = labels_of(&detections);
    if let Some(callback) = self.on_detect.as_mut() {
      callback(&labels);
    }
    let added = self.session.merge(&labels);
    self.stats.detections += detections.len() as u64;

    debug!(
      "第 {} 帧处理完成，检测 {} 个，新增标签 {} 个，推理耗时: {:.2?} / {:.2?}",
      frame.index(),
      detections.len(),
      added,
      elapsed,
      started.elapsed()
    );

    TickOutcome::Processed {
      detections: detections.len(),
      render_failed,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_handle_toggles_running() {
    let vocabulary = Arc::new(LabelVocabulary::new(["Tomato"]).unwrap());
    let (tx, _rx) = watch::channel(true);
    let handle = LoopHandle {
      running: Arc::new(tx),
      session: SessionHandle::new(vocabulary),
    };
    assert!(handle.is_running());
    handle.stop();
    assert!(!handle.is_running());
    handle.stop();
    handle.start();
    assert!(handle.is_running());
  }

  #[test]
  fn test_stats_display() {
    let stats = LoopStats {
      ticks: 3,
      frames: 2,
      ..Default::default()
    };
    assert!(stats.to_string().starts_with("周期 3, 帧 2"));
  }
}
