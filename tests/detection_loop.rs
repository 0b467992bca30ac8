// 该文件是 Larder （灶间） 项目的一部分。
// tests/detection_loop.rs - 检测循环集成测试
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

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use larder::{
  arena::FrameScope,
  config::DetectConfig,
  frame::{InputTensor, RGB_CHANNELS, RawFrame, RawOutputs, TensorShape},
  input::{FrameSource, ImageFileInput},
  model::{InferenceEngine, InferenceError, RecordedOutputs, ReplayEngine, check_input_shape},
  output::{FrameResult, Render},
  task::{DetectionLoop, FailedStage, LoopExit, LoopHandle, LoopState, TickOutcome},
  vocabulary::LabelVocabulary,
};

const SHAPE: TensorShape = TensorShape::nhwc(8, 8, RGB_CHANNELS);

/// 每次推理的脚本：候选 `(classIndex, score)` 或错误信息
type Step = Result<Vec<(i32, f32)>, String>;

struct ScriptedSource {
  frames: VecDeque<Option<RawFrame>>,
}

impl FrameSource for ScriptedSource {
  fn next_frame(&mut self) -> Option<RawFrame> {
    self.frames.pop_front().flatten()
  }
}

struct ScriptedEngine {
  script: VecDeque<Step>,
  calls: Rc<Cell<usize>>,
  busy: Rc<Cell<bool>>,
  stop_during: Rc<RefCell<Option<LoopHandle>>>,
}

impl InferenceEngine for ScriptedEngine {
  fn input_shape(&self) -> TensorShape {
    SHAPE
  }

  async fn infer(
    &mut self,
    input: &InputTensor,
    scope: &FrameScope,
  ) -> Result<RawOutputs, InferenceError> {
    check_input_shape(SHAPE, input)?;
    assert!(!self.busy.replace(true), "同时存在两次推理");
    self.calls.set(self.calls.get() + 1);

    tokio::task::yield_now().await;
    let handle = self.stop_during.borrow_mut().take();
    if let Some(handle) = handle {
      handle.stop();
    }
    self.busy.set(false);

    match self.script.pop_front().unwrap_or(Ok(Vec::new())) {
      Ok(candidates) => {
        let boxes = candidates
          .iter()
          .flat_map(|_| [0.1, 0.1, 0.5, 0.5])
          .collect();
        let scores = candidates.iter().map(|(_, s)| *s).collect();
        let classes = candidates.iter().map(|(c, _)| *c).collect();
        Ok(RawOutputs::new(boxes, scores, classes, scope)?)
      }
      Err(msg) => Err(InferenceError::ComputeError(msg)),
    }
  }
}

#[derive(Clone, Default)]
struct RecordingRenderer {
  rendered: Rc<RefCell<Vec<Vec<Option<String>>>>>,
  fail: bool,
}

impl Render for RecordingRenderer {
  type Error = String;

  fn render_result(&self, result: &FrameResult<'_>) -> Result<(), Self::Error> {
    self
      .rendered
      .borrow_mut()
      .push(result.detections.iter().map(|d| d.label.clone()).collect());
    if self.fail {
      return Err("显示设备不可用".to_string());
    }
    Ok(())
  }
}

struct Harness {
  detection: DetectionLoop<ScriptedSource, ScriptedEngine, RecordingRenderer>,
  calls: Rc<Cell<usize>>,
  rendered: Rc<RefCell<Vec<Vec<Option<String>>>>>,
  stop_during: Rc<RefCell<Option<LoopHandle>>>,
  reported: Rc<RefCell<Vec<Vec<String>>>>,
}

fn frame(index: u64) -> Option<RawFrame> {
  Some(RawFrame::new(RgbImage::new(16, 8), index, index * 16))
}

fn harness(frames: Vec<Option<RawFrame>>, script: Vec<Step>, fail_render: bool) -> Harness {
  harness_with_limit(frames, script, fail_render, None)
}

fn harness_with_limit(
  frames: Vec<Option<RawFrame>>,
  script: Vec<Step>,
  fail_render: bool,
  max_frames: Option<u64>,
) -> Harness {
  let vocabulary = Arc::new(LabelVocabulary::new(["Tomato", "Onion", "Egg"]).unwrap());
  let calls = Rc::new(Cell::new(0));
  let stop_during = Rc::new(RefCell::new(None));
  let renderer = RecordingRenderer {
    fail: fail_render,
    ..Default::default()
  };
  let rendered = renderer.rendered.clone();
  let reported = Rc::new(RefCell::new(Vec::new()));

  let engine = ScriptedEngine {
    script: script.into(),
    calls: calls.clone(),
    busy: Rc::new(Cell::new(false)),
    stop_during: stop_during.clone(),
  };
  let source = ScriptedSource {
    frames: frames.into(),
  };

  let sink = reported.clone();
  let detection = DetectionLoop::builder(source, engine, renderer, vocabulary)
    .config(DetectConfig::new(0.25).unwrap())
    .tick_period(Duration::from_millis(1))
    .max_frames(max_frames)
    .on_detect(move |labels| sink.borrow_mut().push(labels.to_vec()))
    .build()
    .unwrap();

  Harness {
    detection,
    calls,
    rendered,
    stop_during,
    reported,
  }
}

#[tokio::test]
async fn test_no_buffers_live_after_mixed_outcomes() {
  let empty_frame = Some(RawFrame::new(RgbImage::new(0, 0), 2, 0));
  let mut h = harness(
    vec![frame(0), frame(1), empty_frame, None, frame(3)],
    vec![
      Ok(vec![(0, 0.9), (1, 0.1)]),
      Err("NPU 超时".to_string()),
      Ok(vec![]),
    ],
    false,
  );

  let expected = [
    TickOutcome::Processed {
      detections: 1,
      render_failed: false,
    },
    TickOutcome::Failed(FailedStage::Inference),
    TickOutcome::Failed(FailedStage::Preprocess),
    TickOutcome::NoFrame,
    TickOutcome::Processed {
      detections: 0,
      render_failed: false,
    },
  ];
  for outcome in expected {
    assert_eq!(h.detection.step().await, outcome);
    assert_eq!(h.detection.ledger().live(), 0);
  }

  let ledger = h.detection.ledger();
  // 三次推理各 1 个输入张量，两次成功推理各 3 个输出缓冲区
  assert_eq!(ledger.allocated(), 3 + 2 * 3);
  assert_eq!(ledger.released(), ledger.allocated());

  let stats = h.detection.stats();
  assert_eq!(stats.ticks, 5);
  assert_eq!(stats.frames, 4);
  assert_eq!(stats.empty_ticks, 1);
  assert_eq!(stats.inference_failures, 1);
  assert_eq!(stats.preprocess_failures, 1);
  assert_eq!(h.detection.state(), LoopState::AwaitingFrame);
}

#[tokio::test]
async fn test_missing_frame_does_no_work() {
  let mut h = harness(vec![None, frame(0)], vec![Ok(vec![(2, 0.8)])], false);

  assert_eq!(h.detection.step().await, TickOutcome::NoFrame);
  assert_eq!(h.calls.get(), 0);
  assert!(h.rendered.borrow().is_empty());
  assert!(h.reported.borrow().is_empty());
  assert_eq!(h.detection.ledger().allocated(), 0);

  // 下一轮照常处理
  assert!(matches!(
    h.detection.step().await,
    TickOutcome::Processed { detections: 1, .. }
  ));
  assert_eq!(h.calls.get(), 1);
  assert_eq!(h.detection.session().labels(), vec!["Egg"]);
}

#[tokio::test]
async fn test_restart_keeps_session_labels() {
  let mut h = harness(
    vec![frame(0), frame(1)],
    vec![Ok(vec![(0, 0.9)]), Ok(vec![(1, 0.9)])],
    false,
  );
  let handle = h.detection.handle();

  h.detection.step().await;
  handle.stop();
  assert_eq!(h.detection.step().await, TickOutcome::Stopped);
  assert_eq!(h.detection.state(), LoopState::Stopped);
  assert_eq!(h.calls.get(), 1);

  handle.start();
  h.detection.step().await;
  assert_eq!(handle.session().labels(), vec!["Tomato", "Onion"]);
}

#[tokio::test]
async fn test_clear_between_stop_and_start() {
  let mut h = harness(
    vec![frame(0), frame(1)],
    vec![Ok(vec![(0, 0.9)]), Ok(vec![(1, 0.9)])],
    false,
  );
  let handle = h.detection.handle();

  h.detection.step().await;
  handle.stop();
  handle.session().clear();
  handle.start();
  h.detection.step().await;
  assert_eq!(handle.session().labels(), vec!["Onion"]);
}

#[tokio::test]
async fn test_unknown_class_rendered_but_not_aggregated() {
  let mut h = harness(
    vec![frame(0)],
    vec![Ok(vec![(7, 0.9), (0, 0.25), (-1, 0.6), (2, 0.2)])],
    false,
  );

  assert_eq!(
    h.detection.step().await,
    TickOutcome::Processed {
      detections: 3,
      render_failed: false,
    }
  );
  assert_eq!(
    h.rendered.borrow()[0],
    vec![None, Some("Tomato".to_string()), None]
  );
  assert_eq!(*h.reported.borrow(), vec![vec!["Tomato".to_string()]]);
  assert_eq!(h.detection.session().labels(), vec!["Tomato"]);
}

#[tokio::test]
async fn test_render_failure_does_not_block() {
  let mut h = harness(
    vec![frame(0), frame(1)],
    vec![Ok(vec![(0, 0.9)]), Ok(vec![(2, 0.9)])],
    true,
  );

  assert_eq!(
    h.detection.step().await,
    TickOutcome::Processed {
      detections: 1,
      render_failed: true,
    }
  );
  assert!(matches!(
    h.detection.step().await,
    TickOutcome::Processed {
      render_failed: true,
      ..
    }
  ));
  assert_eq!(h.detection.stats().render_failures, 2);
  assert_eq!(h.detection.session().labels(), vec!["Tomato", "Egg"]);
  assert_eq!(h.detection.ledger().live(), 0);
}

#[tokio::test]
async fn test_results_discarded_when_stopped_during_inference() {
  let mut h = harness(vec![frame(0)], vec![Ok(vec![(0, 0.9)])], false);
  let handle = h.detection.handle();
  *h.stop_during.borrow_mut() = Some(handle.clone());

  assert_eq!(h.detection.step().await, TickOutcome::Discarded);
  assert_eq!(h.calls.get(), 1);
  assert!(h.rendered.borrow().is_empty());
  assert!(handle.session().is_empty());
  assert_eq!(h.detection.ledger().live(), 0);
  assert_eq!(h.detection.stats().discarded, 1);
  assert_eq!(h.detection.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_run_stops_at_frame_limit() {
  let vocabulary = Arc::new(LabelVocabulary::new(["Tomato"]).unwrap());
  let engine = ScriptedEngine {
    script: VecDeque::new(),
    calls: Rc::new(Cell::new(0)),
    busy: Rc::new(Cell::new(false)),
    stop_during: Rc::new(RefCell::new(None)),
  };
  let calls = engine.calls.clone();
  let source = ImageFileInput::new(RgbImage::new(12, 12), true);

  let mut detection =
    DetectionLoop::builder(source, engine, RecordingRenderer::default(), vocabulary)
      .tick_period(Duration::from_millis(1))
      .max_frames(Some(3))
      .build()
      .unwrap();

  assert_eq!(detection.run().await, LoopExit::FrameLimit);
  assert_eq!(detection.stats().frames, 3);
  assert_eq!(calls.get(), 3);
  assert_eq!(detection.ledger().live(), 0);
}

#[tokio::test]
async fn test_run_returns_when_stopped() {
  let mut h = harness(vec![frame(0)], vec![], false);
  let handle = h.detection.handle();
  handle.stop();

  assert_eq!(h.detection.run().await, LoopExit::Stopped);
  assert_eq!(h.calls.get(), 0);
  assert_eq!(h.detection.state(), LoopState::Stopped);
}


#[tokio::test]
async fn test_run_skips_empty_ticks_and_resumes_after_restart() {
  let mut h = harness_with_limit(
    vec![frame(0), None, None, frame(3), frame(4)],
    vec![Ok(vec![(0, 0.9)]), Ok(vec![(1, 0.9)]), Ok(vec![(2, 0.9)])],
    false,
    Some(3),
  );
  let handle = h.detection.handle();
  *h.stop_during.borrow_mut() = Some(handle.clone());

  assert_eq!(h.detection.run().await, LoopExit::Stopped);
  assert_eq!(h.detection.stats().discarded, 1);
  assert!(handle.session().is_empty());

  handle.start();
  assert_eq!(h.detection.run().await, LoopExit::FrameLimit);

  let stats = h.detection.stats();
  assert_eq!(stats.ticks, 5);
  assert_eq!(stats.frames, 3);
  assert_eq!(stats.empty_ticks, 2);
  assert_eq!(h.calls.get(), 3);
  assert_eq!(handle.session().labels(), vec!["Onion", "Egg"]);
  assert_eq!(h.detection.ledger().live(), 0);
}

#[tokio::test]
async fn test_warm_up_leaves_no_buffers_or_labels() {
  let mut h = harness(vec![frame(0)], vec![Ok(vec![(0, 0.9)])], false);

  h.detection.warm_up().await.unwrap();
  assert_eq!(h.calls.get(), 1);
  assert_eq!(h.detection.ledger().live(), 0);
  assert!(h.detection.ledger().allocated() > 0);
  assert!(h.rendered.borrow().is_empty());
  assert!(h.reported.borrow().is_empty());
  assert!(h.detection.session().is_empty());
  assert_eq!(h.detection.stats().frames, 0);
}

#[tokio::test]
async fn test_replay_first_frame_after_warm_up_gets_first_record() {
  let vocabulary = Arc::new(LabelVocabulary::new(["Tomato", "Onion", "Egg"]).unwrap());
  let records = (0..3)
    .map(|class| RecordedOutputs {
      boxes: vec![0.1, 0.1, 0.5, 0.5],
      scores: vec![0.9],
      classes: vec![class],
    })
    .collect();
  let engine = ReplayEngine::from_records(SHAPE, records).unwrap();
  let source = ScriptedSource {
    frames: vec![frame(0), frame(1)].into(),
  };

  let mut detection =
    DetectionLoop::builder(source, engine, RecordingRenderer::default(), vocabulary)
      .build()
      .unwrap();
  detection.warm_up().await.unwrap();
  assert_eq!(detection.ledger().live(), 0);

  detection.step().await;
  assert_eq!(detection.session().labels(), vec!["Tomato"]);
  detection.step().await;
  assert_eq!(detection.session().labels(), vec!["Tomato", "Onion"]);
}

#[tokio::test]
async fn test_step_until_frame_waits_for_source() {
  let mut h = harness(vec![None, None, frame(0)], vec![Ok(vec![(1, 0.9)])], false);

  assert_eq!(
    h.detection.step_until_frame(Duration::from_secs(5)).await,
    TickOutcome::Processed {
      detections: 1,
      render_failed: false,
    }
  );
  assert_eq!(h.detection.stats().empty_ticks, 2);
  assert_eq!(h.detection.session().labels(), vec!["Onion"]);
}

#[tokio::test]
async fn test_step_until_frame_gives_up_after_deadline() {
  let mut h = harness(vec![], vec![], false);

  assert_eq!(
    h.detection.step_until_frame(Duration::from_millis(20)).await,
    TickOutcome::NoFrame
  );
  assert!(h.detection.stats().empty_ticks >= 1);
  assert_eq!(h.calls.get(), 0);
}
