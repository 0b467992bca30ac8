// 该文件是 Larder （灶间） 项目的一部分。
// src/model/replay.rs - 回放录制的模型输出
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

//! 按顺序循环回放 JSON 文件中录制的原始输出，无需加速硬件即可跑通整条流水线。
//!
//! 文件格式为数组，每个元素对应一次推理：
//!
//! ```json
//! [
//!   { "boxes": [0.1, 0.1, 0.4, 0.5], "scores": [0.9], "classes": [47] },
//!   { "boxes": [], "scores": [], "classes": [] }
//! ]
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  arena::FrameScope,
  frame::{InputTensor, RGB_CHANNELS, RawOutputs, TensorShape},
  model::{InferenceEngine, InferenceError, check_input_shape},
  url_path,
};

const REPLAY_DEFAULT_SIZE: usize = 640;

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("录制文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("录制文件中没有任何输出")]
  NoRecords,
}

/// 一次推理的录制输出
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordedOutputs {
  pub boxes: Vec<f32>,
  pub scores: Vec<f32>,
  pub classes: Vec<i32>,
}

pub struct ReplayEngineBuilder {
  path: String,
  shape: TensorShape,
}

impl FromUrlWithScheme for ReplayEngineBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngineBuilder {
  type Error = ReplayEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayEngineError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(REPLAY_DEFAULT_SIZE);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(REPLAY_DEFAULT_SIZE);

    let path = url_path(url).map_err(|e| ReplayEngineError::ModelPathError(e.to_string()))?;

    Ok(ReplayEngineBuilder {
      path,
      shape: TensorShape::nhwc(height, width, RGB_CHANNELS),
    })
  }
}

impl ReplayEngineBuilder {
  pub fn shape(mut self, shape: TensorShape) -> Self {
    self.shape = shape;
    self
  }

  pub fn build(self) -> Result<ReplayEngine, ReplayEngineError> {
    info!("加载录制输出文件: {}", self.path);
    let content = std::fs::read_to_string(&self.path)?;
    let records: Vec<RecordedOutputs> = serde_json::from_str(&content)?;
    debug!("录制输出数量: {}", records.len());
    ReplayEngine::from_records(self.shape, records)
  }
}

pub struct ReplayEngine {
  shape: TensorShape,
  records: Vec<RecordedOutputs>,
  cursor: usize,
}

impl ReplayEngine {
  pub fn from_records(
    shape: TensorShape,
    records: Vec<RecordedOutputs>,
  ) -> Result<Self, ReplayEngineError> {
    if records.is_empty() {
      return Err(ReplayEngineError::NoRecords);
    }
    Ok(Self {
      shape,
      records,
      cursor: 0,
    })
  }
}

impl InferenceEngine for ReplayEngine {
  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  async fn infer(
    &mut self,
    input: &InputTensor,
    scope: &FrameScope,
  ) -> Result<RawOutputs, InferenceError> {
    check_input_shape(self.shape, input)?;

    let record = &self.records[self.cursor];
    self.cursor = (self.cursor + 1) % self.records.len();

    let outputs = RawOutputs::new(
      record.boxes.clone(),
      record.scores.clone(),
      record.classes.clone(),
      scope,
    )?;
    tokio::task::yield_now().await;
    Ok(outputs)
  }

  fn rewind(&mut self) {
    self.cursor = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::BufferLedger;

  fn record(score: f32, class: i32) -> RecordedOutputs {
    RecordedOutputs {
      boxes: vec![0.0, 0.0, 0.5, 0.5],
      scores: vec![score],
      classes: vec![class],
    }
  }

  #[tokio::test]
  async fn test_replay_cycles_records() {
    let shape = TensorShape::nhwc(4, 4, 3);
    let mut engine = ReplayEngine::from_records(shape, vec![record(0.9, 1), record(0.2, 2)]).unwrap();
    let ledger = BufferLedger::new();

    let mut seen = Vec::new();
    for frame in 0..3 {
      let scope = ledger.scope(frame);
      let input = InputTensor::filled(shape, 0, &scope);
      let outputs = engine.infer(&input, &scope).await.unwrap();
      seen.push(outputs.class_indices()[0]);
    }
    assert_eq!(seen, vec![1, 2, 1]);
    assert_eq!(ledger.live(), 0);
  }

  #[tokio::test]
  async fn test_replay_rejects_wrong_shape() {
    let mut engine =
      ReplayEngine::from_records(TensorShape::nhwc(4, 4, 3), vec![record(0.9, 1)]).unwrap();
    let ledger = BufferLedger::new();
    let scope = ledger.scope(0);
    let input = InputTensor::filled(TensorShape::nhwc(2, 2, 3), 0, &scope);
    let err = engine.infer(&input, &scope).await.unwrap_err();
    assert!(matches!(err, InferenceError::ShapeMismatch { .. }));
  }

  #[tokio::test]
  async fn test_warm_up_keeps_first_record_for_first_frame() {
    let shape = TensorShape::nhwc(4, 4, 3);
    let mut engine = ReplayEngine::from_records(
      shape,
      vec![record(0.9, 10), record(0.9, 11), record(0.9, 12)],
    )
    .unwrap();
    let ledger = BufferLedger::new();

    crate::model::warm_up(&mut engine, &ledger).await.unwrap();
    assert_eq!(ledger.live(), 0);

    let scope = ledger.scope(1);
    let input = InputTensor::filled(shape, 0, &scope);
    let outputs = engine.infer(&input, &scope).await.unwrap();
    assert_eq!(outputs.class_indices()[0], 10);
  }

  #[test]
  fn test_builder_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outputs.json");
    std::fs::write(
      &path,
      r#"[{"boxes": [0.1, 0.1, 0.2, 0.2], "scores": [0.7], "classes": [3]}]"#,
    )
    .unwrap();

    let url = Url::parse(&format!("replay://{}?width=320&height=320", path.display())).unwrap();
    let engine = ReplayEngineBuilder::from_url(&url).unwrap().build().unwrap();
    assert_eq!(engine.input_shape(), TensorShape::nhwc(320, 320, 3));
  }

  #[test]
  fn test_empty_records_rejected() {
    assert!(matches!(
      ReplayEngine::from_records(TensorShape::nhwc(4, 4, 3), Vec::new()),
      Err(ReplayEngineError::NoRecords)
    ));
  }
}
