// 该文件是 Larder （灶间） 项目的一部分。
// src/model.rs - 推理引擎
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

use std::future::Future;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl,
  arena::{BufferLedger, FrameScope},
  frame::{FrameError, InputTensor, RawOutputs, TensorShape},
};

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输入形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("模型输出无效: {0}")]
  InvalidOutput(#[from] FrameError),
  #[error("推理计算错误: {0}")]
  ComputeError(String),
}

/// 持有已加载模型的推理引擎
///
/// `infer` 以 `&mut self` 调用，同一个引擎上不可能同时存在两次推理。
/// 输出按 `(boxes, scores, classIndices)` 的顺序组成 [`RawOutputs`]，
/// 缓冲区登记在调用方传入的帧作用域中。
pub trait InferenceEngine {
  /// 模型期望的输入形状 `[1, H, W, C]`
  fn input_shape(&self) -> TensorShape;

  fn infer(
    &mut self,
    input: &InputTensor,
    scope: &FrameScope,
  ) -> impl Future<Output = Result<RawOutputs, InferenceError>>;

  /// 预热结束后恢复到初始状态，有状态的引擎需要覆盖
  fn rewind(&mut self) {}
}

pub fn check_input_shape(expected: TensorShape, input: &InputTensor) -> Result<(), InferenceError> {
  if input.shape() != expected {
    return Err(InferenceError::ShapeMismatch {
      expected,
      actual: input.shape(),
    });
  }
  Ok(())
}

/// 用全 1 输入跑一次推理并丢弃结果，之后调用 [`InferenceEngine::rewind`]
pub async fn warm_up<E: InferenceEngine>(
  engine: &mut E,
  ledger: &BufferLedger,
) -> Result<(), InferenceError> {
  let now = std::time::Instant::now();
  let candidates = {
    let scope = ledger.scope(0);
    let dummy = InputTensor::filled(engine.input_shape(), 1, &scope);
    let outputs = engine.infer(&dummy, &scope).await?;
    outputs.len()
  };
  engine.rewind();
  info!(
    "模型预热完成，候选数量: {}, 耗时: {:.2?}",
    candidates,
    now.elapsed()
  );
  Ok(())
}

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{RecordedOutputs, ReplayEngine, ReplayEngineBuilder, ReplayEngineError};

#[cfg(feature = "model_rknn")]
mod rknn;
#[cfg(feature = "model_rknn")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnEngineError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_replay")]
  #[error("回放模型错误: {0}")]
  ReplayEngineError(#[from] ReplayEngineError),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 模型错误: {0}")]
  RknnEngineError(#[from] RknnEngineError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum EngineWrapper {
  #[cfg(feature = "model_replay")]
  Replay(ReplayEngine),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnEngine),
}

impl FromUrl for EngineWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_replay")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ReplayEngineBuilder::SCHEME {
        let engine = ReplayEngineBuilder::from_url(url)?.build()?;
        return Ok(EngineWrapper::Replay(engine));
      }
    }
    #[cfg(feature = "model_rknn")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RknnEngineBuilder::SCHEME {
        let engine = RknnEngineBuilder::from_url(url)?.build()?;
        return Ok(EngineWrapper::Rknn(engine));
      }
    }
    Err(ModelError::SchemeMismatch)
  }
}

impl InferenceEngine for EngineWrapper {
  fn input_shape(&self) -> TensorShape {
    match self {
      #[cfg(feature = "model_replay")]
      EngineWrapper::Replay(engine) => engine.input_shape(),
      #[cfg(feature = "model_rknn")]
      EngineWrapper::Rknn(engine) => engine.input_shape(),
    }
  }

  async fn infer(
    &mut self,
    input: &InputTensor,
    scope: &FrameScope,
  ) -> Result<RawOutputs, InferenceError> {
    match self {
      #[cfg(feature = "model_replay")]
      EngineWrapper::Replay(engine) => engine.infer(input, scope).await,
      #[cfg(feature = "model_rknn")]
      EngineWrapper::Rknn(engine) => engine.infer(input, scope).await,
    }
  }

  fn rewind(&mut self) {
    match self {
      #[cfg(feature = "model_replay")]
      EngineWrapper::Replay(engine) => engine.rewind(),
      #[cfg(feature = "model_rknn")]
      EngineWrapper::Rknn(engine) => engine.rewind(),
    }
  }
}
