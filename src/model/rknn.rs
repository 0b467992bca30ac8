// 该文件是 Larder （灶间） 项目的一部分。
// src/model/rknn.rs - RKNN 推理引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  arena::FrameScope,
  frame::{InputTensor, RGB_CHANNELS, RawOutputs, TensorShape},
  model::{InferenceEngine, InferenceError, check_input_shape},
  url_path,
};

const RKNN_NUM_INPUTS: u32 = 1;
/// boxes、scores、classes 三个输出
const RKNN_MIN_OUTPUTS: u32 = 3;
const RKNN_DEFAULT_SIZE: usize = 640;

pub struct RknnEngine {
  context: Context,
  shape: TensorShape,
}

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl From<std::io::Error> for RknnEngineError {
  fn from(err: std::io::Error) -> Self {
    RknnEngineError::ModelLoadError(err)
  }
}

impl From<rknpu::Error> for RknnEngineError {
  fn from(err: rknpu::Error) -> Self {
    RknnEngineError::RknnError(err)
  }
}

impl RknnEngineError {
  pub fn invalid(msg: &str, e: rknpu::Error) -> Self {
    RknnEngineError::ModelInvalid(msg.to_string(), e)
  }
}

pub struct RknnEngineBuilder {
  model_path: String,
  flags: InitFlags,
  shape: TensorShape,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEngineBuilder {
  type Error = RknnEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnEngineError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(RKNN_DEFAULT_SIZE);
    let height = query
      .get("height")
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(RKNN_DEFAULT_SIZE);

    Ok(RknnEngineBuilder {
      model_path: url_path(url).map_err(|e| RknnEngineError::ModelPathError(e.to_string()))?,
      flags: InitFlags::default(),
      shape: TensorShape::nhwc(height, width, RGB_CHANNELS),
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnEngine, RknnEngineError> {
    info!("加载模型文件: {}", self.model_path);
    let mode_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      mode_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&mode_data, self.flags)?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RknnEngineError::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| RknnEngineError::invalid("无法获取输出数量", e))?;

    if num_inputs != RKNN_NUM_INPUTS {
      let msg = format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      error!("{}", msg);
      return Err(RknnEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    if num_outputs < RKNN_MIN_OUTPUTS {
      let msg = format!(
        "预期模型输出数量至少为 {}, 实际为 {}",
        RKNN_MIN_OUTPUTS, num_outputs
      );
      error!("{}", msg);
      return Err(RknnEngineError::invalid(&msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成，输入形状: {}", self.shape);
    Ok(RknnEngine {
      context,
      shape: self.shape,
    })
  }
}

fn compute_error(stage: &str, e: impl std::fmt::Display) -> InferenceError {
  InferenceError::ComputeError(format!("{}: {}", stage, e))
}

impl InferenceEngine for RknnEngine {
  fn input_shape(&self) -> TensorShape {
    self.shape
  }

  async fn infer(
    &mut self,
    input: &InputTensor,
    scope: &FrameScope,
  ) -> Result<RawOutputs, InferenceError> {
    check_input_shape(self.shape, input)?;

    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)
      .map_err(|e| compute_error("设置输入失败", e))?;

    debug!("执行模型推理");
    self
      .context
      .run()
      .map_err(|e| compute_error("推理失败", e))?;

    debug!("获取模型输出");
    let output = self
      .context
      .get_outputs()
      .map_err(|e| compute_error("获取输出失败", e))?;

    let boxes = output
      .get_f32(0)
      .map_err(|e| compute_error("读取 boxes 失败", e))?
      .to_vec();
    let scores = output
      .get_f32(1)
      .map_err(|e| compute_error("读取 scores 失败", e))?
      .to_vec();
    let classes = output
      .get_f32(2)
      .map_err(|e| compute_error("读取 classes 失败", e))?
      .iter()
      .map(|&c| c as i32)
      .collect();

    Ok(RawOutputs::new(boxes, scores, classes, scope)?)
  }
}
