// 该文件是 Larder （灶间） 项目的一部分。
// src/frame.rs - 帧与张量定义
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

use std::fmt;

use image::RgbImage;
use thiserror::Error;

use crate::arena::{FrameScope, Tracked};

pub const RGB_CHANNELS: usize = 3;
const BOX_COORDS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("输出候选数量不一致: boxes {boxes} 个坐标, scores {scores}, classes {classes}")]
  CandidateMismatch {
    boxes: usize,
    scores: usize,
    classes: usize,
  },
}

/// 摄像头采集到的一帧 RGB 图像
#[derive(Debug, Clone)]
pub struct RawFrame {
  image: RgbImage,
  index: u64,
  timestamp_ms: u64,
}

impl RawFrame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn index(&self) -> u64 {
    self.index
  }

  pub fn timestamp_ms(&self) -> u64 {
    self.timestamp_ms
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }
}

/// 模型输入形状 `[1, H, W, C]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl TensorShape {
  pub const fn nhwc(height: usize, width: usize, channels: usize) -> Self {
    Self {
      height,
      width,
      channels,
    }
  }

  pub fn dims(&self) -> [usize; 4] {
    [1, self.height, self.width, self.channels]
  }

  pub fn len(&self) -> usize {
    self.height * self.width * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[1, {}, {}, {}]",
      self.height, self.width, self.channels
    )
  }
}

/// NHWC 排列的 u8 输入张量，存储登记在当前帧作用域中
#[derive(Debug)]
pub struct InputTensor {
  shape: TensorShape,
  data: Tracked<Box<[u8]>>,
}

impl InputTensor {
  pub fn new(shape: TensorShape, data: Vec<u8>, scope: &FrameScope) -> Result<Self, FrameError> {
    if data.len() != shape.len() {
      return Err(FrameError::LengthMismatch {
        expected: shape.len(),
        actual: data.len(),
      });
    }

    Ok(Self {
      shape,
      data: scope.track(data.into_boxed_slice()),
    })
  }

  /// 以同一个值填满的张量，用于预热模型
  pub fn filled(shape: TensorShape, value: u8, scope: &FrameScope) -> Self {
    let data = vec![value; shape.len()].into_boxed_slice();
    Self {
      shape,
      data: scope.track(data),
    }
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }
}

/// 模型原始输出：boxes、scores、classIndices 三个平行缓冲区
///
/// boxes 中每个候选占 4 个浮点数 `[x_min, y_min, x_max, y_max]`，
/// 坐标归一化到输入张量空间。
#[derive(Debug)]
pub struct RawOutputs {
  boxes: Tracked<Box<[f32]>>,
  scores: Tracked<Box<[f32]>>,
  class_indices: Tracked<Box<[i32]>>,
}

impl RawOutputs {
  pub fn new(
    boxes: Vec<f32>,
    scores: Vec<f32>,
    class_indices: Vec<i32>,
    scope: &FrameScope,
  ) -> Result<Self, FrameError> {
    if boxes.len() != scores.len() * BOX_COORDS || class_indices.len() != scores.len() {
      return Err(FrameError::CandidateMismatch {
        boxes: boxes.len(),
        scores: scores.len(),
        classes: class_indices.len(),
      });
    }

    Ok(Self {
      boxes: scope.track(boxes.into_boxed_slice()),
      scores: scope.track(scores.into_boxed_slice()),
      class_indices: scope.track(class_indices.into_boxed_slice()),
    })
  }

  /// 候选数量
  pub fn len(&self) -> usize {
    self.scores.len()
  }

  pub fn is_empty(&self) -> bool {
    self.scores.is_empty()
  }

  pub fn boxes(&self) -> &[f32] {
    &self.boxes
  }

  pub fn scores(&self) -> &[f32] {
    &self.scores
  }

  pub fn class_indices(&self) -> &[i32] {
    &self.class_indices
  }

  pub fn bbox(&self, index: usize) -> [f32; 4] {
    let start = index * BOX_COORDS;
    let mut bbox = [0.0; 4];
    bbox.copy_from_slice(&self.boxes[start..start + BOX_COORDS]);
    bbox
  }
}

/// 输入张量坐标到原始帧坐标的缩放比例
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRatio {
  pub x: f32,
  pub y: f32,
}

impl ScaleRatio {
  pub const IDENTITY: ScaleRatio = ScaleRatio { x: 1.0, y: 1.0 };

  /// 将归一化的 bbox 映射为原始帧上的像素坐标
  pub fn to_frame_box(&self, bbox: &[f32; 4], frame_width: u32, frame_height: u32) -> [f32; 4] {
    let w = frame_width as f32 * self.x;
    let h = frame_height as f32 * self.y;
    [bbox[0] * w, bbox[1] * h, bbox[2] * w, bbox[3] * h]
  }
}
