// 该文件是 Larder （灶间） 项目的一部分。
// src/preprocess.rs - 帧预处理
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
use image::imageops::{self, FilterType};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::arena::FrameScope;
use crate::frame::{FrameError, InputTensor, RGB_CHANNELS, RawFrame, ScaleRatio, TensorShape};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
  #[error("不支持的输入形状: {0}")]
  UnsupportedShape(TensorShape),
  #[error("张量错误: {0}")]
  TensorError(#[from] FrameError),
}

/// 缩放策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
  /// 右侧与底部补黑边成正方形后缩放，保持长宽比
  #[default]
  Pad,
  /// 直接拉伸到目标尺寸
  Stretch,
}

/// 将原始帧转换为模型固定形状的输入张量
#[derive(Debug, Clone)]
pub struct Preprocessor {
  shape: TensorShape,
  mode: ResizeMode,
  filter: FilterType,
}

impl Preprocessor {
  pub fn new(shape: TensorShape, mode: ResizeMode) -> Result<Self, PreprocessError> {
    if shape.channels != RGB_CHANNELS || shape.is_empty() {
      return Err(PreprocessError::UnsupportedShape(shape));
    }
    Ok(Self {
      shape,
      mode,
      filter: FilterType::Triangle,
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn mode(&self) -> ResizeMode {
    self.mode
  }

  /// 返回输入张量以及将检测结果映射回原始帧的缩放比例
  pub fn preprocess(
    &self,
    frame: &RawFrame,
    scope: &FrameScope,
  ) -> Result<(InputTensor, ScaleRatio), PreprocessError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
      return Err(PreprocessError::EmptyFrame { width, height });
    }

    let target_w = self.shape.width as u32;
    let target_h = self.shape.height as u32;

    let (resized, ratio) = match self.mode {
      ResizeMode::Pad => {
        let max_size = width.max(height);
        let mut canvas = RgbImage::new(max_size, max_size);
        imageops::replace(&mut canvas, frame.image(), 0, 0);
        let resized = imageops::resize(&canvas, target_w, target_h, self.filter);
        let ratio = ScaleRatio {
          x: max_size as f32 / width as f32,
          y: max_size as f32 / height as f32,
        };
        (resized, ratio)
      }
      ResizeMode::Stretch => {
        let resized = imageops::resize(frame.image(), target_w, target_h, self.filter);
        (resized, ScaleRatio::IDENTITY)
      }
    };

    debug!(
      "第 {} 帧预处理: {}x{} -> {}, 缩放比例 ({:.3}, {:.3})",
      frame.index(),
      width,
      height,
      self.shape,
      ratio.x,
      ratio.y
    );

    let tensor = InputTensor::new(self.shape, resized.into_raw(), scope)?;
    Ok((tensor, ratio))
  }
}
