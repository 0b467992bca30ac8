// 该文件是 Larder （灶间） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Instant;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RawFrame, input::FrameSource, url_path};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("路径错误: {0}")]
  PathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像作为帧来源
///
/// 默认只产生一帧；`?repeat` 时每次都返回同一张图像，模拟静止的摄像头。
pub struct ImageFileInput {
  image: RgbImage,
  repeat: bool,
  emitted: u64,
  started: Instant,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_path(url).map_err(|e| ImageFileInputError::PathError(e.to_string()))?;
    let image = ImageReader::open(&path)?.decode()?.into_rgb8();
    debug!("读取图像 {}: {}x{}", path, image.width(), image.height());

    let repeat = url.query_pairs().any(|(k, _)| k == "repeat");
    Ok(ImageFileInput::new(image, repeat))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, repeat: bool) -> Self {
    Self {
      image,
      repeat,
      emitted: 0,
      started: Instant::now(),
    }
  }
}

impl FrameSource for ImageFileInput {
  fn next_frame(&mut self) -> Option<RawFrame> {
    if !self.repeat && self.emitted > 0 {
      return None;
    }
    let index = self.emitted;
    self.emitted += 1;
    let timestamp_ms = self.started.elapsed().as_millis() as u64;
    Some(RawFrame::new(self.image.clone(), index, timestamp_ms))
  }
}
