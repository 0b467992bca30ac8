// 该文件是 Larder （灶间） 项目的一部分。
// src/config.rs - 检测配置
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

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::preprocess::ResizeMode;
use crate::vocabulary::{LabelVocabulary, VocabularyError};

pub const DEFAULT_THRESHOLD: f32 = 0.25;
pub const DEFAULT_TICK_HZ: u32 = 60;
const DEFAULT_OUTPUT: &str = "log://";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  TomlError(#[from] toml::de::Error),
  #[error("置信度阈值必须在 [0, 1] 之间, 实际为 {0}")]
  ThresholdOutOfRange(f32),
  #[error("刷新频率必须大于 0")]
  InvalidTickRate,
  #[error("缺少配置项: {0}")]
  Missing(&'static str),
  #[error("URL 解析错误: {0}")]
  UrlError(#[from] url::ParseError),
}

/// 单次会话的检测配置，循环启动后不可修改
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectConfig {
  threshold: f32,
}

impl DetectConfig {
  pub fn new(threshold: f32) -> Result<Self, ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(ConfigError::ThresholdOutOfRange(threshold));
    }
    Ok(Self { threshold })
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }
}

impl Default for DetectConfig {
  fn default() -> Self {
    Self {
      threshold: DEFAULT_THRESHOLD,
    }
  }
}

/// 完整的流水线配置，可以从 TOML 文件加载
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// 模型地址，例如 `replay:///outputs.json` 或 `rknn:///model.rknn`
  pub model: Option<String>,
  /// 输入来源，例如 `image:///frame.png` 或 `gst://camera/dev/video0`
  pub input: Option<String>,
  /// 渲染输出，例如 `log://`、`image:///overlay.png`、`folder:///records`
  pub output: String,
  /// 标签文件，缺省使用内置 COCO 标签
  pub labels: Option<PathBuf>,
  pub threshold: f32,
  /// 每秒调度次数，对齐显示刷新率
  pub tick_hz: u32,
  pub resize: ResizeMode,
  pub max_frames: Option<u64>,
  /// 绘制标签文字使用的字体
  pub font: Option<PathBuf>,
  pub warm_up: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      model: None,
      input: None,
      output: DEFAULT_OUTPUT.to_string(),
      labels: None,
      threshold: DEFAULT_THRESHOLD,
      tick_hz: DEFAULT_TICK_HZ,
      resize: ResizeMode::default(),
      max_frames: None,
      font: None,
      warm_up: true,
    }
  }
}

impl PipelineConfig {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: PipelineConfig = toml::from_str(&content)?;
    Ok(config)
  }

  pub fn detect_config(&self) -> Result<DetectConfig, ConfigError> {
    DetectConfig::new(self.threshold)
  }

  pub fn tick_period(&self) -> Result<Duration, ConfigError> {
    if self.tick_hz == 0 {
      return Err(ConfigError::InvalidTickRate);
    }
    Ok(Duration::from_secs_f64(1.0 / self.tick_hz as f64))
  }

  pub fn model_url(&self) -> Result<Url, ConfigError> {
    let model = self.model.as_deref().ok_or(ConfigError::Missing("model"))?;
    Ok(Url::parse(model)?)
  }

  pub fn input_url(&self) -> Result<Url, ConfigError> {
    let input = self.input.as_deref().ok_or(ConfigError::Missing("input"))?;
    Ok(Url::parse(input)?)
  }

  /// 输出地址；配置了字体且地址中没有 `font` 参数时追加该参数
  pub fn output_url(&self) -> Result<Url, ConfigError> {
    let mut url = Url::parse(&self.output)?;
    if let Some(font) = &self.font
      && !url.query_pairs().any(|(k, _)| k == "font")
    {
      url
        .query_pairs_mut()
        .append_pair("font", &font.to_string_lossy());
    }
    Ok(url)
  }

  pub fn vocabulary(&self) -> Result<LabelVocabulary, VocabularyError> {
    match &self.labels {
      Some(path) => LabelVocabulary::from_path(path),
      None => Ok(LabelVocabulary::coco()),
    }
  }
}
