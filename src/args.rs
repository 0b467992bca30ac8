// 该文件是 Larder （灶间） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;
use larder::config::{ConfigError, PipelineConfig};

/// Larder 项目参数配置，命令行参数覆盖配置文件
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 模型地址
  /// - replay:///path/outputs.json?width=640&height=640
  /// - rknn:///path/model.rknn?width=640&height=640
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,

  /// 输入来源
  /// - image:///path/frame.png[?repeat]
  /// - gst://camera/dev/video0?width=640&height=480&fps=30
  /// - gst://file/path/video.mp4
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<String>,

  /// 渲染输出
  /// - log://
  /// - image:///path/overlay.png
  /// - folder:///path/records[?record=name|id][&always]
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<String>,

  /// 标签文件（JSON 数组或每行一个标签）
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub threshold: Option<f32>,

  /// 每秒调度次数
  #[arg(long, value_name = "HZ")]
  pub fps: Option<u32>,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<u64>,

  /// 绘制标签文字使用的字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 跳过模型预热
  #[arg(long)]
  pub no_warm_up: bool,
}

impl Args {
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::load(path)?,
      None => PipelineConfig::default(),
    };

    if let Some(model) = &self.model {
      config.model = Some(model.clone());
    }
    if let Some(input) = &self.input {
      config.input = Some(input.clone());
    }
    if let Some(output) = &self.output {
      config.output = output.clone();
    }
    if let Some(labels) = &self.labels {
      config.labels = Some(labels.clone());
    }
    if let Some(threshold) = self.threshold {
      config.threshold = threshold;
    }
    if let Some(fps) = self.fps {
      config.tick_hz = fps;
    }
    if self.max_frames.is_some() {
      config.max_frames = self.max_frames;
    }
    if let Some(font) = &self.font {
      config.font = Some(font.clone());
    }
    if self.no_warm_up {
      config.warm_up = false;
    }

    Ok(config)
  }
}
