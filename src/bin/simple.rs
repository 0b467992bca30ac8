// 该文件是 Larder （灶间） 项目的一部分。
// src/bin/simple.rs - 单帧推理测试代码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use larder::{
  FromUrl,
  config::{DEFAULT_THRESHOLD, DetectConfig},
  input::InputWrapper,
  model::EngineWrapper,
  output::OutputWrapper,
  task::{DetectionLoop, TickOutcome},
  vocabulary::LabelVocabulary,
};

/// 单帧推理参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 标签文件
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
  pub threshold: f32,
  /// 等待第一帧的最长秒数
  #[arg(long, default_value_t = 5)]
  pub wait: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let vocabulary = Arc::new(match &args.labels {
    Some(path) => LabelVocabulary::from_path(path)?,
    None => LabelVocabulary::coco(),
  });

  let input = InputWrapper::from_url(&args.input)?;
  let engine = EngineWrapper::from_url(&args.model)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let mut detection = DetectionLoop::builder(input, engine, output, vocabulary)
    .config(DetectConfig::new(args.threshold)?)
    .on_detect(|labels| info!("本帧标签: {:?}", labels))
    .build()?;

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let outcome = runtime.block_on(detection.step_until_frame(Duration::from_secs(args.wait)));
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  match outcome {
    TickOutcome::Processed { detections, .. } => {
      info!("检测到 {} 个对象", detections);
      info!("会话标签: {:?}", detection.session().labels());
      Ok(())
    }
    other => bail!("单帧推理未完成: {:?}", other),
  }
}
