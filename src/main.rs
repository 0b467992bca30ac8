// 该文件是 Larder （灶间） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::sync::Arc;
use std::{thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use larder::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::EngineWrapper,
  output::OutputWrapper,
  recipe::IngredientsRequest,
  task::{DetectionLoop, LoopExit},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  let config = args.pipeline_config().context("读取配置失败")?;

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .context("创建运行时失败")?;
  runtime.block_on(run(config))
}

async fn run(config: PipelineConfig) -> Result<()> {
  let model_url = config.model_url()?;
  let input_url = config.input_url()?;
  let output_url = config.output_url()?;

  info!("模型地址: {}", model_url);
  info!("输入来源: {}", input_url);
  info!("输出地址: {}", output_url);
  info!("置信度阈值: {}", config.threshold);

  let vocabulary = Arc::new(config.vocabulary()?);
  info!("标签数量: {}", vocabulary.len());

  let engine = EngineWrapper::from_url(&model_url)?;
  let input = InputWrapper::from_url(&input_url)?;
  let output = OutputWrapper::from_url(&output_url)?;

  let mut detection = DetectionLoop::builder(input, engine, output, vocabulary)
    .config(config.detect_config()?)
    .resize(config.resize)
    .tick_period(config.tick_period()?)
    .max_frames(config.max_frames)
    .build()?;

  if config.warm_up {
    detection.warm_up().await?;
  }

  let handle = detection.handle();
  let stop_handle = handle.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    stop_handle.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  match detection.run().await {
    LoopExit::Stopped => info!("检测已停止"),
    LoopExit::FrameLimit => info!("达到帧数上限"),
  }
  info!("统计: {}", detection.stats());

  let detected = handle.session().snapshot();
  info!("本次会话检测到: {:?}", detected.to_vec());
  match IngredientsRequest::from_session(&detected) {
    Ok(request) => println!("{}", request.to_json()?),
    Err(e) => warn!("{}", e),
  }

  info!("任务完成，退出");
  Ok(())
}
