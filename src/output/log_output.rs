// 该文件是 Larder （灶间） 项目的一部分。
// src/output/log_output.rs - 日志输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;

use tracing::info;

use crate::{
  FromUrlWithScheme,
  output::{FrameResult, Render},
};

/// 只把检测结果写入日志，不绘制图像
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl crate::FromUrl for LogOutput {
  type Error = Infallible;

  fn from_url(_url: &url::Url) -> Result<Self, Self::Error> {
    Ok(LogOutput)
  }
}

impl Render for LogOutput {
  type Error = Infallible;

  fn render_result(&self, result: &FrameResult<'_>) -> Result<(), Self::Error> {
    if result.is_empty() {
      return Ok(());
    }

    let frame = result.frame;
    info!(
      "帧 {} (时间: {}ms): 检测到 {} 个对象",
      frame.index(),
      frame.timestamp_ms(),
      result.detections.len()
    );
    for det in result.detections {
      let [x0, y0, x1, y1] = result
        .ratio
        .to_frame_box(&det.bbox, frame.width(), frame.height());
      let name = det
        .label
        .clone()
        .unwrap_or_else(|| format!("#{}", det.class_index));
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        name,
        det.score * 100.0,
        x0,
        y0,
        x1 - x0,
        y1 - y0
      );
    }
    Ok(())
  }
}
