// 该文件是 Larder （灶间） 项目的一部分。
// src/decode.rs - 检测结果解码
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

use tracing::debug;

use crate::frame::RawOutputs;
use crate::vocabulary::LabelVocabulary;

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 归一化到输入张量的 `[x_min, y_min, x_max, y_max]`
  pub bbox: [f32; 4],
  pub score: f32,
  pub class_index: i32,
  /// 类别索引不在标签表中时为 `None`，这类结果只绘制不汇总
  pub label: Option<String>,
}

/// 保留 `score >= threshold` 的候选，顺序与候选索引一致
pub fn decode(outputs: &RawOutputs, threshold: f32, vocabulary: &LabelVocabulary) -> Vec<Detection> {
  let detections: Vec<Detection> = outputs
    .scores()
    .iter()
    .zip(outputs.class_indices())
    .enumerate()
    .filter(|(_, (score, _))| **score >= threshold)
    .map(|(idx, (&score, &class_index))| Detection {
      bbox: outputs.bbox(idx),
      score,
      class_index,
      label: vocabulary.get(class_index).map(String::from),
    })
    .collect();

  debug!(
    "{} 个候选中 {} 个超过阈值 {}",
    outputs.len(),
    detections.len(),
    threshold
  );
  detections
}

/// 本帧中带标签的检测结果的标签（未去重）
pub fn labels_of(detections: &[Detection]) -> Vec<String> {
  detections
    .iter()
    .filter_map(|det| det.label.clone())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::BufferLedger;

  fn outputs(scope: &crate::arena::FrameScope, scores: Vec<f32>, classes: Vec<i32>) -> RawOutputs {
    let boxes = (0..scores.len())
      .flat_map(|i| {
        let v = i as f32 / 10.0;
        [v, v, v + 0.1, v + 0.1]
      })
      .collect();
    RawOutputs::new(boxes, scores, classes, scope).unwrap()
  }

  #[test]
  fn test_threshold_boundary_is_inclusive() {
    let ledger = BufferLedger::new();
    let scope = ledger.scope(0);
    let vocab = LabelVocabulary::new(["a", "b", "c"]).unwrap();
    let raw = outputs(&scope, vec![0.24, 0.25, 0.26], vec![0, 1, 2]);

    let dets = decode(&raw, 0.25, &vocab);
    let scores: Vec<f32> = dets.iter().map(|d| d.score).collect();
    assert_eq!(scores, vec![0.25, 0.26]);
  }

  #[test]
  fn test_order_follows_candidate_index() {
    let ledger = BufferLedger::new();
    let scope = ledger.scope(0);
    let vocab = LabelVocabulary::new(["a", "b", "c"]).unwrap();
    let raw = outputs(&scope, vec![0.9, 0.1, 0.5], vec![0, 1, 2]);

    let dets = decode(&raw, 0.3, &vocab);
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class_index, 0);
    assert_eq!(dets[0].bbox, [0.0, 0.0, 0.1, 0.1]);
    assert_eq!(dets[1].class_index, 2);
    assert_eq!(dets[1].bbox, raw.bbox(2));
  }

  #[test]
  fn test_unknown_class_kept_without_label() {
    let ledger = BufferLedger::new();
    let scope = ledger.scope(0);
    let vocab = LabelVocabulary::new(["apple"]).unwrap();
    let raw = outputs(&scope, vec![0.8, 0.7, 0.6], vec![0, 5, -1]);

    let dets = decode(&raw, 0.5, &vocab);
    assert_eq!(dets.len(), 3);
    assert_eq!(dets[0].label.as_deref(), Some("apple"));
    assert_eq!(dets[1].label, None);
    assert_eq!(dets[2].label, None);
    assert_eq!(labels_of(&dets), vec!["apple".to_string()]);
  }
}
