// 该文件是 Larder （灶间） 项目的一部分。
// src/aggregate.rs - 会话内检测标签汇总
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

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::vocabulary::LabelVocabulary;

/// 去重的标签集合，按首次出现的顺序保存
///
/// 相等比较只看成员，与插入顺序无关。
#[derive(Debug, Clone, Default)]
pub struct DetectedSet {
  order: Vec<String>,
  members: HashSet<String>,
}

impl PartialEq for DetectedSet {
  fn eq(&self, other: &Self) -> bool {
    self.members == other.members
  }
}

impl Eq for DetectedSet {}

impl DetectedSet {
  pub fn contains(&self, label: &str) -> bool {
    self.members.contains(label)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.order.iter().map(String::as_str)
  }

  pub fn to_vec(&self) -> Vec<String> {
    self.order.clone()
  }

  fn insert(&mut self, label: &str) -> bool {
    if self.members.contains(label) {
      return false;
    }
    self.members.insert(label.to_string());
    self.order.push(label.to_string());
    true
  }

  fn clear(&mut self) {
    self.order.clear();
    self.members.clear();
  }
}

/// 汇总器，只接受标签表中存在的标签
#[derive(Debug, Clone)]
pub struct Aggregator {
  vocabulary: Arc<LabelVocabulary>,
  detected: DetectedSet,
}

impl Aggregator {
  pub fn new(vocabulary: Arc<LabelVocabulary>) -> Self {
    Self {
      vocabulary,
      detected: DetectedSet::default(),
    }
  }

  /// 合并一帧的标签：帧内重复的标签只计一次，已有标签忽略
  pub fn merge<I, S>(&mut self, labels: I) -> &DetectedSet
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut added = 0;
    for label in labels {
      let label = label.as_ref();
      if !self.vocabulary.contains(label) {
        debug!("忽略不在标签表中的标签: {}", label);
        continue;
      }
      if self.detected.insert(label) {
        info!("新检测到: {}", label);
        added += 1;
      }
    }
    if added > 0 {
      debug!("会话标签数量: {}", self.detected.len());
    }
    &self.detected
  }

  pub fn clear(&mut self) {
    info!("清空会话标签 ({} 个)", self.detected.len());
    self.detected.clear();
  }

  pub fn detected(&self) -> &DetectedSet {
    &self.detected
  }
}

/// 检测循环与外部控制共享的会话句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
  inner: Arc<Mutex<Aggregator>>,
}

impl SessionHandle {
  pub fn new(vocabulary: Arc<LabelVocabulary>) -> Self {
    Self {
      inner: Arc::new(Mutex::new(Aggregator::new(vocabulary))),
    }
  }

  /// 合并一帧的标签，返回新加入的标签数量
  pub fn merge<I, S>(&self, labels: I) -> usize
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut aggregator = self.inner.lock();
    let before = aggregator.detected().len();
    aggregator.merge(labels).len() - before
  }

  pub fn clear(&self) {
    self.inner.lock().clear();
  }

  pub fn snapshot(&self) -> DetectedSet {
    self.inner.lock().detected().clone()
  }

  pub fn labels(&self) -> Vec<String> {
    self.inner.lock().detected().to_vec()
  }

  pub fn len(&self) -> usize {
    self.inner.lock().detected().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vocabulary() -> Arc<LabelVocabulary> {
    Arc::new(LabelVocabulary::new(["apple", "Egg", "Tomato", "Onion"]).unwrap())
  }

  #[test]
  fn test_merge_is_idempotent() {
    let mut agg = Aggregator::new(vocabulary());
    agg.merge(["apple", "apple", "Egg"]);
    let set = agg.merge(["apple"]);
    assert_eq!(set.len(), 2);
    assert!(set.contains("apple"));
    assert!(set.contains("Egg"));
  }

  #[test]
  fn test_merge_order_does_not_change_membership() {
    let mut a = Aggregator::new(vocabulary());
    a.merge(["apple"]);
    a.merge(["Egg", "Tomato"]);

    let mut b = Aggregator::new(vocabulary());
    b.merge(["Tomato", "Egg"]);
    b.merge(["apple"]);

    let members = |agg: &Aggregator| {
      let mut v = agg.detected().to_vec();
      v.sort();
      v
    };
    assert_eq!(members(&a), members(&b));
    // 首次出现顺序保留
    assert_eq!(a.detected().to_vec(), vec!["apple", "Egg", "Tomato"]);
  }

  #[test]
  fn test_unknown_labels_filtered() {
    let mut agg = Aggregator::new(vocabulary());
    let set = agg.merge(["apple", "spaceship"]);
    assert_eq!(set.to_vec(), vec!["apple"]);
  }

  #[test]
  fn test_clear_then_merge() {
    let session = SessionHandle::new(vocabulary());
    assert_eq!(session.merge(["Tomato"]), 1);
    session.clear();
    assert!(session.is_empty());
    session.merge(["Onion"]);
    assert_eq!(session.labels(), vec!["Onion"]);
  }

  #[test]
  fn test_session_merge_counts_new_labels() {
    let session = SessionHandle::new(vocabulary());
    assert_eq!(session.merge(["Egg", "Egg", "apple"]), 2);
    assert_eq!(session.merge(["apple", "spaceship"]), 0);
    assert_eq!(session.merge(["Tomato", "apple"]), 1);
    assert_eq!(session.len(), 3);
  }

  #[test]
  fn test_sets_equal_regardless_of_order() {
    let mut a = Aggregator::new(vocabulary());
    a.merge(["apple", "Egg"]);
    let mut b = Aggregator::new(vocabulary());
    b.merge(["Egg", "apple"]);
    assert_ne!(a.detected().to_vec(), b.detected().to_vec());
    assert_eq!(a.detected(), b.detected());

    b.merge(["Onion"]);
    assert_ne!(a.detected(), b.detected());
  }
}
