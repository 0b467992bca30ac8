// 该文件是 Larder （灶间） 项目的一部分。
// src/vocabulary.rs - 类别标签表
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
use std::path::Path;

use thiserror::Error;
use tracing::info;

/// COCO 数据集类别名称
const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug)]
pub enum VocabularyError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("标签表为空")]
  Empty,
}

/// 类别索引到标签字符串的映射，启动时加载一次，之后只读
#[derive(Debug, Clone)]
pub struct LabelVocabulary {
  labels: Vec<String>,
  known: HashSet<String>,
}

impl LabelVocabulary {
  pub fn new<I, S>(labels: I) -> Result<Self, VocabularyError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    if labels.is_empty() {
      return Err(VocabularyError::Empty);
    }
    let known = labels.iter().cloned().collect();
    Ok(Self { labels, known })
  }

  /// 内置的 COCO 80 类标签
  pub fn coco() -> Self {
    let labels: Vec<String> = COCO_CLASSES.iter().map(|s| s.to_string()).collect();
    let known = labels.iter().cloned().collect();
    Self { labels, known }
  }

  /// 按扩展名加载：`.json` 为字符串数组，其余按每行一个标签读取
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, VocabularyError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let is_json = path
      .extension()
      .map(|ext| ext.eq_ignore_ascii_case("json"))
      .unwrap_or(false);
    if is_json {
      Self::from_json_str(&content)
    } else {
      Self::from_lines(&content)
    }
  }

  pub fn from_json_str(content: &str) -> Result<Self, VocabularyError> {
    let labels: Vec<String> = serde_json::from_str(content)?;
    Self::new(labels)
  }

  pub fn from_lines(content: &str) -> Result<Self, VocabularyError> {
    Self::new(
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    )
  }

  /// 越界或负数索引返回 `None`
  pub fn get(&self, class_index: i32) -> Option<&str> {
    usize::try_from(class_index)
      .ok()
      .and_then(|idx| self.labels.get(idx))
      .map(String::as_str)
  }

  pub fn contains(&self, label: &str) -> bool {
    self.known.contains(label)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}
