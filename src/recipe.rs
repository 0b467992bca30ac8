// 该文件是 Larder （灶间） 项目的一部分。
// src/recipe.rs - 菜谱服务请求与响应
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

//! 会话标签集合与菜谱服务之间的数据格式。只负责编码请求、解析响应，
//! 不发起网络请求。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::DetectedSet;

pub const NO_RECIPE: &str = "No recipe found.";

#[derive(Error, Debug)]
pub enum RecipeError {
  #[error("没有检测到任何食材")]
  NoIngredients,
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// `{"ingredients": "a, b, c"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngredientsRequest {
  pub ingredients: String,
}

impl IngredientsRequest {
  pub fn from_labels<I, S>(labels: I) -> Result<Self, RecipeError>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let labels: Vec<String> = labels
      .into_iter()
      .map(|label| label.as_ref().to_string())
      .collect();
    if labels.is_empty() {
      return Err(RecipeError::NoIngredients);
    }
    Ok(Self {
      ingredients: labels.join(", "),
    })
  }

  pub fn from_session(set: &DetectedSet) -> Result<Self, RecipeError> {
    Self::from_labels(set.iter())
  }

  pub fn to_json(&self) -> Result<String, RecipeError> {
    Ok(serde_json::to_string(self)?)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RecipeReply {
  #[serde(default)]
  pub recipe: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
  #[serde(default)]
  pub ingredients: Option<String>,
}

/// 按 `title:`、`ingredients:`、`directions:` 拆分的菜谱文本
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeSections {
  pub title: Option<String>,
  pub ingredients: Vec<String>,
  pub directions: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|s| !s.is_empty())
}

fn after_colon(line: &str) -> &str {
  line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or("")
}

fn split_parts<'a>(text: &'a str, separators: &'a [&'a str]) -> Vec<String> {
  let mut parts = vec![text];
  for sep in separators {
    parts = parts.into_iter().flat_map(|p| p.split(sep)).collect();
  }
  parts
    .into_iter()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(String::from)
    .collect()
}

impl RecipeReply {
  pub fn from_json(content: &str) -> Result<Self, RecipeError> {
    Ok(serde_json::from_str(content)?)
  }

  /// 菜谱文本，其次是错误信息，都没有时为 [`NO_RECIPE`]
  pub fn message(&self) -> &str {
    non_empty(&self.recipe)
      .or_else(|| non_empty(&self.error))
      .unwrap_or(NO_RECIPE)
  }

  pub fn sections(&self) -> Option<RecipeSections> {
    let text = non_empty(&self.recipe)?;
    let mut sections = RecipeSections::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
      let lower = line.to_lowercase();
      if lower.starts_with("title:") {
        sections.title = Some(after_colon(line).to_string());
      } else if lower.starts_with("ingredients:") {
        sections.ingredients = split_parts(after_colon(line), &["--", ","]);
      } else if lower.starts_with("directions:") {
        sections.directions = split_parts(after_colon(line), &["--"]);
      } else if !sections.directions.is_empty() {
        // 步骤跨行时接在后面
        sections.directions.extend(split_parts(line, &["--"]));
      }
    }
    Some(sections)
  }
}
