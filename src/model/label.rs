// 该文件是 Xunshan （巡山） 项目的一部分。
// src/model/label.rs - 类别标签映射
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

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(serde_json::Error),
  #[error("标签文件必须是 JSON 对象")]
  NotAnObject,
  #[error("无效的类别 ID: {0}")]
  InvalidId(String),
  #[error("类别 {0} 的标签不是字符串")]
  InvalidLabel(String),
}

impl From<std::io::Error> for LabelError {
  fn from(err: std::io::Error) -> Self {
    LabelError::IoError(err)
  }
}

impl From<serde_json::Error> for LabelError {
  fn from(err: serde_json::Error) -> Self {
    LabelError::JsonError(err)
  }
}

/// 类别 ID 到标签名的映射，构造后不再修改
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap {
  labels: HashMap<i32, String>,
}

impl LabelMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// 行人检测模型的标签表
  pub fn pedestrian() -> Self {
    [(1, "pedestrian")].into_iter().collect()
  }

  pub fn insert(&mut self, id: i32, label: impl Into<String>) -> Option<String> {
    self.labels.insert(id, label.into())
  }

  /// 未登记的 ID 返回空字符串
  pub fn lookup(&self, id: i32) -> &str {
    self.labels.get(&id).map(String::as_str).unwrap_or_default()
  }

  pub fn contains(&self, id: i32) -> bool {
    self.labels.contains_key(&id)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// 从形如 `{"1": "pedestrian"}` 的 JSON 对象解析
  pub fn from_json_str(text: &str) -> Result<Self, LabelError> {
    let value: Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(LabelError::NotAnObject)?;

    let mut labels = LabelMap::new();
    for (key, label) in object {
      let id = key
        .trim()
        .parse::<i32>()
        .map_err(|_| LabelError::InvalidId(key.clone()))?;
      let label = label
        .as_str()
        .ok_or_else(|| LabelError::InvalidLabel(key.clone()))?;
      labels.insert(id, label);
    }
    Ok(labels)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let labels = Self::from_json_str(&text)?;
    debug!("从 {} 加载 {} 个标签", path.display(), labels.len());
    Ok(labels)
  }
}

impl<S: Into<String>> FromIterator<(i32, S)> for LabelMap {
  fn from_iter<I: IntoIterator<Item = (i32, S)>>(iter: I) -> Self {
    Self {
      labels: iter
        .into_iter()
        .map(|(id, label)| (id, label.into()))
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_id_yields_empty_label() {
    let labels = LabelMap::pedestrian();
    assert_eq!(labels.lookup(1), "pedestrian");
    assert_eq!(labels.lookup(2), "");
    assert_eq!(labels.lookup(-1), "");
    assert!(!labels.contains(0));
  }

  #[test]
  fn parse_json_object() {
    let labels = LabelMap::from_json_str(r#"{"1": "pedestrian", " 3 ": "car"}"#).unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.lookup(3), "car");
  }

  #[test]
  fn reject_malformed_json() {
    assert!(matches!(
      LabelMap::from_json_str(r#"["pedestrian"]"#),
      Err(LabelError::NotAnObject)
    ));
    assert!(matches!(
      LabelMap::from_json_str(r#"{"person": "pedestrian"}"#),
      Err(LabelError::InvalidId(_))
    ));
    assert!(matches!(
      LabelMap::from_json_str(r#"{"1": 7}"#),
      Err(LabelError::InvalidLabel(_))
    ));
    assert!(matches!(
      LabelMap::from_json_str("{"),
      Err(LabelError::JsonError(_))
    ));
  }
}
