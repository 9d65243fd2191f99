// 该文件是 Xunshan （巡山） 项目的一部分。
// src/output.rs - 检测结果输出
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

use serde_json::{Value, json};

use crate::model::DetectObject;

/// 渲染为 `{"objects": [{"name", "confidence", "xmin", "ymin", "xmax", "ymax"}]}`
pub fn objects_to_json(objects: &[DetectObject]) -> Value {
  let objects: Vec<Value> = objects
    .iter()
    .map(|object| {
      json!({
        "name": object.label,
        "confidence": object.probability,
        "xmin": object.rect.x,
        "ymin": object.rect.y,
        "xmax": object.rect.right(),
        "ymax": object.rect.bottom(),
      })
    })
    .collect();
  json!({ "objects": objects })
}

pub fn objects_to_json_string(objects: &[DetectObject]) -> String {
  objects_to_json(objects).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::Rect;

  #[test]
  fn render_objects() {
    let objects = vec![DetectObject {
      probability: 0.5,
      label: "pedestrian".to_string(),
      rect: Rect::new(80, 30, 160, 120),
    }];
    let value = objects_to_json(&objects);

    assert_eq!(
      value,
      json!({
        "objects": [{
          "name": "pedestrian",
          "confidence": 0.5,
          "xmin": 80,
          "ymin": 30,
          "xmax": 240,
          "ymax": 150,
        }]
      })
    );
  }

  #[test]
  fn render_empty() {
    assert_eq!(objects_to_json_string(&[]), r#"{"objects":[]}"#);
  }
}
