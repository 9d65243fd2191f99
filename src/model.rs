// 该文件是 Xunshan （巡山） 项目的一部分。
// src/model.rs - 检测器接口
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

use std::path::PathBuf;

use image::DynamicImage;
use thiserror::Error;

/// 检测器能力接口，新的模型后端只需实现该 trait
pub trait Detector {
  /// 加载模型并创建推理会话
  fn init(&mut self) -> Result<(), DetectorError>;

  /// 释放 `init` 获取的全部资源，可重复调用
  fn un_init(&mut self);

  /// 对单张图片做检测，每次调用返回新的结果列表
  fn process_image(&mut self, image: &DynamicImage) -> Result<Vec<DetectObject>, DetectorError>;

  /// 设置置信度阈值，不做范围检查
  fn set_threshold(&mut self, threshold: f32) -> bool;

  fn threshold(&self) -> f32;
}

/// 像素坐标下的矩形
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl Rect {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由左上角与右下角坐标构造
  pub fn from_corners(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
    Self::new(xmin, ymin, xmax - xmin, ymax - ymin)
  }

  pub fn right(&self) -> i32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> i32 {
    self.y + self.height
  }
}

/// 检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct DetectObject {
  /// 置信度
  pub probability: f32,
  /// 类别名称
  pub label: String,
  /// 边界框
  pub rect: Rect,
}

/// 状态码，数值与 SDK 约定保持一致
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  ErrorInvalidInput = 0x0101,
  ErrorInit = 0x0102,
  ErrorProcess = 0x0103,
  SuccessProcess = 0x1001,
  SuccessInit = 0x1002,
}

impl Status {
  pub const ERROR_BASE: i32 = 0x0100;

  pub fn code(self) -> i32 {
    self as i32
  }

  pub fn is_success(self) -> bool {
    matches!(self, Status::SuccessInit | Status::SuccessProcess)
  }

  pub fn of_init(result: &Result<(), DetectorError>) -> Self {
    match result {
      Ok(()) => Status::SuccessInit,
      Err(e) => e.status(),
    }
  }

  pub fn of_process<T>(result: &Result<T, DetectorError>) -> Self {
    match result {
      Ok(_) => Status::SuccessProcess,
      Err(e) => e.status(),
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("检测器配置无效: {0}")]
  InvalidConfig(SsdConfigError),
  #[error("模型文件不存在: {}", .0.display())]
  ModelNotFound(PathBuf),
  #[error("无法读取模型文件 {}: {source}", .path.display())]
  ModelRead {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("模型文件为空: {}", .0.display())]
  EmptyModel(PathBuf),
  #[error("模型加载失败: {0}")]
  Load(GraphError),
  #[error("检测器尚未初始化")]
  NotInitialized,
  #[error("找不到{kind}张量 `{name}`")]
  TensorNotFound { kind: &'static str, name: String },
  #[error("推理失败: {0}")]
  Inference(GraphError),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

impl DetectorError {
  pub fn status(&self) -> Status {
    match self {
      DetectorError::InvalidInput(_) => Status::ErrorInvalidInput,
      DetectorError::InvalidConfig(_)
      | DetectorError::ModelNotFound(_)
      | DetectorError::ModelRead { .. }
      | DetectorError::EmptyModel(_)
      | DetectorError::Load(_) => Status::ErrorInit,
      DetectorError::NotInitialized
      | DetectorError::TensorNotFound { .. }
      | DetectorError::Inference(_)
      | DetectorError::MalformedOutput(_) => Status::ErrorProcess,
    }
  }

  pub fn code(&self) -> i32 {
    self.status().code()
  }
}

mod label;
pub use self::label::{LabelError, LabelMap};

pub mod runtime;
pub use self::runtime::{GraphError, GraphRuntime, GraphSession};

mod ssd;
pub use self::ssd::{
  OutputTensorNames, SsdConfig, SsdConfigError, SsdDetector, SsdDetectorBuilder, SsdOutputs,
};

/// 按 URL 方案选择检测器实现
#[cfg(feature = "runtime_ort")]
pub fn create_detector(url: &url::Url) -> Result<Box<dyn Detector>, SsdConfigError> {
  use crate::{FromUrl, FromUrlWithScheme};

  match url.scheme() {
    SsdDetectorBuilder::SCHEME => Ok(Box::new(SsdDetectorBuilder::from_url(url)?.build())),
    other => Err(SsdConfigError::SchemeMismatch(other.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_codes_match_sdk() {
    assert_eq!(Status::ERROR_BASE, 0x0100);
    assert_eq!(Status::ErrorInvalidInput.code(), 0x0101);
    assert_eq!(Status::ErrorInit.code(), 0x0102);
    assert_eq!(Status::ErrorProcess.code(), 0x0103);
    assert_eq!(Status::SuccessProcess.code(), 0x1001);
    assert_eq!(Status::SuccessInit.code(), 0x1002);
    assert!(Status::SuccessInit.is_success());
    assert!(!Status::ErrorProcess.is_success());
  }

  #[test]
  fn errors_map_to_their_tier() {
    assert_eq!(
      DetectorError::InvalidInput("empty".into()).status(),
      Status::ErrorInvalidInput
    );
    assert_eq!(
      DetectorError::ModelNotFound(PathBuf::from("/nope")).code(),
      0x0102
    );
    assert_eq!(
      DetectorError::InvalidConfig(SsdConfigError::InvalidParam {
        key: "width".into(),
        value: "0".into()
      })
      .status(),
      Status::ErrorInit
    );
    assert_eq!(
      DetectorError::Load(GraphError::Import("bad".into())).status(),
      Status::ErrorInit
    );
    assert_eq!(
      DetectorError::Inference(GraphError::Run("bad".into())).status(),
      Status::ErrorProcess
    );
    assert_eq!(
      DetectorError::TensorNotFound {
        kind: "输出",
        name: "detection_boxes".into()
      }
      .status(),
      Status::ErrorProcess
    );

    assert_eq!(Status::of_init(&Ok(())), Status::SuccessInit);
    assert_eq!(
      Status::of_process(&Ok::<_, DetectorError>(Vec::<DetectObject>::new())),
      Status::SuccessProcess
    );
    assert_eq!(
      Status::of_process::<()>(&Err(DetectorError::NotInitialized)),
      Status::ErrorProcess
    );
  }

  #[test]
  fn rect_from_corners() {
    let rect = Rect::from_corners(80, 30, 240, 150);
    assert_eq!(rect, Rect::new(80, 30, 160, 120));
    assert_eq!((rect.right(), rect.bottom()), (240, 150));
  }
}
