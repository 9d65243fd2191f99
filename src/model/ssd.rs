// 该文件是 Xunshan （巡山） 项目的一部分。
// src/model/ssd.rs - 基于计算图的 SSD 检测器
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

use std::cmp::Ordering;
use std::path::PathBuf;
use std::str::FromStr;

use image::DynamicImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{AsNhwcFrame, RgbNhwcFrame},
  model::{
    DetectObject, Detector, DetectorError, LabelError, LabelMap, Rect,
    runtime::{GraphRuntime, GraphSession, InputTensor, OutputTensor},
  },
};

const SSD_SCHEME: &str = "ssd";
const SSD_MODEL_PATH: &str = "/usr/local/ev_sdk/model/ssd_inception_v2.onnx";
const SSD_INPUT_W: u32 = 300;
const SSD_INPUT_H: u32 = 300;
const SSD_OBJECT_THRESH: f32 = 0.5;
const SSD_INPUT_TENSOR: &str = "image_tensor";
const SSD_CLASSES_TENSOR: &str = "detection_classes";
const SSD_SCORES_TENSOR: &str = "detection_scores";
const SSD_BOXES_TENSOR: &str = "detection_boxes";
const SSD_BOX_SIZE: usize = 4;

#[derive(Error, Debug)]
pub enum SsdConfigError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("参数 `{key}` 的值无效: {value}")]
  InvalidParam { key: String, value: String },
  #[error("标签加载失败: {0}")]
  Labels(LabelError),
}

impl From<LabelError> for SsdConfigError {
  fn from(err: LabelError) -> Self {
    SsdConfigError::Labels(err)
  }
}

/// 三个输出张量的名称
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTensorNames {
  pub classes: String,
  pub scores: String,
  pub boxes: String,
}

impl Default for OutputTensorNames {
  fn default() -> Self {
    Self {
      classes: SSD_CLASSES_TENSOR.to_string(),
      scores: SSD_SCORES_TENSOR.to_string(),
      boxes: SSD_BOXES_TENSOR.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SsdConfig {
  /// 模型文件路径
  pub model_path: PathBuf,
  /// 类别标签表
  pub labels: LabelMap,
  /// 模型输入宽度
  pub input_width: u32,
  /// 模型输入高度
  pub input_height: u32,
  /// 输入张量名称
  pub input_tensor: String,
  pub output_tensors: OutputTensorNames,
  /// 有效检测数量张量，设置后用于截断候选框
  pub num_detections_tensor: Option<String>,
  /// 初始置信度阈值
  pub threshold: f32,
  /// 跳过标签表中不存在的类别
  pub skip_unknown_labels: bool,
}

impl Default for SsdConfig {
  fn default() -> Self {
    Self {
      model_path: PathBuf::from(SSD_MODEL_PATH),
      labels: LabelMap::pedestrian(),
      input_width: SSD_INPUT_W,
      input_height: SSD_INPUT_H,
      input_tensor: SSD_INPUT_TENSOR.to_string(),
      output_tensors: OutputTensorNames::default(),
      num_detections_tensor: None,
      threshold: SSD_OBJECT_THRESH,
      skip_unknown_labels: false,
    }
  }
}

#[derive(Debug, Default)]
pub struct SsdDetectorBuilder {
  config: SsdConfig,
}

impl FromUrlWithScheme for SsdDetectorBuilder {
  const SCHEME: &'static str = SSD_SCHEME;
}

impl FromUrl for SsdDetectorBuilder {
  type Error = SsdConfigError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(SsdConfigError::SchemeMismatch(url.scheme().to_string()));
    }

    let mut builder = SsdDetectorBuilder::new();
    if !url.path().is_empty() {
      let path = urlencoding::decode(url.path()).map_err(|_| SsdConfigError::InvalidParam {
        key: "path".to_string(),
        value: url.path().to_string(),
      })?;
      builder = builder.model_path(path.into_owned());
    }

    for (key, value) in url.query_pairs() {
      builder = match &*key {
        "width" => builder.input_width(parse_dimension(&key, &value)?),
        "height" => builder.input_height(parse_dimension(&key, &value)?),
        "threshold" => builder.threshold(parse_param(&key, &value)?),
        "labels" => builder.labels(LabelMap::from_json_file(&*value)?),
        "input" => builder.input_tensor(&*value),
        "classes" => builder.classes_tensor(&*value),
        "scores" => builder.scores_tensor(&*value),
        "boxes" => builder.boxes_tensor(&*value),
        "num_detections" => builder.num_detections_tensor(Some(&*value)),
        "skip_unknown" => builder.skip_unknown_labels(parse_flag(&key, &value)?),
        _ => {
          warn!("忽略未知参数: {}={}", key, value);
          builder
        }
      };
    }

    Ok(builder)
  }
}

fn parse_param<T: FromStr>(key: &str, value: &str) -> Result<T, SsdConfigError> {
  value.trim().parse().map_err(|_| SsdConfigError::InvalidParam {
    key: key.to_string(),
    value: value.to_string(),
  })
}

fn parse_dimension(key: &str, value: &str) -> Result<u32, SsdConfigError> {
  match parse_param(key, value)? {
    0 => Err(SsdConfigError::InvalidParam {
      key: key.to_string(),
      value: value.to_string(),
    }),
    dim => Ok(dim),
  }
}

// 只写参数名视为开启
fn parse_flag(key: &str, value: &str) -> Result<bool, SsdConfigError> {
  match value.trim() {
    "" | "1" | "true" | "yes" => Ok(true),
    "0" | "false" | "no" => Ok(false),
    _ => Err(SsdConfigError::InvalidParam {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

impl SsdDetectorBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_config(config: SsdConfig) -> Self {
    Self { config }
  }

  pub fn model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.config.model_path = path.into();
    self
  }

  pub fn labels(mut self, labels: LabelMap) -> Self {
    self.config.labels = labels;
    self
  }

  pub fn input_width(mut self, width: u32) -> Self {
    self.config.input_width = width;
    self
  }

  pub fn input_height(mut self, height: u32) -> Self {
    self.config.input_height = height;
    self
  }

  pub fn input_tensor(mut self, name: impl Into<String>) -> Self {
    self.config.input_tensor = name.into();
    self
  }

  pub fn classes_tensor(mut self, name: impl Into<String>) -> Self {
    self.config.output_tensors.classes = name.into();
    self
  }

  pub fn scores_tensor(mut self, name: impl Into<String>) -> Self {
    self.config.output_tensors.scores = name.into();
    self
  }

  pub fn boxes_tensor(mut self, name: impl Into<String>) -> Self {
    self.config.output_tensors.boxes = name.into();
    self
  }

  pub fn num_detections_tensor(mut self, name: Option<impl Into<String>>) -> Self {
    self.config.num_detections_tensor = name.map(Into::into);
    self
  }

  pub fn threshold(mut self, threshold: f32) -> Self {
    self.config.threshold = threshold;
    self
  }

  pub fn skip_unknown_labels(mut self, skip: bool) -> Self {
    self.config.skip_unknown_labels = skip;
    self
  }

  pub fn config(&self) -> &SsdConfig {
    &self.config
  }

  pub fn build_with_runtime<R: GraphRuntime>(self, runtime: R) -> SsdDetector<R> {
    let threshold = self.config.threshold;
    SsdDetector {
      runtime,
      config: self.config,
      threshold,
      state: SessionState::Uninitialized,
    }
  }

  #[cfg(feature = "runtime_ort")]
  pub fn build(self) -> SsdDetector<super::runtime::OrtRuntime> {
    self.build_with_runtime(super::runtime::OrtRuntime)
  }
}

enum SessionState<S> {
  Uninitialized,
  Ready(S),
  Closed,
}

impl<S> Default for SessionState<S> {
  fn default() -> Self {
    SessionState::Uninitialized
  }
}

/// 一次推理得到的全部输出
#[derive(Debug, Clone, Default)]
pub struct SsdOutputs {
  pub classes: OutputTensor,
  pub scores: OutputTensor,
  /// `[1, N, 4]`，每行为归一化的 `(ymin, xmin, ymax, xmax)`
  pub boxes: OutputTensor,
  pub num_detections: Option<OutputTensor>,
}

impl SsdOutputs {
  fn from_tensors(mut tensors: Vec<OutputTensor>, with_num_detections: bool) -> Result<Self, DetectorError> {
    let expected = if with_num_detections { 4 } else { 3 };
    if tensors.len() != expected {
      return Err(DetectorError::MalformedOutput(format!(
        "期望 {} 个输出, 实际为 {}",
        expected,
        tensors.len()
      )));
    }

    let num_detections = if with_num_detections { tensors.pop() } else { None };
    let boxes = tensors.pop().unwrap_or_default();
    let scores = tensors.pop().unwrap_or_default();
    let classes = tensors.pop().unwrap_or_default();
    Ok(Self {
      classes,
      scores,
      boxes,
      num_detections,
    })
  }

  /// 候选框数量，取自检测框张量的第二维
  fn candidates(&self) -> Result<usize, DetectorError> {
    let shape = &self.boxes.shape;
    let count = match shape.as_slice() {
      [_, n, 4] | [n, 4] => *n,
      _ => {
        return Err(DetectorError::MalformedOutput(format!(
          "检测框张量形状错误: {:?}",
          shape
        )));
      }
    };
    let mut count = count.max(0) as usize;

    if let Some(&num) = self.num_detections.as_ref().and_then(|t| t.data.first()) {
      count = count.min(num.max(0.0) as usize);
    }

    if self.boxes.data.len() < count * SSD_BOX_SIZE
      || self.classes.data.len() < count
      || self.scores.data.len() < count
    {
      return Err(DetectorError::MalformedOutput(format!(
        "输出长度不足: classes={}, scores={}, boxes={}, 候选数={}",
        self.classes.data.len(),
        self.scores.data.len(),
        self.boxes.data.len(),
        count
      )));
    }
    Ok(count)
  }
}

pub struct SsdDetector<R: GraphRuntime> {
  runtime: R,
  config: SsdConfig,
  threshold: f32,
  state: SessionState<R::Session>,
}

impl SsdConfig {
  /// 检查输入尺寸，零宽或零高会得到空的输入张量
  pub fn validate(&self) -> Result<(), SsdConfigError> {
    for (key, dim) in [("width", self.input_width), ("height", self.input_height)] {
      if dim == 0 {
        return Err(SsdConfigError::InvalidParam {
          key: key.to_string(),
          value: dim.to_string(),
        });
      }
    }
    Ok(())
  }

  /// 需要取回的输出张量名称，顺序为 classes、scores、boxes、num_detections
  fn output_names(&self) -> Vec<&str> {
    let names = &self.output_tensors;
    let mut output_names = vec![
      names.classes.as_str(),
      names.scores.as_str(),
      names.boxes.as_str(),
    ];
    if let Some(name) = &self.num_detections_tensor {
      output_names.push(name.as_str());
    }
    output_names
  }
}

impl<R: GraphRuntime> SsdDetector<R> {
  pub fn config(&self) -> &SsdConfig {
    &self.config
  }

  pub fn is_ready(&self) -> bool {
    matches!(self.state, SessionState::Ready(_))
  }

  fn close_session(&mut self) {
    match std::mem::take(&mut self.state) {
      SessionState::Ready(session) => {
        match session.close() {
          Ok(()) => info!("推理会话已关闭"),
          Err(e) => error!("无法关闭推理会话: {}", e),
        }
        self.state = SessionState::Closed;
      }
      other => self.state = other,
    }
  }

  /// 把输出张量解码为检测结果，坐标按原图尺寸还原
  pub fn postprocess(
    &self,
    outputs: &SsdOutputs,
    image_width: u32,
    image_height: u32,
  ) -> Result<Vec<DetectObject>, DetectorError> {
    let count = outputs.candidates()?;
    debug!("后处理 {} 个候选框", count);

    let width = image_width as f32;
    let height = image_height as f32;
    let mut objects = Vec::new();

    for (i, bbox) in outputs.boxes.data.chunks_exact(SSD_BOX_SIZE).take(count).enumerate() {
      let class_id = outputs.classes.data[i] as i32;
      let confidence = outputs.scores.data[i];
      let ymin = (bbox[0] * height) as i32;
      let xmin = (bbox[1] * width) as i32;
      let ymax = (bbox[2] * height) as i32;
      let xmax = (bbox[3] * width) as i32;

      // NaN 的置信度或阈值都不报告
      if confidence.partial_cmp(&self.threshold) != Some(Ordering::Greater) {
        continue;
      }

      if self.config.skip_unknown_labels && !self.config.labels.contains(class_id) {
        warn!("类别 {} 不在标签表中, 跳过", class_id);
        continue;
      }

      info!(
        "发现目标 label={}, confidence={}, ({}, {}, {}, {})",
        class_id, confidence, xmin, ymin, xmax, ymax
      );
      objects.push(DetectObject {
        probability: confidence,
        label: self.config.labels.lookup(class_id).to_string(),
        rect: Rect::from_corners(xmin, ymin, xmax, ymax),
      });
    }

    Ok(objects)
  }
}

impl<R: GraphRuntime> Detector for SsdDetector<R> {
  fn init(&mut self) -> Result<(), DetectorError> {
    if self.is_ready() {
      warn!("检测器已初始化, 跳过重复加载");
      return Ok(());
    }

    self.config.validate().map_err(|e| {
      error!("配置无效: {}", e);
      DetectorError::InvalidConfig(e)
    })?;

    let path = &self.config.model_path;
    if self.config.labels.is_empty() {
      warn!("标签表为空, 所有类别的标签都将为空字符串");
    } else {
      debug!("标签数量: {}", self.config.labels.len());
    }

    if !path.is_file() {
      error!("{} 不存在!", path.display());
      return Err(DetectorError::ModelNotFound(path.clone()));
    }

    info!("加载模型文件: {}", path.display());
    let buffer = std::fs::read(path).map_err(|e| {
      error!("无法读取模型文件 {}: {}", path.display(), e);
      DetectorError::ModelRead {
        path: path.clone(),
        source: e,
      }
    })?;
    if buffer.is_empty() {
      error!("模型文件为空: {}", path.display());
      return Err(DetectorError::EmptyModel(path.clone()));
    }
    debug!(
      "模型文件大小: {:.2} MB",
      buffer.len() as f64 / (1024.0 * 1024.0)
    );

    info!("导入计算图并创建推理会话");
    let session = self.runtime.load(&buffer).map_err(|e| {
      error!("模型加载失败: {}", e);
      DetectorError::Load(e)
    })?;
    info!("模型加载完成");

    self.state = SessionState::Ready(session);
    Ok(())
  }

  fn un_init(&mut self) {
    self.close_session();
  }

  fn process_image(&mut self, image: &DynamicImage) -> Result<Vec<DetectObject>, DetectorError> {
    let (image_width, image_height) = (image.width(), image.height());
    if image_width == 0 || image_height == 0 {
      error!("输入无效! 图像尺寸为 {}x{}", image_width, image_height);
      return Err(DetectorError::InvalidInput(format!(
        "图像尺寸为 {}x{}",
        image_width, image_height
      )));
    }

    let output_names = self.config.output_names();
    let session = match &mut self.state {
      SessionState::Ready(session) => session,
      _ => {
        error!("检测器尚未初始化");
        return Err(DetectorError::NotInitialized);
      }
    };

    // 准备输入
    let frame = RgbNhwcFrame::from_image(image, self.config.input_width, self.config.input_height);
    let shape = frame.tensor_shape();

    let input_name = self.config.input_tensor.as_str();
    if !session.has_input(input_name) {
      error!("找不到输入张量 `{}`", input_name);
      return Err(DetectorError::TensorNotFound {
        kind: "输入",
        name: input_name.to_string(),
      });
    }
    if let Some(&missing) = output_names.iter().find(|&&name| !session.has_output(name)) {
      error!("找不到输出张量 `{}`", missing);
      return Err(DetectorError::TensorNotFound {
        kind: "输出",
        name: missing.to_string(),
      });
    }

    // 执行推理
    debug!("执行模型推理");
    let input = InputTensor {
      name: input_name,
      shape: &shape,
      data: frame.as_nhwc(),
    };
    let result = session.run(input, &output_names);
    let with_num_detections = self.config.num_detections_tensor.is_some();
    drop(output_names);

    let tensors = match result {
      Ok(tensors) => tensors,
      Err(e) => {
        error!("推理失败: {}", e);
        self.close_session();
        return Err(DetectorError::Inference(e));
      }
    };

    // 解析输出
    let outputs = SsdOutputs::from_tensors(tensors, with_num_detections).inspect_err(|e| {
      error!("{}", e);
    })?;
    let objects = self.postprocess(&outputs, image_width, image_height)?;
    debug!("检测到 {} 个目标", objects.len());

    Ok(objects)
  }

  fn set_threshold(&mut self, threshold: f32) -> bool {
    self.threshold = threshold;
    true
  }

  fn threshold(&self) -> f32 {
    self.threshold
  }
}

impl<R: GraphRuntime> Drop for SsdDetector<R> {
  fn drop(&mut self) {
    self.close_session();
  }
}
