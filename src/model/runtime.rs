// 该文件是 Xunshan （巡山） 项目的一部分。
// src/model/runtime.rs - 计算图推理后端
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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
  #[error("计算图导入失败: {0}")]
  Import(String),
  #[error("推理会话创建失败: {0}")]
  Session(String),
  #[error("推理执行失败: {0}")]
  Run(String),
  #[error("推理会话关闭失败: {0}")]
  Close(String),
}

/// 按名称绑定的 `u8` 输入张量
#[derive(Debug, Clone, Copy)]
pub struct InputTensor<'a> {
  pub name: &'a str,
  pub shape: &'a [i64],
  pub data: &'a [u8],
}

/// 推理输出张量，数据已转换为 `f32`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTensor {
  pub shape: Vec<i64>,
  pub data: Vec<f32>,
}

impl OutputTensor {
  pub fn new(shape: Vec<i64>, data: Vec<f32>) -> Self {
    Self { shape, data }
  }
}

/// 计算图运行时：把序列化的计算图反序列化并打开推理会话
pub trait GraphRuntime {
  type Session: GraphSession;

  /// 导入 `buffer` 中的计算图，并以默认选项创建会话
  fn load(&self, buffer: &[u8]) -> Result<Self::Session, GraphError>;
}

pub trait GraphSession {
  fn has_input(&self, name: &str) -> bool;
  fn has_output(&self, name: &str) -> bool;

  /// 同步执行一次推理，输出按 `output_names` 的顺序返回
  fn run(
    &mut self,
    input: InputTensor<'_>,
    output_names: &[&str],
  ) -> Result<Vec<OutputTensor>, GraphError>;

  fn close(self) -> Result<(), GraphError>
  where
    Self: Sized;
}

#[cfg(feature = "runtime_ort")]
mod onnx {
  use ort::session::Session;
  use ort::value::TensorRef;
  use tracing::debug;

  use super::{GraphError, GraphRuntime, GraphSession, InputTensor, OutputTensor};

  /// ONNX Runtime 后端
  #[derive(Debug, Default, Clone, Copy)]
  pub struct OrtRuntime;

  pub struct OrtSession {
    session: Session,
  }

  impl GraphRuntime for OrtRuntime {
    type Session = OrtSession;

    fn load(&self, buffer: &[u8]) -> Result<Self::Session, GraphError> {
      let builder = Session::builder().map_err(|e| GraphError::Session(e.to_string()))?;
      let session = builder
        .commit_from_memory(buffer)
        .map_err(|e| GraphError::Import(e.to_string()))?;

      debug!(
        "模型输入: {:?}",
        session.inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>()
      );
      debug!(
        "模型输出: {:?}",
        session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
      );

      Ok(OrtSession { session })
    }
  }

  impl GraphSession for OrtSession {
    fn has_input(&self, name: &str) -> bool {
      self.session.inputs.iter().any(|input| input.name == name)
    }

    fn has_output(&self, name: &str) -> bool {
      self.session.outputs.iter().any(|output| output.name == name)
    }

    fn run(
      &mut self,
      input: InputTensor<'_>,
      output_names: &[&str],
    ) -> Result<Vec<OutputTensor>, GraphError> {
      let tensor = TensorRef::from_array_view((input.shape.to_vec(), input.data))
        .map_err(|e| GraphError::Run(format!("无法创建输入张量: {}", e)))?;

      let outputs = self
        .session
        .run(ort::inputs![input.name => tensor])
        .map_err(|e| GraphError::Run(e.to_string()))?;

      output_names
        .iter()
        .map(|&name| {
          let value = outputs
            .get(name)
            .ok_or_else(|| GraphError::Run(format!("缺少输出 `{}`", name)))?;
          let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| GraphError::Run(format!("输出 `{}` 不是 f32 张量: {}", name, e)))?;
          Ok(OutputTensor::new(
            shape.iter().copied().collect(),
            data.to_vec(),
          ))
        })
        .collect()
    }

    fn close(self) -> Result<(), GraphError> {
      drop(self.session);
      Ok(())
    }
  }
}

#[cfg(feature = "runtime_ort")]
pub use self::onnx::{OrtRuntime, OrtSession};
