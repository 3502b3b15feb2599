// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/error.rs - 流程错误汇总
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

use std::fmt;

use thiserror::Error;

use crate::{
  frame::ChannelOrder,
  input::{DecodeError, StreamOpenError},
  model::{InferenceError, ModelLoadError},
  output::EncodeError,
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("无法打开输入: {0}")]
  StreamOpen(#[from] StreamOpenError),
  #[error("解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("编码失败: {0}")]
  Encode(#[from] EncodeError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("类别编号 {class_id} 超出类别表范围 (共 {len} 类)")]
  UnknownClass { class_id: u32, len: usize },
  #[error("通道顺序不匹配: 模型需要 {expected}, 帧为 {found}")]
  ChannelOrderMismatch {
    expected: ChannelOrder,
    found: ChannelOrder,
  },
  #[error("不支持的媒体类型: {0}")]
  UnsupportedMedia(String),
  #[error("任务已取消")]
  Cancelled,
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 错误的稳定分类，供调用方展示可区分的提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  ModelLoad,
  StreamOpen,
  Decode,
  Encode,
  Inference,
  UnknownClass,
  ChannelOrderMismatch,
  UnsupportedMedia,
  Cancelled,
  Io,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ErrorKind::ModelLoad => "model_load",
      ErrorKind::StreamOpen => "stream_open",
      ErrorKind::Decode => "decode",
      ErrorKind::Encode => "encode",
      ErrorKind::Inference => "inference",
      ErrorKind::UnknownClass => "unknown_class",
      ErrorKind::ChannelOrderMismatch => "channel_order_mismatch",
      ErrorKind::UnsupportedMedia => "unsupported_media",
      ErrorKind::Cancelled => "cancelled",
      ErrorKind::Io => "io",
    }
  }

  pub fn user_message(&self) -> &'static str {
    match self {
      ErrorKind::ModelLoad => "无法加载检测模型，请检查模型路径与格式",
      ErrorKind::StreamOpen => "无法打开视频，文件可能不存在或格式不受支持",
      ErrorKind::Decode => "媒体数据损坏，处理已中止",
      ErrorKind::Encode => "无法写出结果视频",
      ErrorKind::Inference => "模型推理失败",
      ErrorKind::UnknownClass => "模型输出了类别表之外的类别",
      ErrorKind::ChannelOrderMismatch => "图像通道顺序与模型不一致",
      ErrorKind::UnsupportedMedia => "不支持的文件类型，请上传 JPEG/PNG 图片或 MP4/AVI/MOV 视频",
      ErrorKind::Cancelled => "处理已取消",
      ErrorKind::Io => "文件读写失败",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::ModelLoad(_) => ErrorKind::ModelLoad,
      PipelineError::StreamOpen(_) => ErrorKind::StreamOpen,
      PipelineError::Decode(_) => ErrorKind::Decode,
      PipelineError::Encode(_) => ErrorKind::Encode,
      PipelineError::Inference(_) => ErrorKind::Inference,
      PipelineError::UnknownClass { .. } => ErrorKind::UnknownClass,
      PipelineError::ChannelOrderMismatch { .. } => ErrorKind::ChannelOrderMismatch,
      PipelineError::UnsupportedMedia(_) => ErrorKind::UnsupportedMedia,
      PipelineError::Cancelled => ErrorKind::Cancelled,
      PipelineError::Io(_) => ErrorKind::Io,
    }
  }

  /// 模型加载失败不可恢复，重试也不会成功
  pub fn is_fatal(&self) -> bool {
    matches!(self, PipelineError::ModelLoad(_))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn kinds_are_stable() {
    let err = PipelineError::from(StreamOpenError::NotFound(PathBuf::from("a.mp4")));
    assert_eq!(err.kind(), ErrorKind::StreamOpen);
    assert_eq!(err.kind().as_str(), "stream_open");
    assert!(!err.is_fatal());

    let err = PipelineError::from(ModelLoadError::NotFound(PathBuf::from("m.onnx")));
    assert_eq!(err.kind().to_string(), "model_load");
    assert!(err.is_fatal());

    let err = PipelineError::UnknownClass {
      class_id: 7,
      len: 2,
    };
    assert_eq!(err.kind(), ErrorKind::UnknownClass);
  }

  #[test]
  fn every_kind_has_a_distinct_message() {
    let kinds = [
      ErrorKind::ModelLoad,
      ErrorKind::StreamOpen,
      ErrorKind::Decode,
      ErrorKind::Encode,
      ErrorKind::Inference,
      ErrorKind::UnknownClass,
      ErrorKind::ChannelOrderMismatch,
      ErrorKind::UnsupportedMedia,
      ErrorKind::Cancelled,
      ErrorKind::Io,
    ];
    let mut messages: Vec<_> = kinds.iter().map(|k| k.user_message()).collect();
    messages.sort();
    messages.dedup();
    assert_eq!(messages.len(), kinds.len());
  }
}
