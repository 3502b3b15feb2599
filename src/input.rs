// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use thiserror::Error;

use crate::frame::ColorFrame;

mod image_file;
mod video_file;

pub use self::image_file::{ImageFileInput, decode_image_bytes};
pub use self::video_file::{VideoFileInput, parse_frame_rate, stream_geometry};

/// 输入流的几何信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamGeometry {
  pub width: u32,
  pub height: u32,
  /// 帧率，静态图片没有帧率
  pub fps: Option<f64>,
  /// 容器声明的总帧数，仅用于日志
  pub frame_count: Option<u64>,
}

/// 按顺序产出帧的输入源，迭代结束即正常耗尽
pub trait FrameSource: Iterator<Item = Result<ColorFrame, DecodeError>> {
  fn geometry(&self) -> StreamGeometry;
}

#[derive(Error, Debug)]
pub enum StreamOpenError {
  #[error("输入文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("无法启动 {0}: {1}")]
  ToolUnavailable(&'static str, std::io::Error),
  #[error("无法读取视频容器 {0}: {1}")]
  Unreadable(PathBuf, String),
  #[error("文件中没有视频流: {0}")]
  NoVideoStream(PathBuf),
  #[error("视频尺寸无效: {0}x{1}")]
  InvalidGeometry(u32, u32),
  #[error("无法解码视频流 {0}: {1}")]
  Undecodable(PathBuf, String),
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("读取解码器输出失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("帧数据不完整: 期望 {expected} 字节, 实际 {actual} 字节")]
  Truncated { expected: usize, actual: usize },
  #[error("解码器异常退出: {0}")]
  Decoder(String),
}
