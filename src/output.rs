// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::frame::ColorFrame;

pub mod draw;

mod image_file;
mod video_file;

pub use self::draw::{Draw, FontError};
pub use self::image_file::save_image;
pub use self::video_file::{VIDEO_CODEC_TAG, VideoFileOutput};

/// 按顺序接收帧的输出
pub trait FrameSink {
  /// 写入一帧
  fn write_frame(&mut self, frame: &ColorFrame) -> Result<(), EncodeError>;

  /// 完成写入
  fn finish(&mut self) -> Result<(), EncodeError>;
}

impl<S: FrameSink + ?Sized> FrameSink for &mut S {
  fn write_frame(&mut self, frame: &ColorFrame) -> Result<(), EncodeError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), EncodeError> {
    (**self).finish()
  }
}

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("无法启动 ffmpeg: {0}")]
  ToolUnavailable(std::io::Error),
  #[error("视频编码错误: {0}")]
  Encoder(String),
  #[error("帧尺寸 {actual:?} 与输出尺寸 {expected:?} 不一致")]
  FrameSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("输出已经结束")]
  Finished,
}
