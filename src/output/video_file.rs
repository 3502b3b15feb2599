// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/output/video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 把标注后的帧以 `rgb24` 原始数据写入 `ffmpeg` 的标准输入，
//! 编码为 MPEG-4 Part 2 (`mp4v`) 的 MP4 文件，分辨率与帧率与输入一致。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::{
  io::Write,
  path::{Path, PathBuf},
  process::{Child, ChildStdin, Command, Stdio},
};

use tracing::{debug, error, info, warn};

use super::{EncodeError, FrameSink};
use crate::{
  ffmpeg::{FfmpegTools, StderrTail},
  frame::{ChannelOrder, ColorFrame},
  input::StreamGeometry,
};

/// 输出视频的四字符编码标记
pub const VIDEO_CODEC_TAG: &str = "mp4v";
const VIDEO_ENCODER: &str = "mpeg4";
const VIDEO_QUALITY: &str = "5"; // -q:v，1-31，越小质量越好
const DEFAULT_FPS: f64 = 25.0;

pub struct VideoFileOutput {
  path: PathBuf,
  width: u32,
  height: u32,
  child: Child,
  stdin: Option<ChildStdin>,
  stderr: StderrTail,
  frame_index: u64,
  finished: bool,
}

impl VideoFileOutput {
  pub fn create(path: &Path, geometry: StreamGeometry) -> Result<Self, EncodeError> {
    Self::create_with(path, geometry, &FfmpegTools::default())
  }

  pub fn create_with(
    path: &Path,
    geometry: StreamGeometry,
    tools: &FfmpegTools,
  ) -> Result<Self, EncodeError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    let fps = geometry.fps.unwrap_or(DEFAULT_FPS);
    info!(
      "开始编码视频: {}x{} @ {:.3} fps ({}) -> {}",
      geometry.width,
      geometry.height,
      fps,
      VIDEO_CODEC_TAG,
      path.display()
    );

    let mut child = Command::new(&tools.ffmpeg)
      .arg("-y") // 覆盖已存在的文件
      .arg("-hide_banner")
      .arg("-loglevel")
      .arg("error")
      .arg("-f")
      .arg("rawvideo")
      .arg("-pix_fmt")
      .arg("rgb24")
      .arg("-s")
      .arg(format!("{}x{}", geometry.width, geometry.height))
      .arg("-r")
      .arg(format!("{}", fps))
      .arg("-i")
      .arg("-")
      .arg("-an")
      .arg("-c:v")
      .arg(VIDEO_ENCODER)
      .arg("-tag:v")
      .arg(VIDEO_CODEC_TAG)
      .arg("-q:v")
      .arg(VIDEO_QUALITY)
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-f")
      .arg("mp4")
      .arg(path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(EncodeError::ToolUnavailable)?;
    let stdin = child.stdin.take();
    let stderr = StderrTail::spawn("ffmpeg", child.stderr.take());

    Ok(Self {
      path: path.to_path_buf(),
      width: geometry.width,
      height: geometry.height,
      child,
      stdin,
      stderr,
      frame_index: 0,
      finished: false,
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 只应在编码进程退出后调用
  fn encoder_error(&mut self) -> EncodeError {
    let stderr = self.stderr.collect();
    error!("ffmpeg 错误: {}", stderr);
    EncodeError::Encoder(stderr)
  }
}

impl FrameSink for VideoFileOutput {
  fn write_frame(&mut self, frame: &ColorFrame) -> Result<(), EncodeError> {
    if frame.dimensions() != (self.width, self.height) {
      return Err(EncodeError::FrameSize {
        expected: (self.width, self.height),
        actual: frame.dimensions(),
      });
    }
    let Some(stdin) = self.stdin.as_mut() else {
      return Err(EncodeError::Finished);
    };

    let written = match frame.order() {
      ChannelOrder::Rgb => stdin.write_all(frame.as_nhwc()),
      ChannelOrder::Bgr => stdin.write_all(frame.clone().into_rgb_image().as_raw()),
    };
    if let Err(e) = written {
      self.stdin = None;
      let _ = self.child.wait();
      return Err(match self.encoder_error() {
        EncodeError::Encoder(msg) if msg.is_empty() => EncodeError::Io(e),
        other => other,
      });
    }

    debug!("写入第 {} 帧", self.frame_index);
    self.frame_index += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), EncodeError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;
    // 关闭标准输入，ffmpeg 收到 EOF 后写入文件尾
    self.stdin = None;
    let status = self.child.wait()?;
    if !status.success() {
      return Err(match self.encoder_error() {
        EncodeError::Encoder(msg) if msg.is_empty() => {
          EncodeError::Encoder(format!("编码进程退出: {}", status))
        }
        other => other,
      });
    }
    // 正常退出时也要回收读取线程
    let _ = self.stderr.collect();
    info!(
      "视频已保存到文件: {} ({} 帧)",
      self.path.display(),
      self.frame_index
    );
    Ok(())
  }
}

impl Drop for VideoFileOutput {
  fn drop(&mut self) {
    self.stdin = None;
    if !self.finished {
      warn!("视频输出未正常结束，终止编码进程: {}", self.path.display());
      let _ = self.child.kill();
    }
    let _ = self.child.wait();
    let _ = self.stderr.collect();
  }
}
