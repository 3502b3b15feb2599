// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/input/video_file.rs - 视频文件输入
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

//! 视频文件输入模块
//!
//! 通过 `ffprobe` 读取视频流的尺寸与帧率，再由 `ffmpeg` 把视频解码为
//! `rgb24` 原始帧写到管道里，本模块逐帧读取。
//!
//! 解码器遇到损坏的数据立即退出（`-xerror`、`-err_detect explode`），
//! 不做错误隐藏；旋转元数据被忽略（`-noautorotate`），输出帧保持编码尺寸。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::{
  ffi::OsString,
  io::{ErrorKind, Read},
  path::{Path, PathBuf},
  process::{Child, ChildStdout, Command, Stdio},
};

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::{DecodeError, FrameSource, StreamGeometry, StreamOpenError};
use crate::{
  ffmpeg::{FfmpegTools, StderrTail},
  frame::{ChannelOrder, ColorFrame},
};

const RGB24_BYTES_PER_PIXEL: usize = 3;

#[derive(Debug, Deserialize)]
struct StreamList {
  #[serde(default)]
  streams: Vec<StreamInfo>,
}

#[derive(Debug, Deserialize)]
struct StreamInfo {
  codec_name: Option<String>,
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
  nb_frames: Option<String>,
}

/// 解析 `30000/1001` 或 `25` 形式的帧率，`0/0` 视为未知
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
  let fps = match raw.split_once('/') {
    Some((num, den)) => {
      let num: f64 = num.trim().parse().ok()?;
      let den: f64 = den.trim().parse().ok()?;
      if den == 0.0 {
        return None;
      }
      num / den
    }
    None => raw.trim().parse().ok()?,
  };
  (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// 从 ffprobe 的 JSON 输出中提取第一个视频流的几何信息
pub fn stream_geometry(json: &str, path: &Path) -> Result<StreamGeometry, StreamOpenError> {
  let list: StreamList = serde_json::from_str(json)
    .map_err(|e| StreamOpenError::Unreadable(path.to_path_buf(), e.to_string()))?;
  let stream = list
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| StreamOpenError::NoVideoStream(path.to_path_buf()))?;

  let width = stream.width.unwrap_or(0);
  let height = stream.height.unwrap_or(0);
  if width == 0 || height == 0 {
    return Err(StreamOpenError::InvalidGeometry(width, height));
  }

  let fps = stream
    .avg_frame_rate
    .as_deref()
    .and_then(parse_frame_rate)
    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));
  let frame_count = stream.nb_frames.as_deref().and_then(|n| n.parse().ok());
  debug!(
    "视频流编码: {}",
    stream.codec_name.as_deref().unwrap_or("未知")
  );

  Ok(StreamGeometry {
    width,
    height,
    fps,
    frame_count,
  })
}

/// 解码进程的参数，输入选项都在 `-i` 之前
pub fn decoder_args(path: &Path) -> Vec<OsString> {
  let mut args: Vec<OsString> = [
    "-hide_banner",
    "-nostdin",
    "-loglevel",
    "error",
    "-xerror",
    "-err_detect",
    "explode",
    "-noautorotate",
    "-i",
  ]
  .into_iter()
  .map(OsString::from)
  .collect();
  args.push(path.as_os_str().to_os_string());
  args.extend(
    [
      "-map",
      "0:v:0",
      "-fps_mode",
      "passthrough",
      "-f",
      "rawvideo",
      "-pix_fmt",
      "rgb24",
      "-",
    ]
    .into_iter()
    .map(OsString::from),
  );
  args
}

/// 视频输入源
///
/// 打开时先读出第一帧，解码器无法处理的流（例如缺少解码器）在这里就报告为
/// [`StreamOpenError`]。解码进程在迭代耗尽、出错或本对象被销毁时回收。
pub struct VideoFileInput {
  path: PathBuf,
  geometry: StreamGeometry,
  child: Child,
  stdout: Option<ChildStdout>,
  stderr: StderrTail,
  pending: Option<ColorFrame>,
  frame_index: u64,
  finished: bool,
}

impl VideoFileInput {
  pub fn open(path: &Path) -> Result<Self, StreamOpenError> {
    Self::open_with(path, &FfmpegTools::default())
  }

  pub fn open_with(path: &Path, tools: &FfmpegTools) -> Result<Self, StreamOpenError> {
    if !path.is_file() {
      return Err(StreamOpenError::NotFound(path.to_path_buf()));
    }

    let info = Command::new(&tools.ffprobe)
      .arg("-v")
      .arg("error")
      .arg("-select_streams")
      .arg("v:0")
      .arg("-show_entries")
      .arg("stream=codec_name,width,height,avg_frame_rate,r_frame_rate,nb_frames")
      .arg("-of")
      .arg("json")
      .arg(path)
      .stdin(Stdio::null())
      .output()
      .map_err(|e| StreamOpenError::ToolUnavailable("ffprobe", e))?;

    if !info.status.success() {
      let stderr = String::from_utf8_lossy(&info.stderr).trim().to_string();
      error!("ffprobe 错误: {}", stderr);
      return Err(StreamOpenError::Unreadable(path.to_path_buf(), stderr));
    }

    let geometry = stream_geometry(&String::from_utf8_lossy(&info.stdout), path)?;
    info!(
      "视频已打开: {} {}x{} @ {:?} fps, 总帧数: {:?}",
      path.display(),
      geometry.width,
      geometry.height,
      geometry.fps,
      geometry.frame_count
    );

    let mut child = Command::new(&tools.ffmpeg)
      .args(decoder_args(path))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| StreamOpenError::ToolUnavailable("ffmpeg", e))?;
    let stdout = child.stdout.take();
    let stderr = StderrTail::spawn("ffmpeg", child.stderr.take());

    let mut input = Self {
      path: path.to_path_buf(),
      geometry,
      child,
      stdout,
      stderr,
      pending: None,
      frame_index: 0,
      finished: false,
    };
    input.prefetch()?;
    Ok(input)
  }

  /// 读出第一帧；此时的解码失败说明流本身无法解码
  fn prefetch(&mut self) -> Result<(), StreamOpenError> {
    let undecodable = |path: &Path, e: DecodeError| {
      error!("无法解码视频 {}: {}", path.display(), e);
      StreamOpenError::Undecodable(path.to_path_buf(), e.to_string())
    };

    match self.read_frame() {
      Ok(Some(frame)) => {
        self.pending = Some(frame);
        Ok(())
      }
      Ok(None) => {
        self.finished = true;
        self.reap().map_err(|e| undecodable(&self.path, e))?;
        warn!("视频中没有可解码的帧: {}", self.path.display());
        Ok(())
      }
      Err(e) => {
        self.finished = true;
        let _ = self.child.kill();
        // 优先报告解码器自己的错误信息
        let e = self.reap().err().unwrap_or(e);
        Err(undecodable(&self.path, e))
      }
    }
  }

  fn frame_size(&self) -> usize {
    self.geometry.width as usize * self.geometry.height as usize * RGB24_BYTES_PER_PIXEL
  }

  /// 读满一帧；流在帧边界处结束时返回 Ok(None)
  fn read_frame(&mut self) -> Result<Option<ColorFrame>, DecodeError> {
    let expected = self.frame_size();
    let Some(stdout) = self.stdout.as_mut() else {
      return Ok(None);
    };

    let mut buffer = vec![0u8; expected];
    let mut filled = 0;
    while filled < expected {
      match stdout.read(&mut buffer[filled..]) {
        Ok(0) => break,
        Ok(n) => filled += n,
        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
        Err(e) => return Err(e.into()),
      }
    }

    match filled {
      0 => Ok(None),
      n if n == expected => ColorFrame::from_raw(
        self.geometry.width,
        self.geometry.height,
        buffer,
        ChannelOrder::Rgb,
      )
      .map(Some)
      .ok_or(DecodeError::Truncated {
        expected,
        actual: filled,
      }),
      actual => Err(DecodeError::Truncated { expected, actual }),
    }
  }

  /// 关闭管道并等待解码进程退出
  ///
  /// 日志级别为 error，所以非零退出码或任何错误输出都视为解码失败。
  fn reap(&mut self) -> Result<(), DecodeError> {
    self.stdout = None;
    let status = self.child.wait()?;
    let stderr = self.stderr.collect();
    if status.success() && stderr.is_empty() {
      return Ok(());
    }
    let message = if stderr.is_empty() {
      format!("解码进程退出: {}", status)
    } else {
      stderr
    };
    error!("ffmpeg 解码 {} 失败: {}", self.path.display(), message);
    Err(DecodeError::Decoder(message))
  }
}

impl Iterator for VideoFileInput {
  type Item = Result<ColorFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    let outcome = match self.pending.take() {
      Some(frame) => Ok(Some(frame)),
      None if self.finished => return None,
      None => self.read_frame(),
    };

    match outcome {
      Ok(Some(frame)) => {
        debug!("读取第 {} 帧", self.frame_index);
        self.frame_index += 1;
        Some(Ok(frame))
      }
      Ok(None) => {
        self.finished = true;
        info!("视频读取完毕，共 {} 帧", self.frame_index);
        self.reap().err().map(Err)
      }
      Err(e) => {
        self.finished = true;
        let _ = self.child.kill();
        let _ = self.reap();
        Some(Err(e))
      }
    }
  }
}

impl FrameSource for VideoFileInput {
  fn geometry(&self) -> StreamGeometry {
    self.geometry
  }
}

impl Drop for VideoFileInput {
  fn drop(&mut self) {
    self.stdout = None;
    if let Ok(None) = self.child.try_wait()
      && let Err(e) = self.child.kill()
    {
      warn!("结束解码进程失败: {}", e);
    }
    let _ = self.child.wait();
  }
}
