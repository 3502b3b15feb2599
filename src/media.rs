// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/media.rs - 上传媒体处理入口
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

//! 上传媒体处理入口
//!
//! 接收“字节 + MIME 类型”，图片走单帧流程，视频先落盘再走流式流程。
//! 这一层只做分发与文件命名，不包含检测逻辑。

use std::{
  path::{Path, PathBuf},
  sync::{Arc, atomic::AtomicBool},
};

use chrono::Utc;
use image::RgbImage;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
  detect::{DetectionSet, detect_frame},
  error::PipelineError,
  input::decode_image_bytes,
  model::Detector,
  output::{Draw, save_image},
  tally::CountTally,
  task::{StreamOutcome, detect_video_file},
};

const DEFAULT_STEM: &str = "upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  /// 按 MIME 类型分类，忽略大小写与 `;` 之后的参数
  pub fn from_mime(mime: &str) -> Option<Self> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match essence.as_str() {
      "image/jpeg" | "image/jpg" | "image/png" => Some(MediaKind::Image),
      "video/mp4" | "video/avi" | "video/x-msvideo" | "video/msvideo" | "video/quicktime" => {
        Some(MediaKind::Video)
      }
      _ => None,
    }
  }
}

/// 按扩展名猜测 MIME 类型
pub fn guess_mime(path: &Path) -> Option<&'static str> {
  let ext = path.extension()?.to_str()?.to_ascii_lowercase();
  match ext.as_str() {
    "jpg" | "jpeg" => Some("image/jpeg"),
    "png" => Some("image/png"),
    "mp4" | "m4v" => Some("video/mp4"),
    "avi" => Some("video/x-msvideo"),
    "mov" | "qt" => Some("video/quicktime"),
    _ => None,
  }
}

/// 确定本地文件的 MIME 类型与媒体类别，显式给出的 MIME 优先于扩展名
pub fn resolve_media(
  path: &Path,
  mime: Option<&str>,
) -> Result<(String, MediaKind), PipelineError> {
  let mime = mime
    .or_else(|| guess_mime(path))
    .ok_or_else(|| PipelineError::UnsupportedMedia(path.display().to_string()))?;
  let kind =
    MediaKind::from_mime(mime).ok_or_else(|| PipelineError::UnsupportedMedia(mime.to_string()))?;
  Ok((mime.to_string(), kind))
}

/// 本地文件的默认输出路径，与输入放在同一目录
pub fn default_output(input: &Path, kind: MediaKind) -> PathBuf {
  let stem = input
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_else(|| "output".to_string());
  let name = match kind {
    MediaKind::Image => format!("{}_annotated.png", stem),
    MediaKind::Video => format!(
      "{}_annotated_{}.mp4",
      stem,
      Utc::now().format("%Y%m%d_%H%M%S")
    ),
  };
  input.with_file_name(name)
}

fn default_extension(mime: &str) -> &'static str {
  match mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase().as_str() {
    "video/avi" | "video/x-msvideo" | "video/msvideo" => "avi",
    "video/quicktime" => "mov",
    _ => "mp4",
  }
}

/// 一次上传
#[derive(Debug, Clone)]
pub struct MediaPayload {
  pub bytes: Vec<u8>,
  pub mime: String,
  /// 原始文件名，只用于生成输出文件名
  pub file_name: Option<String>,
}

impl MediaPayload {
  pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
    Self {
      bytes,
      mime: mime.into(),
      file_name: None,
    }
  }

  pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
    self.file_name = Some(file_name.into());
    self
  }

  /// 读取本地文件，MIME 类型为空时按扩展名猜测
  pub fn from_file(path: &Path, mime: Option<&str>) -> Result<Self, PipelineError> {
    let (mime, _) = resolve_media(path, mime)?;
    let bytes = std::fs::read(path)?;
    let mut payload = Self::new(bytes, mime);
    payload.file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    Ok(payload)
  }

  pub fn kind(&self) -> Result<MediaKind, PipelineError> {
    MediaKind::from_mime(&self.mime)
      .ok_or_else(|| PipelineError::UnsupportedMedia(self.mime.clone()))
  }

  fn stem(&self) -> String {
    let stem: String = self
      .file_name
      .as_deref()
      .and_then(|name| Path::new(name).file_stem())
      .map(|s| s.to_string_lossy())
      .unwrap_or_default()
      .chars()
      .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
      .collect();
    if stem.is_empty() {
      DEFAULT_STEM.to_string()
    } else {
      stem
    }
  }

  fn extension(&self) -> String {
    self
      .file_name
      .as_deref()
      .and_then(|name| Path::new(name).extension())
      .and_then(|ext| ext.to_str())
      .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
      .map(|ext| ext.to_ascii_lowercase())
      .unwrap_or_else(|| default_extension(&self.mime).to_string())
  }
}

/// 处理结果
#[derive(Debug, Clone)]
pub enum MediaOutcome {
  Image {
    /// RGB 顺序，可直接显示或保存
    annotated: RgbImage,
    counts: CountTally,
    detections: DetectionSet,
  },
  Video(StreamOutcome),
}

impl MediaOutcome {
  pub fn counts(&self) -> &CountTally {
    match self {
      MediaOutcome::Image { counts, .. } => counts,
      MediaOutcome::Video(outcome) => &outcome.counts,
    }
  }
}

/// 检测一张编码过的图片，返回 RGB 顺序的标注图
pub fn detect_image<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  bytes: &[u8],
) -> Result<(RgbImage, CountTally, DetectionSet), PipelineError> {
  let frame = decode_image_bytes(bytes)?.into_order(model.channel_order());
  let (annotated, counts) = detect_frame(model, draw, frame)?;
  info!("图片检测完成: [{}]", counts.summary());
  Ok((annotated.frame.into_rgb_image(), counts, annotated.detections))
}

/// 按 MIME 类型分发上传的媒体
///
/// 视频会先写入 `output_dir`，结果写到 `<stem>_annotated_<时间戳>.mp4`，
/// 上传副本在处理结束后删除，删除失败只记录警告。
pub fn process_media<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  payload: &MediaPayload,
  output_dir: &Path,
  cancel: Option<Arc<AtomicBool>>,
) -> Result<MediaOutcome, PipelineError> {
  match payload.kind()? {
    MediaKind::Image => {
      let (annotated, counts, detections) = detect_image(model, draw, &payload.bytes)?;
      Ok(MediaOutcome::Image {
        annotated,
        counts,
        detections,
      })
    }
    MediaKind::Video => {
      std::fs::create_dir_all(output_dir)?;
      let (upload, output) = video_paths(payload, output_dir);
      std::fs::write(&upload, &payload.bytes)?;
      info!("上传视频已保存: {}", upload.display());

      let result = detect_video_file(model, draw, &upload, &output, cancel);
      if let Err(e) = std::fs::remove_file(&upload) {
        warn!("删除上传副本 {} 失败: {}", upload.display(), e);
      }
      result.map(MediaOutcome::Video)
    }
  }
}

/// 本地文件的处理结果
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
  pub kind: MediaKind,
  pub output: PathBuf,
  pub counts: CountTally,
  pub frames: u64,
}

/// 处理本地文件，图片保存为标注图，视频直接按路径流式处理不做副本
pub fn process_file<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  input: &Path,
  mime: Option<&str>,
  output: Option<&Path>,
  cancel: Option<Arc<AtomicBool>>,
) -> Result<FileReport, PipelineError> {
  let (mime, kind) = resolve_media(input, mime)?;
  let output = output
    .map(Path::to_path_buf)
    .unwrap_or_else(|| default_output(input, kind));
  info!("输入: {} ({}), 输出: {}", input.display(), mime, output.display());

  match kind {
    MediaKind::Image => {
      let bytes = std::fs::read(input)?;
      let (annotated, counts, _) = detect_image(model, draw, &bytes)?;
      save_image(&annotated, &output)?;
      Ok(FileReport {
        kind,
        output,
        counts,
        frames: 1,
      })
    }
    MediaKind::Video => {
      let outcome = detect_video_file(model, draw, input, &output, cancel)?;
      Ok(FileReport {
        kind,
        output: outcome.output,
        counts: outcome.counts,
        frames: outcome.frames,
      })
    }
  }
}

fn video_paths(payload: &MediaPayload, output_dir: &Path) -> (PathBuf, PathBuf) {
  let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
  let stem = payload.stem();
  let upload = output_dir.join(format!("{}_upload_{}.{}", stem, timestamp, payload.extension()));
  let output = output_dir.join(format!("{}_annotated_{}.mp4", stem, timestamp));
  (upload, output)
}
