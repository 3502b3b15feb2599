// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ChannelOrder, frame::ColorFrame};

mod labels;
mod path;
pub mod postprocess;
#[cfg(feature = "model_onnx")]
mod yolov5;

pub use self::labels::{LabelVocabulary, parse_names_metadata, read_labels_file};
pub use self::path::normalize_model_path;
#[cfg(feature = "model_onnx")]
pub use self::yolov5::{Yolov5Onnx, resolve_device};

/// 预训练检测器的能力抽象
///
/// 模型加载后不可变，`predict` 只读共享状态，可以在多个调用方之间并发使用。
pub trait Detector: Send + Sync {
  /// 类别表，`DetectItem::class_id` 是它的下标
  fn labels(&self) -> &LabelVocabulary;

  /// 模型训练时使用的通道顺序
  fn channel_order(&self) -> ChannelOrder {
    ChannelOrder::Rgb
  }

  fn predict(&self, frame: &ColorFrame) -> Result<DetectResult, InferenceError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  fn labels(&self) -> &LabelVocabulary {
    (**self).labels()
  }

  fn channel_order(&self) -> ChannelOrder {
    (**self).channel_order()
  }

  fn predict(&self, frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
    (**self).predict(frame)
  }
}

impl<D: Detector + ?Sized> Detector for &D {
  fn labels(&self) -> &LabelVocabulary {
    (**self).labels()
  }

  fn channel_order(&self) -> ChannelOrder {
    (**self).channel_order()
  }

  fn predict(&self, frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
    (**self).predict(frame)
  }
}

/// 检测器原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型文件无法读取: {0}, 错误: {1}")]
  Unreadable(PathBuf, std::io::Error),
  #[error("模型格式不兼容: {0}")]
  Incompatible(String),
  #[error("模型缺少类别表: {0}")]
  MissingLabels(PathBuf),
  #[error("模型配置错误: {0}")]
  InvalidConfig(String),
  #[error("未启用任何模型后端")]
  BackendUnavailable,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("模型输出形状异常: {0}")]
  OutputShape(String),
}

/// 推理设备偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  /// 加载时探测，有 CUDA 就用 CUDA
  #[default]
  Auto,
  Cuda,
  Cpu,
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Device::Auto => "auto",
      Device::Cuda => "cuda",
      Device::Cpu => "cpu",
    })
  }
}

impl FromStr for Device {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "auto" => Ok(Device::Auto),
      "cuda" | "gpu" => Ok(Device::Cuda),
      "cpu" => Ok(Device::Cpu),
      other => Err(format!("未知的设备: {}", other)),
    }
  }
}

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONF_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 1000;

/// 模型加载配置
///
/// 可以直接给出路径，也可以用 URL：
/// `onnx:///path/best.onnx?device=cpu&conf=0.3&iou=0.5&size=640&channel_order=rgb`，
/// 另有 `labels=/path/labels.txt` 指定类别表。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
  pub path: PathBuf,
  pub device: Device,
  pub input_size: u32,
  pub conf_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: usize,
  pub labels: Option<PathBuf>,
  pub channel_order: ChannelOrder,
}

impl ModelConfig {
  pub fn from_path(raw: &str) -> Self {
    Self {
      path: normalize_model_path(raw),
      device: Device::Auto,
      input_size: DEFAULT_INPUT_SIZE,
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      max_detections: DEFAULT_MAX_DETECTIONS,
      labels: None,
      channel_order: ChannelOrder::Rgb,
    }
  }

  /// 按 `onnx://` 前缀区分 URL 与普通路径，`file://` 交给路径规范化处理
  pub fn from_location(location: &str) -> Result<Self, ModelLoadError> {
    let prefix = format!("{}://", Self::SCHEME);
    if location.starts_with(&prefix) {
      let url = Url::parse(location)
        .map_err(|e| ModelLoadError::InvalidConfig(format!("{}: {}", location, e)))?;
      Self::from_url(&url)
    } else {
      Ok(Self::from_path(location))
    }
  }

  pub fn with_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }
}

impl FromUrlWithScheme for ModelConfig {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for ModelConfig {
  type Error = ModelLoadError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::InvalidConfig(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| ModelLoadError::InvalidConfig(format!("模型路径编码错误: {}", e)))?;
    let mut config = Self::from_path(&path);

    for (key, value) in url.query_pairs() {
      let invalid = |e: &dyn fmt::Display| {
        ModelLoadError::InvalidConfig(format!("参数 {}={} 无效: {}", key, value, e))
      };
      match key.as_ref() {
        "device" => config.device = value.parse::<Device>().map_err(|e| invalid(&e))?,
        "size" => config.input_size = value.parse::<u32>().map_err(|e| invalid(&e))?,
        "conf" => config.conf_threshold = value.parse::<f32>().map_err(|e| invalid(&e))?,
        "iou" => config.iou_threshold = value.parse::<f32>().map_err(|e| invalid(&e))?,
        "max_det" => config.max_detections = value.parse::<usize>().map_err(|e| invalid(&e))?,
        "labels" => config.labels = Some(normalize_model_path(&value)),
        "channel_order" => {
          config.channel_order = value.parse::<ChannelOrder>().map_err(|e| invalid(&e))?
        }
        _ => return Err(invalid(&"未知参数")),
      }
    }

    if config.input_size == 0 || config.input_size % 32 != 0 {
      return Err(ModelLoadError::InvalidConfig(format!(
        "输入尺寸 {} 必须是 32 的正整数倍",
        config.input_size
      )));
    }
    for (name, threshold) in [
      ("conf", config.conf_threshold),
      ("iou", config.iou_threshold),
    ] {
      if !(0.0..=1.0).contains(&threshold) {
        return Err(ModelLoadError::InvalidConfig(format!(
          "{} 阈值 {} 超出范围 [0, 1]",
          name, threshold
        )));
      }
    }

    Ok(config)
  }
}

/// 加载模型，进程内只需调用一次，返回的句柄在各次调用之间显式传递
pub fn load_model(location: &str, device: Device) -> Result<Box<dyn Detector>, ModelLoadError> {
  let mut config = ModelConfig::from_location(location)?;
  if device != Device::Auto {
    config.device = device;
  }
  load_model_with_config(&config)
}

pub fn load_model_with_config(config: &ModelConfig) -> Result<Box<dyn Detector>, ModelLoadError> {
  info!("加载模型: {}", config.path.display());
  if !config.path.exists() {
    return Err(ModelLoadError::NotFound(config.path.clone()));
  }

  #[cfg(feature = "model_onnx")]
  {
    let model = Yolov5Onnx::load(config)?;
    Ok(Box::new(model))
  }
  #[cfg(not(feature = "model_onnx"))]
  {
    Err(ModelLoadError::BackendUnavailable)
  }
}
