// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/model/yolov5.rs - ONNX Runtime 上的 YOLOv5 检测器
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

use std::sync::Mutex;

use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{ChannelOrder, ColorFrame},
  model::{
    DetectResult, Detector, Device, InferenceError, LabelVocabulary, ModelConfig, ModelLoadError,
    parse_names_metadata,
    postprocess::{Letterbox, decode_yolov5, nms},
    read_labels_file,
  },
};

const NAMES_METADATA_KEY: &str = "names";
const YOLOV5_NUM_OUTPUT_DIMS: usize = 3;

/// 按偏好与当前环境确定实际使用的设备
pub fn resolve_device(preferred: Device) -> Device {
  let cuda_available = || match CUDAExecutionProvider::default().is_available() {
    Ok(available) => available,
    Err(e) => {
      debug!("探测 CUDA 失败: {}", e);
      false
    }
  };

  match preferred {
    Device::Cpu => Device::Cpu,
    Device::Auto => {
      if cuda_available() {
        Device::Cuda
      } else {
        Device::Cpu
      }
    }
    Device::Cuda => {
      if cuda_available() {
        Device::Cuda
      } else {
        warn!("CUDA 不可用，回退到 CPU");
        Device::Cpu
      }
    }
  }
}

pub struct Yolov5Onnx {
  session: Mutex<Session>,
  labels: LabelVocabulary,
  device: Device,
  input_size: u32,
  conf_threshold: f32,
  iou_threshold: f32,
  max_detections: usize,
  channel_order: ChannelOrder,
}

fn incompatible(e: ort::Error) -> ModelLoadError {
  ModelLoadError::Incompatible(e.to_string())
}

impl Yolov5Onnx {
  pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
    let model_data = std::fs::read(&config.path)
      .map_err(|e| ModelLoadError::Unreadable(config.path.clone(), e))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let device = resolve_device(config.device);
    info!("创建 ONNX Runtime 会话，设备: {}", device);
    let provider = match device {
      Device::Cuda => CUDAExecutionProvider::default().build(),
      _ => CPUExecutionProvider::default().build(),
    };
    let session = Session::builder()
      .map_err(incompatible)?
      .with_execution_providers([provider])
      .map_err(incompatible)?
      .commit_from_memory(&model_data)
      .map_err(incompatible)?;

    if session.outputs.is_empty() {
      error!("模型没有输出");
      return Err(ModelLoadError::Incompatible("模型没有输出".to_string()));
    }

    let labels = match &config.labels {
      Some(path) => {
        read_labels_file(path).map_err(|e| ModelLoadError::Unreadable(path.clone(), e))?
      }
      None => {
        let names = session
          .metadata()
          .and_then(|meta| meta.custom(NAMES_METADATA_KEY))
          .map_err(incompatible)?;
        names
          .as_deref()
          .and_then(parse_names_metadata)
          .ok_or_else(|| ModelLoadError::MissingLabels(config.path.clone()))?
      }
    };
    if labels.is_empty() {
      return Err(ModelLoadError::MissingLabels(config.path.clone()));
    }

    info!("模型加载完成，类别数: {}", labels.len());
    debug!("类别表: {:?}", labels.iter().collect::<Vec<_>>());

    Ok(Self {
      session: Mutex::new(session),
      labels,
      device,
      input_size: config.input_size,
      conf_threshold: config.conf_threshold,
      iou_threshold: config.iou_threshold,
      max_detections: config.max_detections,
      channel_order: config.channel_order,
    })
  }

  pub fn device(&self) -> Device {
    self.device
  }

  fn run(&self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>), InferenceError> {
    let size = self.input_size as usize;
    let runtime = |e: ort::Error| InferenceError::Runtime(e.to_string());

    let tensor = Tensor::from_array(([1usize, 3, size, size], input.into_boxed_slice()))
      .map_err(runtime)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| InferenceError::Runtime("会话锁已损坏".to_string()))?;
    let outputs = session.run(ort::inputs![tensor]).map_err(runtime)?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(runtime)?;

    let dims = shape
      .iter()
      .map(|&d| usize::try_from(d))
      .collect::<Result<Vec<_>, _>>()
      .map_err(|_| InferenceError::OutputShape(format!("{:?}", shape)))?;
    Ok((dims, data.to_vec()))
  }
}

impl Detector for Yolov5Onnx {
  fn labels(&self) -> &LabelVocabulary {
    &self.labels
  }

  fn channel_order(&self) -> ChannelOrder {
    self.channel_order
  }

  fn predict(&self, frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
    let letterbox = Letterbox::fit(frame.width(), frame.height(), self.input_size);
    debug!("执行模型推理");
    let (dims, data) = self.run(letterbox.tensor(frame))?;

    if dims.len() != YOLOV5_NUM_OUTPUT_DIMS || dims[0] != 1 {
      return Err(InferenceError::OutputShape(format!(
        "期望 [1, N, 5 + 类别数], 实际 {:?}",
        dims
      )));
    }

    let candidates = decode_yolov5(&data, dims[1], dims[2], &letterbox, self.conf_threshold);
    let items = nms(candidates, self.iou_threshold, self.max_detections);
    debug!("检测到 {} 个物体", items.len());

    Ok(DetectResult::from(items))
  }
}
