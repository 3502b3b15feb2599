// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/model/postprocess.rs - YOLOv5 前后处理
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

use image::imageops::{self, FilterType};
use tracing::debug;

use crate::{frame::ColorFrame, model::DetectItem};

const LETTERBOX_FILL: f32 = 114.0 / 255.0;
const YOLOV5_BOX_FIELDS: usize = 5; // cx, cy, w, h, objectness

/// 等比缩放并居中填充到正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub size: u32,
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub resized_width: u32,
  pub resized_height: u32,
  pub source_width: u32,
  pub source_height: u32,
}

impl Letterbox {
  pub fn fit(source_width: u32, source_height: u32, size: u32) -> Self {
    let scale = (size as f32 / source_width as f32).min(size as f32 / source_height as f32);
    let resized_width = ((source_width as f32 * scale).round() as u32).clamp(1, size);
    let resized_height = ((source_height as f32 * scale).round() as u32).clamp(1, size);
    let dw = (size - resized_width) as f32 / 2.0;
    let dh = (size - resized_height) as f32 / 2.0;

    Self {
      size,
      scale,
      pad_x: (dw - 0.1).round().max(0.0),
      pad_y: (dh - 0.1).round().max(0.0),
      resized_width,
      resized_height,
      source_width,
      source_height,
    }
  }

  /// 把模型输入坐标系下的框映射回原图，并裁剪到原图范围内
  pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
    ]
  }

  /// 生成 NCHW、归一化到 [0, 1] 的浮点张量数据，通道顺序与帧一致
  pub fn tensor(&self, frame: &ColorFrame) -> Vec<f32> {
    let size = self.size as usize;
    let plane = size * size;
    let mut data = vec![LETTERBOX_FILL; 3 * plane];

    let resized = imageops::resize(
      frame.pixels(),
      self.resized_width,
      self.resized_height,
      FilterType::Triangle,
    );

    let (ox, oy) = (self.pad_x as usize, self.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (oy + y as usize) * size + ox + x as usize;
      for c in 0..3 {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    data
  }
}

/// 解码 `[N, 5 + classes]` 形状的 YOLOv5 输出，置信度 = 目标性 × 最高类别分数
pub fn decode_yolov5(
  data: &[f32],
  rows: usize,
  cols: usize,
  letterbox: &Letterbox,
  conf_threshold: f32,
) -> Vec<DetectItem> {
  let mut items = Vec::new();
  if cols <= YOLOV5_BOX_FIELDS {
    return items;
  }

  for row in data.chunks_exact(cols).take(rows) {
    let objectness = row[4];
    if objectness <= conf_threshold {
      continue;
    }

    let (class_id, class_score) = row[YOLOV5_BOX_FIELDS..]
      .iter()
      .enumerate()
      .fold((0usize, f32::MIN), |best, (i, &s)| {
        if s > best.1 { (i, s) } else { best }
      });

    let score = objectness * class_score;
    if score <= conf_threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox: letterbox.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]),
    });
  }

  debug!("置信度筛选后剩余 {} 个候选框", items.len());
  items
}

/// 按类别做非极大值抑制，结果按置信度降序，最多保留 `max_detections` 个
pub fn nms(
  mut items: Vec<DetectItem>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for item in items {
    if result.len() >= max_detections {
      break;
    }
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == item.class_id && iou(&kept.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      result.push(item);
    }
  }

  result
}

/// 计算两个 [x_min, y_min, x_max, y_max] 框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
