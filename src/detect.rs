// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/detect.rs - 单帧检测流程
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

use serde::Serialize;
use tracing::debug;

use crate::{
  error::PipelineError,
  frame::ColorFrame,
  model::{DetectResult, Detector, LabelVocabulary},
  output::Draw,
  tally::CountTally,
};

/// 一个检测到的物体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  /// `[x_min, y_min, x_max, y_max]`，像素坐标，已限制在图像范围内
  pub bbox: [f32; 4],
  pub label: String,
  pub confidence: f32,
}

impl Detection {
  /// 形如 `car 0.87` 的标签文字
  pub fn caption(&self) -> String {
    format!("{} {:.2}", self.label, self.confidence)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DetectionSet {
  items: Vec<Detection>,
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn tally(&self) -> CountTally {
    self.iter().map(|d| d.label.as_str()).collect()
  }
}

impl From<Vec<Detection>> for DetectionSet {
  fn from(items: Vec<Detection>) -> Self {
    Self { items }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

/// 绘制了检测结果的帧
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedFrame {
  pub frame: ColorFrame,
  pub detections: DetectionSet,
}

/// 把检测器原始输出转为带标签的检测集合
///
/// 类别编号必须落在类别表内；框坐标整理为左上/右下并限制在 `width`x`height` 内，
/// 置信度限制在 [0, 1]。这里不做阈值过滤和去重。
pub fn build_detections(
  result: &DetectResult,
  labels: &LabelVocabulary,
  width: u32,
  height: u32,
) -> Result<DetectionSet, PipelineError> {
  let (w, h) = (width as f32, height as f32);
  let mut items = Vec::with_capacity(result.items.len());
  for item in result.items.iter() {
    let label = labels
      .get(item.class_id)
      .ok_or(PipelineError::UnknownClass {
        class_id: item.class_id,
        len: labels.len(),
      })?;
    let [x1, y1, x2, y2] = item.bbox;
    let bbox = [
      x1.min(x2).clamp(0.0, w),
      y1.min(y2).clamp(0.0, h),
      x1.max(x2).clamp(0.0, w),
      y1.max(y2).clamp(0.0, h),
    ];
    items.push(Detection {
      bbox,
      label: label.to_string(),
      confidence: item.score.clamp(0.0, 1.0),
    });
  }
  Ok(DetectionSet::from(items))
}

/// 对单帧运行检测、计数并绘制
///
/// 帧的通道顺序必须与模型一致，转换由调用方通过 [`ColorFrame::into_order`] 完成。
/// 返回的帧尺寸与输入一致；没有检测结果时帧内容不变，计数为空。
pub fn detect_frame<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  frame: ColorFrame,
) -> Result<(AnnotatedFrame, CountTally), PipelineError> {
  let expected = model.channel_order();
  if frame.order() != expected {
    return Err(PipelineError::ChannelOrderMismatch {
      expected,
      found: frame.order(),
    });
  }

  let result = model.predict(&frame)?;
  let detections = build_detections(&result, model.labels(), frame.width(), frame.height())?;
  let counts = detections.tally();
  debug!("检测到 {} 个目标: {}", detections.len(), counts.summary());

  let mut frame = frame;
  for detection in &detections {
    draw.draw_detection(&mut frame, detection);
  }
  draw.draw_summary(&mut frame, &counts.summary());

  Ok((AnnotatedFrame { frame, detections }, counts))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::ChannelOrder,
    model::{DetectItem, InferenceError},
  };
  use image::RgbImage;

  struct Fixed {
    labels: LabelVocabulary,
    order: ChannelOrder,
    items: Vec<DetectItem>,
  }

  impl Fixed {
    fn new(items: Vec<DetectItem>) -> Self {
      Self {
        labels: LabelVocabulary::new(["car", "truck"]),
        order: ChannelOrder::Rgb,
        items,
      }
    }
  }

  impl Detector for Fixed {
    fn labels(&self) -> &LabelVocabulary {
      &self.labels
    }

    fn channel_order(&self) -> ChannelOrder {
      self.order
    }

    fn predict(&self, _frame: &ColorFrame) -> Result<DetectResult, InferenceError> {
      Ok(DetectResult::from(self.items.clone()))
    }
  }

  fn item(class_id: u32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score: 0.8,
      bbox,
    }
  }

  #[test]
  fn counts_and_keeps_dimensions() {
    let model = Fixed::new(vec![
      item(0, [1.0, 1.0, 10.0, 10.0]),
      item(1, [12.0, 2.0, 30.0, 20.0]),
      item(0, [5.0, 5.0, 15.0, 15.0]),
    ]);
    let frame = ColorFrame::from(RgbImage::new(40, 30));
    let (annotated, counts) = detect_frame(&model, &Draw::without_font(), frame).unwrap();

    assert_eq!(annotated.frame.dimensions(), (40, 30));
    assert_eq!(annotated.detections.len(), 3);
    assert_eq!(counts.get("car"), 2);
    assert_eq!(counts.get("truck"), 1);
  }

  #[test]
  fn no_detections_leave_frame_unchanged() {
    let model = Fixed::new(Vec::new());
    let frame = ColorFrame::from(RgbImage::from_pixel(8, 8, image::Rgb([9, 9, 9])));
    let (annotated, counts) = detect_frame(&model, &Draw::default(), frame.clone()).unwrap();
    assert!(counts.is_empty());
    assert_eq!(annotated.frame, frame);
  }

  #[test]
  fn channel_order_mismatch_is_rejected() {
    let mut model = Fixed::new(Vec::new());
    model.order = ChannelOrder::Bgr;
    let frame = ColorFrame::from(RgbImage::new(4, 4));
    let err = detect_frame(&model, &Draw::without_font(), frame).unwrap_err();
    assert!(matches!(
      err,
      PipelineError::ChannelOrderMismatch {
        expected: ChannelOrder::Bgr,
        found: ChannelOrder::Rgb,
      }
    ));
  }

  #[test]
  fn unknown_class_is_an_error() {
    let model = Fixed::new(vec![item(5, [0.0, 0.0, 1.0, 1.0])]);
    let frame = ColorFrame::from(RgbImage::new(4, 4));
    let err = detect_frame(&model, &Draw::without_font(), frame).unwrap_err();
    assert!(matches!(
      err,
      PipelineError::UnknownClass { class_id: 5, len: 2 }
    ));
  }

  #[test]
  fn boxes_are_ordered_and_clamped() {
    let labels = LabelVocabulary::new(["car"]);
    let result = DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 1.2,
      bbox: [50.0, -3.0, 10.0, 25.0],
    }]);
    let set = build_detections(&result, &labels, 32, 20).unwrap();
    let detection = set.iter().next().unwrap();
    assert_eq!(detection.bbox, [10.0, 0.0, 32.0, 20.0]);
    assert_eq!(detection.confidence, 1.0);
    assert_eq!(detection.caption(), "car 1.00");
  }
}
