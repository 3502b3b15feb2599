// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{detect::Detection, frame::ColorFrame};

// 文本渲染常量
const CAPTION_FONT_SIZE: f32 = 18.0;
const SUMMARY_FONT_SIZE: f32 = 24.0;
const SUMMARY_ORIGIN: (i32, i32) = (10, 30); // 左下基线
const CAPTION_GAP: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const SUMMARY_COLOR: [u8; 3] = [255, 0, 0]; // 红色

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {0}: {1}")]
  Io(String, std::io::Error),
  #[error("无效的字体文件 {0}")]
  Invalid(String),
}

/// 在帧上绘制检测框、标签与计数摘要
///
/// 颜色按 RGB 给出，绘制时映射到帧自己的通道顺序。
/// 默认使用内嵌字体，可以通过 [`Draw::from_font_file`] 换成其他字体。
pub struct Draw {
  font: Option<FontArc>,
  caption_scale: PxScale,
  summary_scale: PxScale,
  box_color: [u8; 3],
  summary_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    // 默认字体 DejaVu Sans
    let font_data: &'static [u8] = include_bytes!("../../assets/font.ttf");
    match FontArc::try_from_slice(font_data) {
      Ok(font) => Self {
        font: Some(font),
        ..Self::without_font()
      },
      Err(e) => {
        warn!("无法加载内嵌字体: {}，只绘制检测框", e);
        Self::without_font()
      }
    }
  }
}

impl Draw {
  pub fn without_font() -> Self {
    Self {
      font: None,
      caption_scale: PxScale::from(CAPTION_FONT_SIZE),
      summary_scale: PxScale::from(SUMMARY_FONT_SIZE),
      box_color: BOX_COLOR,
      summary_color: SUMMARY_COLOR,
    }
  }

  pub fn from_font_file(path: &Path) -> Result<Self, FontError> {
    let name = path.display().to_string();
    let data = std::fs::read(path).map_err(|e| FontError::Io(name.clone(), e))?;
    let font = FontArc::try_from_vec(data).map_err(|_| FontError::Invalid(name))?;
    Ok(Self {
      font: Some(font),
      ..Self::without_font()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 绘制一个检测框，标签文字放在框左上角的上方
  pub fn draw_detection(&self, frame: &mut ColorFrame, detection: &Detection) {
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let [x1, y1, x2, y2] = detection.bbox;
    let x_min = (x1.floor() as i32).clamp(0, w - 1);
    let y_min = (y1.floor() as i32).clamp(0, h - 1);
    let x_max = (x2.ceil() as i32).clamp(0, w - 1);
    let y_max = (y2.ceil() as i32).clamp(0, h - 1);

    // 退化框照常计数，但不绘制
    if x_min >= x_max || y_min >= y_max {
      debug!("跳过退化检测框: {:?}", detection.bbox);
      return;
    }

    let color = frame.color(self.box_color);
    for t in 0..BOX_THICKNESS {
      let (left, top) = (x_min + t, y_min + t);
      let (right, bottom) = (x_max - t, y_max - t);
      if left >= right || top >= bottom {
        break;
      }
      let rect =
        Rect::at(left, top).of_size((right - left + 1) as u32, (bottom - top + 1) as u32);
      draw_hollow_rect_mut(frame.pixels_mut(), rect, color);
    }

    if let Some(font) = &self.font {
      let text_top = (y_min - self.caption_scale.y as i32 - CAPTION_GAP).max(0);
      draw_text_mut(
        frame.pixels_mut(),
        color,
        x_min,
        text_top,
        self.caption_scale,
        font,
        &detection.caption(),
      );
    }
  }

  /// 在左上角绘制计数摘要，空摘要不绘制
  pub fn draw_summary(&self, frame: &mut ColorFrame, summary: &str) {
    if summary.is_empty() {
      return;
    }
    let Some(font) = &self.font else {
      return;
    };
    let color = frame.color(self.summary_color);
    let (x, baseline) = SUMMARY_ORIGIN;
    let top = (baseline - self.summary_scale.y as i32).max(0);
    draw_text_mut(
      frame.pixels_mut(),
      color,
      x,
      top,
      self.summary_scale,
      font,
      summary,
    );
  }
}
