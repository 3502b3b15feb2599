// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/frame.rs - 带通道顺序标记的帧定义
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

use std::{fmt, str::FromStr};

use image::{Rgb, RgbImage};

const COLOR_CHANNELS: usize = 3;

/// 像素的通道排列顺序
///
/// 检测器按训练时的通道顺序读取像素，顺序错了不会报错，只会让检测质量悄悄下降，
/// 所以帧总是带着顺序标记流转，转换必须显式调用 [`ColorFrame::into_order`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  pub fn as_str(&self) -> &'static str {
    match self {
      ChannelOrder::Rgb => "rgb",
      ChannelOrder::Bgr => "bgr",
    }
  }
}

impl fmt::Display for ChannelOrder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知的通道顺序: {}", other)),
    }
  }
}

/// 三通道像素缓冲区，NHWC 排列
///
/// 内部借用 [`RgbImage`] 存放数据；当顺序为 [`ChannelOrder::Bgr`] 时，
/// 每个像素的第 0 个分量是蓝色。
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
  pixels: RgbImage,
  order: ChannelOrder,
}

impl From<RgbImage> for ColorFrame {
  fn from(pixels: RgbImage) -> Self {
    Self {
      pixels,
      order: ChannelOrder::Rgb,
    }
  }
}

impl ColorFrame {
  pub fn new(pixels: RgbImage, order: ChannelOrder) -> Self {
    Self { pixels, order }
  }

  /// 从原始 NHWC 字节构造，长度不匹配时返回 None
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>, order: ChannelOrder) -> Option<Self> {
    if data.len() != COLOR_CHANNELS * width as usize * height as usize {
      return None;
    }
    RgbImage::from_raw(width, height, data).map(|pixels| Self { pixels, order })
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.pixels.dimensions()
  }

  pub fn channels(&self) -> usize {
    COLOR_CHANNELS
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn pixels(&self) -> &RgbImage {
    &self.pixels
  }

  pub fn pixels_mut(&mut self) -> &mut RgbImage {
    &mut self.pixels
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.pixels.as_raw()
  }

  /// 转换到目标通道顺序，顺序相同时原样返回
  pub fn into_order(mut self, order: ChannelOrder) -> Self {
    if self.order != order {
      for pixel in self.pixels.pixels_mut() {
        pixel.0.swap(0, 2);
      }
      self.order = order;
    }
    self
  }

  /// 转为用于显示/保存的 RGB 图像
  pub fn into_rgb_image(self) -> RgbImage {
    self.into_order(ChannelOrder::Rgb).pixels
  }

  /// 把按 RGB 给出的显示颜色映射到本帧的通道顺序
  pub fn color(&self, rgb: [u8; 3]) -> Rgb<u8> {
    match self.order {
      ChannelOrder::Rgb => Rgb(rgb),
      ChannelOrder::Bgr => Rgb([rgb[2], rgb[1], rgb[0]]),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> ColorFrame {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([10, 20, 30]));
    image.put_pixel(1, 0, Rgb([200, 100, 0]));
    ColorFrame::from(image)
  }

  #[test]
  fn into_order_swaps_red_and_blue() {
    let frame = sample().into_order(ChannelOrder::Bgr);
    assert_eq!(frame.order(), ChannelOrder::Bgr);
    assert_eq!(frame.as_nhwc(), &[30, 20, 10, 0, 100, 200]);

    let back = frame.into_rgb_image();
    assert_eq!(back.as_raw(), &vec![10, 20, 30, 200, 100, 0]);
  }

  #[test]
  fn into_same_order_keeps_pixels() {
    let frame = sample();
    let same = frame.clone().into_order(ChannelOrder::Rgb);
    assert_eq!(frame, same);
  }

  #[test]
  fn from_raw_rejects_wrong_length() {
    assert!(ColorFrame::from_raw(2, 2, vec![0; 11], ChannelOrder::Rgb).is_none());
    let frame = ColorFrame::from_raw(2, 2, vec![0; 12], ChannelOrder::Bgr).unwrap();
    assert_eq!(frame.dimensions(), (2, 2));
    assert_eq!(frame.order(), ChannelOrder::Bgr);
  }

  #[test]
  fn display_color_follows_frame_order() {
    let rgb = sample();
    assert_eq!(rgb.color([255, 0, 0]), Rgb([255, 0, 0]));
    let bgr = sample().into_order(ChannelOrder::Bgr);
    assert_eq!(bgr.color([255, 0, 0]), Rgb([0, 0, 255]));
  }

  #[test]
  fn channel_order_parses_case_insensitively() {
    assert_eq!("BGR".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
    assert_eq!("rgb".parse::<ChannelOrder>(), Ok(ChannelOrder::Rgb));
    assert!("yuv".parse::<ChannelOrder>().is_err());
  }
}
