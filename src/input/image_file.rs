// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use std::{io::Cursor, path::Path};

use image::ImageReader;
use tracing::debug;

use super::{DecodeError, FrameSource, StreamGeometry, StreamOpenError};
use crate::frame::ColorFrame;

/// 把 JPEG/PNG 字节解码为 RGB 帧，带透明通道的图片丢弃透明度
pub fn decode_image_bytes(bytes: &[u8]) -> Result<ColorFrame, DecodeError> {
  let image = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()?
    .decode()?
    .to_rgb8();
  debug!("图像解码完成: {}x{}", image.width(), image.height());
  Ok(ColorFrame::from(image))
}

/// 单帧输入源
pub struct ImageFileInput {
  frame: Option<ColorFrame>,
  width: u32,
  height: u32,
}

impl ImageFileInput {
  pub fn open(path: &Path) -> Result<Self, StreamOpenError> {
    if !path.exists() {
      return Err(StreamOpenError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)
      .map_err(|e| StreamOpenError::Unreadable(path.to_path_buf(), e.to_string()))?;
    let frame = decode_image_bytes(&bytes)
      .map_err(|e| StreamOpenError::Unreadable(path.to_path_buf(), e.to_string()))?;
    Ok(Self::from(frame))
  }
}

impl From<ColorFrame> for ImageFileInput {
  fn from(frame: ColorFrame) -> Self {
    let (width, height) = frame.dimensions();
    Self {
      frame: Some(frame),
      width,
      height,
    }
  }
}

impl Iterator for ImageFileInput {
  type Item = Result<ColorFrame, DecodeError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take().map(Ok)
  }
}

impl FrameSource for ImageFileInput {
  fn geometry(&self) -> StreamGeometry {
    StreamGeometry {
      width: self.width,
      height: self.height,
      fps: None,
      frame_count: Some(1),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::ChannelOrder;
  use image::{ImageFormat, Rgb, RgbImage};

  fn png_bytes() -> Vec<u8> {
    let image = RgbImage::from_pixel(5, 3, Rgb([1, 2, 3]));
    let mut bytes = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  #[test]
  fn decodes_png_bytes_as_rgb() {
    let frame = decode_image_bytes(&png_bytes()).unwrap();
    assert_eq!(frame.dimensions(), (5, 3));
    assert_eq!(frame.order(), ChannelOrder::Rgb);
    assert_eq!(&frame.as_nhwc()[..3], &[1, 2, 3]);
  }

  #[test]
  fn garbage_bytes_fail_to_decode() {
    assert!(decode_image_bytes(b"definitely not an image").is_err());
  }

  #[test]
  fn image_input_yields_exactly_one_frame() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("still.png");
    std::fs::write(&path, png_bytes()).unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    assert_eq!(input.geometry().width, 5);
    assert!(input.next().unwrap().is_ok());
    assert!(input.next().is_none());
  }

  #[test]
  fn missing_image_is_an_open_error() {
    let result = ImageFileInput::open(Path::new("/nonexistent/still.png"));
    assert!(matches!(result, Err(StreamOpenError::NotFound(_))));
  }
}
