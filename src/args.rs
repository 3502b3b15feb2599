// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/args.rs - 命令行参数配置
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

use std::path::PathBuf;

use clap::Parser;
use yatra::model::Device;

/// Yatra 车辆检测与计数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径或模型 URL
  /// 例如:
  /// - /models/yolov5s.onnx
  /// - onnx:///models/yolov5s.onnx?conf=0.3&iou=0.5&labels=/models/coco.txt
  #[arg(long, env = "YATRA_MODEL", value_name = "MODEL")]
  pub model: String,

  /// 输入文件（JPEG/PNG 图片或 MP4/AVI/MOV 视频）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 输出路径
  /// 图片默认为 <输入名>_annotated.png，视频默认为输入目录下的 <输入名>_annotated_<时间戳>.mp4
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<PathBuf>,

  /// 输入的 MIME 类型，不指定时按扩展名判断
  #[arg(long, value_name = "MIME")]
  pub mime: Option<String>,

  /// 推理设备: auto, cuda, cpu
  #[arg(long, env = "YATRA_DEVICE", default_value = "auto", value_name = "DEVICE")]
  pub device: Device,

  /// 标签文字使用的 TTF/OTF 字体，不指定时搜索系统字体
  #[arg(long, env = "YATRA_FONT", value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 以 JSON 格式在标准输出打印计数结果
  #[arg(long)]
  pub json: bool,
}
