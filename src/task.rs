// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/task.rs - 视频流检测任务
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

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  detect::detect_frame,
  error::PipelineError,
  ffmpeg::FfmpegTools,
  input::{FrameSource, VideoFileInput},
  model::Detector,
  output::{Draw, FrameSink, VideoFileOutput},
  tally::CountTally,
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 流式任务的累计结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamTotals {
  pub counts: CountTally,
  pub frames: u64,
}

/// 视频文件任务的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamOutcome {
  pub output: PathBuf,
  pub counts: CountTally,
  pub frames: u64,
}

/// 逐帧读取、检测、累计并写出，直到输入耗尽
///
/// 写出顺序与读取顺序一致，不丢帧也不跳帧。
/// 取消标记在读取每一帧之前检查一次。
pub struct StreamTask<'d> {
  draw: &'d Draw,
  cancel: Option<Arc<AtomicBool>>,
}

impl<'d> StreamTask<'d> {
  pub fn new(draw: &'d Draw) -> Self {
    Self { draw, cancel: None }
  }

  pub fn with_cancel(mut self, cancel: Option<Arc<AtomicBool>>) -> Self {
    self.cancel = cancel;
    self
  }

  fn cancelled(&self) -> bool {
    self
      .cancel
      .as_ref()
      .map(|flag| flag.load(Ordering::SeqCst))
      .unwrap_or(false)
  }
}

impl<I: FrameSource, M: Detector, O: FrameSink> Task<I, M, O> for StreamTask<'_> {
  type Output = StreamTotals;
  type Error = PipelineError;

  fn run_task(
    self,
    mut input: I,
    model: M,
    mut output: O,
  ) -> Result<StreamTotals, PipelineError> {
    let geometry = input.geometry();
    info!(
      "开始任务: {}x{}, 预计帧数: {:?}",
      geometry.width, geometry.height, geometry.frame_count
    );

    let order = model.channel_order();
    let started = Instant::now();
    let mut totals = StreamTotals::default();
    loop {
      if self.cancelled() {
        warn!("收到取消请求，已处理 {} 帧，退出任务循环", totals.frames);
        return Err(PipelineError::Cancelled);
      }
      let Some(frame) = input.next() else {
        break;
      };
      let frame = frame?.into_order(order);

      let now = Instant::now();
      let (annotated, counts) = detect_frame(&model, self.draw, frame)?;
      output.write_frame(&annotated.frame)?;
      totals.counts.merge(&counts);
      totals.frames += 1;
      debug!(
        "第 {} 帧完成，耗时: {:.2?}, 本帧: [{}]",
        totals.frames,
        now.elapsed(),
        counts.summary()
      );
    }

    output.finish()?;
    info!(
      "任务完成: {} 帧, 耗时: {:.2?}, 累计: [{}]",
      totals.frames,
      started.elapsed(),
      totals.counts.summary()
    );
    Ok(totals)
  }
}

/// 对任意输入源与输出运行流式检测
pub fn detect_stream<I, M, O>(
  model: &M,
  draw: &Draw,
  input: I,
  output: O,
  cancel: Option<Arc<AtomicBool>>,
) -> Result<StreamTotals, PipelineError>
where
  I: FrameSource,
  M: Detector + ?Sized,
  O: FrameSink,
{
  StreamTask::new(draw)
    .with_cancel(cancel)
    .run_task(input, model, output)
}

/// 检测视频文件并写出标注后的 MP4
///
/// 输出的分辨率与帧率取自输入。任何路径退出时两个流都会被释放，
/// 失败或取消时不保留写了一半的输出文件。
pub fn detect_video_file<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  input_path: &Path,
  output_path: &Path,
  cancel: Option<Arc<AtomicBool>>,
) -> Result<StreamOutcome, PipelineError> {
  let tools = FfmpegTools::default();
  detect_video_file_with(model, draw, input_path, output_path, cancel, &tools)
}

pub fn detect_video_file_with<M: Detector + ?Sized>(
  model: &M,
  draw: &Draw,
  input_path: &Path,
  output_path: &Path,
  cancel: Option<Arc<AtomicBool>>,
  tools: &FfmpegTools,
) -> Result<StreamOutcome, PipelineError> {
  let input = VideoFileInput::open_with(input_path, tools)?;
  let output = VideoFileOutput::create_with(output_path, input.geometry(), tools)?;
  // 两个流在 detect_stream 返回前已经被释放
  match detect_stream(model, draw, input, output, cancel) {
    Ok(totals) => Ok(StreamOutcome {
      output: output_path.to_path_buf(),
      counts: totals.counts,
      frames: totals.frames,
    }),
    Err(e) => {
      match std::fs::remove_file(output_path) {
        Ok(()) => info!("已删除未完成的输出: {}", output_path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("删除未完成的输出 {} 失败: {}", output_path.display(), err),
      }
      Err(e)
    }
  }
}
