// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use yatra::{PipelineError, media::process_file, model::load_model, output::Draw};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let args = args::Args::parse();

  info!("模型: {}", args.model);
  info!("推理设备: {}", args.device);

  let model = load_model(&args.model, args.device)
    .map_err(PipelineError::from)
    .inspect_err(|e| error!("{}", e.kind().user_message()))
    .with_context(|| format!("无法加载模型 {}", args.model))?;
  let draw = match &args.font {
    Some(path) => Draw::from_font_file(path)
      .with_context(|| format!("无法加载字体 {}", path.display()))?,
    None => Draw::default(),
  };

  let cancel = Arc::new(AtomicBool::new(false));
  let flag = cancel.clone();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，处理完当前帧后退出...");
    flag.store(true, Ordering::SeqCst);
  })
  .context("无法设置 Ctrl-C 处理器")?;

  let report = match process_file(
    &*model,
    &draw,
    &args.input,
    args.mime.as_deref(),
    args.output.as_deref(),
    Some(cancel),
  ) {
    Ok(report) => report,
    Err(e) => {
      let kind = e.kind();
      error!("[{}] {}: {}", kind, kind.user_message(), e);
      return Err(e.into());
    }
  };

  info!(
    "处理完成: {} 帧, 计数: [{}], 输出: {}",
    report.frames,
    report.counts.summary(),
    report.output.display()
  );
  if args.json {
    println!("{}", serde_json::to_string_pretty(&report)?);
  }

  Ok(())
}
