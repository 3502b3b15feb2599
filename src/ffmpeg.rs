// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/ffmpeg.rs - ffmpeg 命令行工具
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
  collections::VecDeque,
  io::{BufRead, BufReader},
  path::{Path, PathBuf},
  process::ChildStderr,
  thread::{self, JoinHandle},
};

use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 32;

/// `ffprobe` 与 `ffmpeg` 可执行文件的位置，默认从 `PATH` 中查找
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
  pub ffprobe: PathBuf,
  pub ffmpeg: PathBuf,
}

impl Default for FfmpegTools {
  fn default() -> Self {
    Self {
      ffprobe: PathBuf::from("ffprobe"),
      ffmpeg: PathBuf::from("ffmpeg"),
    }
  }
}

impl FfmpegTools {
  /// 使用同一目录下的两个工具
  pub fn in_dir(dir: &Path) -> Self {
    Self {
      ffprobe: dir.join("ffprobe"),
      ffmpeg: dir.join("ffmpeg"),
    }
  }
}

/// 后台持续读取子进程的标准错误，只保留最后若干行
///
/// 管道必须一直有人读，否则 ffmpeg 写满管道后会阻塞，连带标准输出也停下来。
pub struct StderrTail {
  handle: Option<JoinHandle<String>>,
}

impl StderrTail {
  pub fn spawn(tool: &'static str, stderr: Option<ChildStderr>) -> Self {
    let handle = stderr.map(|pipe| {
      thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut line = Vec::new();
        loop {
          line.clear();
          match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
              let text = String::from_utf8_lossy(&line).trim_end().to_string();
              if text.is_empty() {
                continue;
              }
              debug!("{}: {}", tool, text);
              if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
              }
              tail.push_back(text);
            }
            Err(e) => {
              warn!("读取 {} 标准错误失败: {}", tool, e);
              break;
            }
          }
        }
        Vec::from(tail).join("\n")
      })
    });
    Self { handle }
  }

  /// 等待管道关闭并取回保留的内容，只应在子进程退出后调用
  pub fn collect(&mut self) -> String {
    self
      .handle
      .take()
      .and_then(|handle| handle.join().ok())
      .unwrap_or_default()
  }
}
