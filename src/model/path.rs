// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/model/path.rs - 模型路径规范化
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

use tracing::debug;
use url::Url;

/// 把配置里写的模型路径转成本机路径，只在加载时做一次
///
/// - `file://` URL 转为文件路径（含百分号解码）
/// - 开头的 `~` 展开为 `$HOME`
/// - 非 Windows 平台上把 `\` 分隔符改写为 `/`
pub fn normalize_model_path(raw: &str) -> PathBuf {
  let raw = raw.trim();

  if raw.starts_with("file://") {
    if let Some(path) = Url::parse(raw).ok().and_then(|url| url.to_file_path().ok()) {
      debug!("模型路径 {} 规范化为 {}", raw, path.display());
      return path;
    }
    let rest = &raw["file://".len()..];
    let decoded = urlencoding::decode(rest)
      .map(|s| s.into_owned())
      .unwrap_or_else(|_| rest.to_string());
    return PathBuf::from(native_separators(&decoded));
  }

  let path = PathBuf::from(native_separators(&expand_home(raw)));
  debug!("模型路径 {} 规范化为 {}", raw, path.display());
  path
}

fn expand_home(raw: &str) -> String {
  let home = std::env::var("HOME").ok().filter(|h| !h.is_empty());
  match (raw, home) {
    ("~", Some(home)) => home,
    (r, Some(home)) if r.starts_with("~/") || r.starts_with("~\\") => {
      format!("{}/{}", home.trim_end_matches('/'), &r[2..])
    }
    (r, _) => r.to_string(),
  }
}

#[cfg(not(windows))]
fn native_separators(raw: &str) -> String {
  raw.replace('\\', "/")
}

#[cfg(windows)]
fn native_separators(raw: &str) -> String {
  raw.replace('/', "\\")
}
