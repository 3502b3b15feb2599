// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/model/labels.rs - 类别表
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

use serde_json::Value;

/// 模型训练时的有序类别名表
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelVocabulary {
  names: Vec<String>,
}

impl LabelVocabulary {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  pub fn contains(&self, label: &str) -> bool {
    self.names.iter().any(|name| name == label)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

/// 解析导出模型元数据里的 `names` 字段
///
/// 支持 JSON 数组、以数字为键的 JSON 对象，以及 Python 字典字面量
/// `{0: 'car', 1: 'truck'}`。下标必须从 0 开始连续。
pub fn parse_names_metadata(raw: &str) -> Option<LabelVocabulary> {
  let raw = raw.trim();
  if let Ok(value) = serde_json::from_str::<Value>(raw) {
    return match value {
      Value::Array(items) => items
        .into_iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .map(LabelVocabulary::new),
      Value::Object(map) => indexed(
        map
          .into_iter()
          .map(|(k, v)| Some((k.trim().parse::<usize>().ok()?, v.as_str()?.to_string())))
          .collect::<Option<Vec<_>>>()?,
      ),
      _ => None,
    };
  }

  let body = raw.strip_prefix('{')?.strip_suffix('}')?;
  let mut pairs = Vec::new();
  for entry in split_outside_quotes(body, ',') {
    let entry = entry.trim();
    if entry.is_empty() {
      continue;
    }
    let (key, value) = entry.split_once(':')?;
    let index = key.trim().parse::<usize>().ok()?;
    pairs.push((index, unquote(value.trim())?.to_string()));
  }
  indexed(pairs)
}

/// 读取类别文件，每行一个类别名，忽略空行与 `#` 注释
pub fn read_labels_file(path: &Path) -> std::io::Result<LabelVocabulary> {
  let content = std::fs::read_to_string(path)?;
  Ok(LabelVocabulary::new(
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#')),
  ))
}

fn indexed(mut pairs: Vec<(usize, String)>) -> Option<LabelVocabulary> {
  pairs.sort_by_key(|(index, _)| *index);
  if pairs.iter().enumerate().any(|(i, (index, _))| i != *index) {
    return None;
  }
  Some(LabelVocabulary::new(pairs.into_iter().map(|(_, name)| name)))
}

fn unquote(value: &str) -> Option<&str> {
  ['\'', '"']
    .iter()
    .find_map(|q| value.strip_prefix(*q)?.strip_suffix(*q))
}

fn split_outside_quotes(body: &str, sep: char) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut quote = None;
  let mut start = 0;
  for (i, c) in body.char_indices() {
    match (quote, c) {
      (None, '\'' | '"') => quote = Some(c),
      (Some(q), _) if q == c => quote = None,
      (None, _) if c == sep => {
        parts.push(&body[start..i]);
        start = i + c.len_utf8();
      }
      _ => {}
    }
  }
  parts.push(&body[start..]);
  parts
}
