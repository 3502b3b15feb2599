// 该文件是 Yatra （行程车辆识别） 项目的一部分。
// src/tally.rs - 按类别计数
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

use serde::ser::{Serialize, SerializeMap, Serializer};

/// 类别 -> 数量 的映射
///
/// 迭代顺序为类别第一次出现的顺序，摘要文字与 JSON 输出都按这个顺序排列。
/// 视频流上的累计值是“帧曝光计数”：同一辆车出现在几帧里就被计几次，
/// 不做跨帧身份跟踪。
#[derive(Debug, Clone, Default)]
pub struct CountTally {
  entries: Vec<(String, u64)>,
}

impl CountTally {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn increment(&mut self, label: &str) {
    self.add(label, 1);
  }

  pub fn add(&mut self, label: &str, count: u64) {
    match self.entries.iter_mut().find(|(name, _)| name == label) {
      Some((_, value)) => *value += count,
      None => self.entries.push((label.to_string(), count)),
    }
  }

  /// 把另一份计数逐类别累加进来，缺失的类别视为 0
  pub fn merge(&mut self, other: &CountTally) {
    for (label, count) in other.iter() {
      self.add(label, count);
    }
  }

  pub fn get(&self, label: &str) -> u64 {
    self
      .entries
      .iter()
      .find(|(name, _)| name == label)
      .map(|(_, count)| *count)
      .unwrap_or(0)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn total(&self) -> u64 {
    self.entries.iter().map(|(_, count)| count).sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
    self
      .entries
      .iter()
      .map(|(label, count)| (label.as_str(), *count))
  }

  /// 形如 `car: 2, truck: 1` 的摘要文字，空计数返回空字符串
  pub fn summary(&self) -> String {
    self
      .iter()
      .map(|(label, count)| format!("{}: {}", label, count))
      .collect::<Vec<_>>()
      .join(", ")
  }
}

impl PartialEq for CountTally {
  fn eq(&self, other: &Self) -> bool {
    self.len() == other.len() && self.iter().all(|(label, count)| other.get(label) == count)
  }
}

impl Eq for CountTally {}

impl<'a> FromIterator<&'a str> for CountTally {
  fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
    let mut tally = CountTally::new();
    for label in iter {
      tally.increment(label);
    }
    tally
  }
}

impl Serialize for CountTally {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (label, count) in &self.entries {
      map.serialize_entry(label, count)?;
    }
    map.end()
  }
}
