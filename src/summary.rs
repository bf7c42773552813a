// 该文件是 Kanshan （看山） 项目的一部分。
// src/summary.rs - 检测类别统计
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

use crate::detection::{ClassNameMap, DetectionSet};

/// 按类别名称统计的 (名称, 数量) 列表，顺序为名称首次出现的顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
  pub entries: Vec<(String, usize)>,
}

impl Summary {
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 渲染为 "名称: 数量" 行
  pub fn lines(&self) -> Vec<String> {
    self
      .entries
      .iter()
      .map(|(name, count)| format!("{}: {}", name, count))
      .collect()
  }
}

/// 统计检测集合中每个类别名称出现的次数。
///
/// 未知类别与标注时一致，使用数字编号作为名称。
pub fn summarize(detections: &DetectionSet, names: &ClassNameMap) -> Summary {
  let mut entries: Vec<(String, usize)> = Vec::new();

  for detection in detections.items.iter() {
    let label = names.resolve(detection.class_id);
    match entries.iter_mut().find(|(name, _)| *name == label) {
      Some((_, count)) => *count += 1,
      None => entries.push((label, 1)),
    }
  }

  Summary { entries }
}
