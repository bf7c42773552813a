// 该文件是 Kanshan （看山） 项目的一部分。
// src/detection.rs - 检测结果归一化
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

use std::collections::HashMap;

use thiserror::Error;

use crate::detector::RawDetections;

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  /// 边界框 [x_min, y_min, x_max, y_max]，像素坐标
  pub bbox: [f32; 4],
  /// 类别索引
  pub class_id: u32,
  /// 置信度
  pub confidence: f32,
}

/// 一张图像的全部检测结果，保持检测器的输出顺序
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
  pub items: Box<[Detection]>,
}

/// 类别索引到显示名称的映射，由检测器每次调用提供
#[derive(Debug, Clone, Default)]
pub struct ClassNameMap {
  names: HashMap<u32, String>,
}

#[derive(Error, Debug)]
pub enum NormalizeError {
  #[error("检测器输出长度不一致: 边界框 {boxes} 个, 类别 {classes} 个, 置信度 {confidences} 个")]
  LengthMismatch {
    boxes: usize,
    classes: usize,
    confidences: usize,
  },
}

impl ClassNameMap {
  pub fn new(names: HashMap<u32, String>) -> Self {
    Self { names }
  }

  /// 解析类别名称；未知类别回退为数字编号的字符串
  pub fn resolve(&self, class_id: u32) -> String {
    self
      .names
      .get(&class_id)
      .cloned()
      .unwrap_or_else(|| class_id.to_string())
  }
}

impl DetectionSet {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 将检测器的原始输出归一化为固定形状的检测集合。
  ///
  /// 检测器在无检测路径上可能省略任意数组，这里统一解析为空集合；
  /// 空集合是合法结果而不是错误，下游不需要再对空值做分支。
  /// 数组长度不一致说明检测器违反了输出契约，直接报错而不是截断。
  pub fn from_raw(raw: RawDetections) -> Result<(Self, ClassNameMap), NormalizeError> {
    let names = ClassNameMap::new(raw.class_names);

    let boxes = raw.boxes.unwrap_or_default();
    let class_ids = raw.class_ids.unwrap_or_default();
    let confidences = raw.confidences.unwrap_or_default();

    if boxes.len() != class_ids.len() || boxes.len() != confidences.len() {
      return Err(NormalizeError::LengthMismatch {
        boxes: boxes.len(),
        classes: class_ids.len(),
        confidences: confidences.len(),
      });
    }

    let items = boxes
      .into_iter()
      .zip(class_ids)
      .zip(confidences)
      .map(|(([x1, y1, x2, y2], class_id), confidence)| Detection {
        // 保证 x_min <= x_max, y_min <= y_max
        bbox: [x1.min(x2), y1.min(y2), x1.max(x2), y1.max(y2)],
        class_id,
        confidence,
      })
      .collect();

    Ok((Self { items }, names))
  }
}
