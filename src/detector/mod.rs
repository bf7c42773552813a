// 该文件是 Kanshan （看山） 项目的一部分。
// src/detector/mod.rs - 检测器边界
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

mod command;

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub use command::CommandDetector;

/// 检测器对单张图像的原始输出。
///
/// 无检测路径上任意数组都可能缺失或为 null，这里全部按可选处理，
/// 归一化交给 `detection::DetectionSet::from_raw`。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDetections {
  /// 边界框 [x_min, y_min, x_max, y_max]，像素坐标
  #[serde(default)]
  pub boxes: Option<Vec<[f32; 4]>>,
  /// 类别索引
  #[serde(default)]
  pub class_ids: Option<Vec<u32>>,
  /// 置信度
  #[serde(default)]
  pub confidences: Option<Vec<f32>>,
  /// 类别索引到名称的映射
  #[serde(default)]
  pub class_names: HashMap<u32, String>,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("无法启动检测器进程: {0}")]
  Spawn(std::io::Error),
  #[error("检测器 I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
  #[error("检测器退出异常: {0}")]
  Exit(String),
  #[error("检测器输出无法解析: {0}")]
  Contract(#[from] serde_json::Error),
  #[error("检测器地址错误: {0}")]
  Address(String),
}

/// 目标检测器。
///
/// 模型加载与推理由外部协作者完成，这里只消费其输出契约。
/// 进程启动时创建一次，之后在各请求间只读共享。
pub trait Detector: Send + Sync {
  /// 对单张图像运行检测，`confidence` 为检测器保留结果的最低置信度。
  fn detect(&self, image: &RgbImage, confidence: f32) -> Result<RawDetections, DetectorError>;
}

/// 根据 URL 方案创建检测器
pub fn create_detector(url: &Url) -> Result<Arc<dyn Detector>, DetectorError> {
  match url.scheme() {
    CommandDetector::SCHEME => Ok(Arc::new(CommandDetector::from_url(url)?)),
    scheme => Err(DetectorError::Address(format!(
      "不支持的检测器方案: {}",
      scheme
    ))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_detections_parse_with_missing_arrays() {
    let raw: RawDetections = serde_json::from_str(r#"{"class_names": {"0": "person"}}"#).unwrap();
    assert!(raw.boxes.is_none());
    assert!(raw.class_ids.is_none());
    assert!(raw.confidences.is_none());
    assert_eq!(raw.class_names.get(&0).map(String::as_str), Some("person"));
  }

  #[test]
  fn raw_detections_parse_with_null_arrays() {
    let raw: RawDetections =
      serde_json::from_str(r#"{"boxes": null, "class_ids": null, "confidences": null}"#).unwrap();
    assert!(raw.boxes.is_none());
    assert!(raw.class_names.is_empty());
  }

  #[test]
  fn raw_detections_parse_populated_contract() {
    let raw: RawDetections = serde_json::from_str(
      r#"{
        "boxes": [[50.0, 50.0, 200.0, 150.0]],
        "class_ids": [0],
        "confidences": [0.91],
        "class_names": {"0": "person"}
      }"#,
    )
    .unwrap();
    assert_eq!(raw.boxes.unwrap(), vec![[50.0, 50.0, 200.0, 150.0]]);
    assert_eq!(raw.class_ids.unwrap(), vec![0]);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtsp://localhost/stream").unwrap();
    assert!(create_detector(&url).is_err());
  }
}
