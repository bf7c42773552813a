// 该文件是 Kanshan （看山） 项目的一部分。
// src/detector/command.rs - 外部命令检测器
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

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use image::{ImageFormat, RgbImage};
use tracing::debug;
use url::Url;

use super::{Detector, DetectorError, RawDetections};
use crate::{FromUrl, FromUrlWithScheme};

/// 调用外部推理进程的检测器。
///
/// 每次检测启动一次 `command:` URL 指定的程序，附加 `arg` 查询参数
/// 作为固定参数，再以 `--conf <阈值>` 传入置信度阈值；
/// 图像以 PNG 编码写入其标准输入，从标准输出读取 JSON 契约：
/// `{"boxes": [[x1,y1,x2,y2]], "class_ids": [..], "confidences": [..], "class_names": {..}}`。
///
/// 权重加载与张量推理完全由该进程负责，本进程只消费输出。
pub struct CommandDetector {
  program: String,
  args: Vec<String>,
}

impl FromUrlWithScheme for CommandDetector {
  const SCHEME: &'static str = "command";
}

impl FromUrl for CommandDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::Address(format!(
        "期望检测器方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    if url.path().is_empty() {
      return Err(DetectorError::Address("检测器命令路径为空".to_string()));
    }

    let args = url
      .query_pairs()
      .filter(|(key, _)| key == "arg")
      .map(|(_, value)| value.into_owned())
      .collect();

    Ok(Self {
      program: url.path().to_string(),
      args,
    })
  }
}

impl Detector for CommandDetector {
  fn detect(&self, image: &RgbImage, confidence: f32) -> Result<RawDetections, DetectorError> {
    let mut png = Cursor::new(Vec::new());
    image.write_to(&mut png, ImageFormat::Png)?;

    debug!(
      "调用检测器命令: {} (置信度阈值 {}, 图像 {}x{})",
      self.program,
      confidence,
      image.width(),
      image.height()
    );

    let mut child = Command::new(&self.program)
      .args(&self.args)
      .arg("--conf")
      .arg(confidence.to_string())
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(DetectorError::Spawn)?;

    if let Some(mut stdin) = child.stdin.take() {
      stdin.write_all(png.get_ref())?;
    }

    let output = child.wait_with_output()?;

    if !output.status.success() {
      return Err(DetectorError::Exit(format!(
        "{}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }

    Ok(serde_json::from_slice(&output.stdout)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_parses_program_and_args() {
    let url = Url::parse("command:/usr/local/bin/yolo-sidecar?arg=--model&arg=yolov8n.onnx")
      .unwrap();
    let detector = CommandDetector::from_url(&url).unwrap();
    assert_eq!(detector.program, "/usr/local/bin/yolo-sidecar");
    assert_eq!(detector.args, vec!["--model", "yolov8n.onnx"]);
  }

  #[test]
  fn scheme_mismatch_is_rejected() {
    let url = Url::parse("file:/usr/local/bin/yolo-sidecar").unwrap();
    assert!(CommandDetector::from_url(&url).is_err());
  }

  #[test]
  fn detect_parses_sidecar_json() {
    // 用 cat 之外最稳妥的方式模拟边车: 忽略输入，输出固定契约
    let url = Url::parse(
      "command:/bin/sh?arg=-c&arg=cat%20>/dev/null;%20echo%20'{\"boxes\":[[1,2,3,4]],\"class_ids\":[0],\"confidences\":[0.5],\"class_names\":{\"0\":\"person\"}}'",
    )
    .unwrap();
    let detector = CommandDetector::from_url(&url).unwrap();

    let image = RgbImage::new(8, 8);
    let raw = detector.detect(&image, 0.25).unwrap();
    assert_eq!(raw.boxes.unwrap(), vec![[1.0, 2.0, 3.0, 4.0]]);
    assert_eq!(raw.class_names.get(&0).map(String::as_str), Some("person"));
  }

  #[test]
  fn failing_sidecar_reports_exit() {
    let url = Url::parse("command:/bin/sh?arg=-c&arg=cat%20>/dev/null;%20exit%203").unwrap();
    let detector = CommandDetector::from_url(&url).unwrap();

    let image = RgbImage::new(8, 8);
    match detector.detect(&image, 0.25) {
      Err(DetectorError::Exit(_)) => {}
      other => panic!("期望 Exit 错误, 实际: {:?}", other.map(|_| ())),
    }
  }
}
