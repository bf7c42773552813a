// 该文件是 Kanshan （看山） 项目的一部分。
// src/server.rs - HTTP 服务与请求编排
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

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
  Router,
  extract::{DefaultBodyLimit, Multipart, Query, State, multipart::MultipartError},
  http::{StatusCode, header},
  response::{Html, IntoResponse, Response},
  routing::{get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::detection::{DetectionSet, NormalizeError};
use crate::detector::{Detector, DetectorError};
use crate::draw::{Annotator, to_jpeg_bytes};
use crate::summary::{Summary, summarize};

/// 上传体积上限
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// 进程级共享状态，启动时创建一次，请求间只读
#[derive(Clone)]
pub struct AppState {
  pub detector: Arc<dyn Detector>,
  pub annotator: Arc<Annotator>,
  /// 请求未携带阈值时使用的置信度阈值
  pub default_confidence: f32,
}

#[derive(Error, Debug)]
pub enum RequestError {
  #[error("未找到上传的图片，请选择名为 image 的文件后再提交。")]
  MissingUpload,
  #[error("无法读取图片，请上传有效的 JPG/PNG 图片。")]
  UndecodableImage,
  #[error("上传内容无效: {0}")]
  Upload(#[from] MultipartError),
  #[error("检测器调用失败: {0}")]
  Detector(#[from] DetectorError),
  #[error("检测器输出不一致: {0}")]
  Normalize(#[from] NormalizeError),
  #[error("标注图像编码失败: {0}")]
  Encode(#[from] image::ImageError),
  #[error("处理任务中断: {0}")]
  Task(#[from] tokio::task::JoinError),
}

impl RequestError {
  /// 拒绝请求的状态码；检测器与编排内部故障归为服务器错误
  pub fn status(&self) -> StatusCode {
    match self {
      RequestError::MissingUpload | RequestError::UndecodableImage | RequestError::Upload(_) => {
        StatusCode::BAD_REQUEST
      }
      RequestError::Detector(_)
      | RequestError::Normalize(_)
      | RequestError::Encode(_)
      | RequestError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  /// 展示给调用方的文本；内部故障不外泄细节
  pub fn user_message(&self) -> String {
    match self.status() {
      StatusCode::BAD_REQUEST => self.to_string(),
      _ => "服务器处理失败，请稍后重试。".to_string(),
    }
  }
}

/// 响应形态，由请求级开关一次性决定
#[derive(Debug, Clone, Copy, PartialEq)]
enum OutputMode {
  /// 机器可读: 标注后的 JPEG 字节
  Raw,
  /// 人类可读: 内嵌图像与统计的页面
  View,
}

#[derive(Debug, Deserialize, Default)]
struct DetectQuery {
  /// `?return=image` 选择原始 JPEG 输出
  #[serde(rename = "return")]
  return_format: Option<String>,
}

impl DetectQuery {
  fn mode(&self) -> OutputMode {
    match self.return_format.as_deref() {
      Some("image") => OutputMode::Raw,
      _ => OutputMode::View,
    }
  }
}

/// 组装路由
pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(index_handler))
    .route("/health", get(health_handler))
    .route("/detect", post(detect_handler))
    .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 启动 HTTP 服务
pub async fn serve(listen: SocketAddr, state: AppState) -> anyhow::Result<()> {
  let app = router(state);
  let listener = tokio::net::TcpListener::bind(listen).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);
  axum::serve(listener, app).await?;
  Ok(())
}

async fn index_handler() -> Html<&'static str> {
  Html(INDEX_PAGE)
}

async fn health_handler() -> impl IntoResponse {
  axum::Json(json!({ "status": "ok" }))
}

async fn detect_handler(
  State(state): State<AppState>,
  Query(query): Query<DetectQuery>,
  multipart: Multipart,
) -> Response {
  let mode = query.mode();

  match handle_detect(&state, multipart).await {
    Ok((jpeg, summary)) => match mode {
      OutputMode::Raw => ([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response(),
      OutputMode::View => {
        Html(result_page(Some(&jpeg), &summary, None)).into_response()
      }
    },
    Err(e) => {
      // 拒绝与故障都退化为同一响应形态，调用方永远收到完整页面
      let status = e.status();
      if status == StatusCode::BAD_REQUEST {
        warn!("请求被拒绝: {}", e);
      } else {
        error!("请求处理失败: {}", e);
      }
      (
        status,
        Html(result_page(None, &Summary::default(), Some(&e.user_message()))),
      )
        .into_response()
    }
  }
}

/// 单个检测请求的编排: 上传 → 解码 → 检测 → 归一化 → 标注与统计
async fn handle_detect(
  state: &AppState,
  multipart: Multipart,
) -> Result<(Vec<u8>, Summary), RequestError> {
  let (bytes, confidence) = read_upload(multipart).await?;
  let confidence = confidence.unwrap_or(state.default_confidence);

  let state = state.clone();
  tokio::task::spawn_blocking(move || run_pipeline(&state, &bytes, confidence)).await?
}

/// 读取 multipart 表单: `image` 文件字段与可选的 `conf` 阈值字段。
///
/// 文件字段缺失或文件名为空按缺少上传处理；
/// 阈值无法解析时返回 None，由调用方回退到默认值。
async fn read_upload(mut multipart: Multipart) -> Result<(Vec<u8>, Option<f32>), RequestError> {
  let mut image_bytes = None;
  let mut confidence = None;

  while let Some(field) = multipart.next_field().await? {
    match field.name() {
      Some("image") => {
        let has_filename = field.file_name().map(|name| !name.is_empty()).unwrap_or(false);
        if has_filename {
          image_bytes = Some(field.bytes().await?.to_vec());
        }
      }
      Some("conf") => {
        confidence = field.text().await?.trim().parse::<f32>().ok();
      }
      _ => {}
    }
  }

  let bytes = image_bytes.ok_or(RequestError::MissingUpload)?;
  Ok((bytes, confidence))
}

/// 核心处理管线，每个请求独立执行，无共享可变状态。
///
/// 阈值按原样传给检测器，范围裁剪是检测器一侧的职责。
fn run_pipeline(
  state: &AppState,
  bytes: &[u8],
  confidence: f32,
) -> Result<(Vec<u8>, Summary), RequestError> {
  let image = image::load_from_memory(bytes)
    .map_err(|_| RequestError::UndecodableImage)?
    .to_rgb8();

  let raw = state.detector.detect(&image, confidence)?;
  let (detections, names) = DetectionSet::from_raw(raw)?;

  let annotated = state.annotator.annotate(&image, &detections, &names);
  let summary = summarize(&detections, &names);
  let jpeg = to_jpeg_bytes(&annotated)?;

  info!(
    "检测完成: 图像 {}x{}, 阈值 {}, 目标 {} 个",
    image.width(),
    image.height(),
    confidence,
    detections.len()
  );

  Ok((jpeg, summary))
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html lang="zh">
<head>
  <meta charset="utf-8">
  <title>看山目标检测</title>
</head>
<body>
  <h1>看山目标检测</h1>
  <form action="/detect" method="post" enctype="multipart/form-data">
    <p><input type="file" name="image" accept="image/*"></p>
    <p>置信度阈值: <input type="number" name="conf" min="0" max="1" step="0.05" value="0.25"></p>
    <p><button type="submit">上传并检测</button></p>
  </form>
</body>
</html>
"#;

/// 渲染结果页面；拒绝时不含图像与统计，只含错误说明
fn result_page(jpeg: Option<&[u8]>, summary: &Summary, error: Option<&str>) -> String {
  let mut body = String::new();

  match error {
    Some(message) => {
      body.push_str(&format!("  <p class=\"error\">{}</p>\n", message));
    }
    None => {
      if let Some(jpeg) = jpeg {
        body.push_str(&format!(
          "  <p><img src=\"data:image/jpeg;base64,{}\" alt=\"检测结果\"></p>\n",
          BASE64.encode(jpeg)
        ));
      }
      if summary.is_empty() {
        body.push_str("  <p>未检测到目标。</p>\n");
      } else {
        body.push_str("  <ul>\n");
        for line in summary.lines() {
          body.push_str(&format!("    <li>{}</li>\n", line));
        }
        body.push_str("  </ul>\n");
      }
    }
  }

  format!(
    r#"<!DOCTYPE html>
<html lang="zh">
<head>
  <meta charset="utf-8">
  <title>看山检测结果</title>
</head>
<body>
  <h1>检测结果</h1>
{}  <p><a href="/">返回</a></p>
</body>
</html>
"#,
    body
  )
}
