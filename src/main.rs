// 该文件是 Kanshan （看山） 项目的一部分。
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

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use kanshan::args::Args;
use kanshan::detector::create_detector;
use kanshan::draw::Annotator;
use kanshan::server::{AppState, serve};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("监听地址: {}", args.listen);
  info!("检测器地址: {}", args.detector);
  info!("默认置信度阈值: {}", args.confidence);

  // 检测器与标注工具只在启动时创建一次，请求间只读共享
  let detector = create_detector(&args.detector)?;
  let annotator = Arc::new(Annotator::new(args.font.as_deref()));

  let state = AppState {
    detector,
    annotator,
    default_confidence: args.confidence,
  };

  serve(args.listen, state).await
}
