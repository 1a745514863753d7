// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/bin/continuous.rs - 连续回放多帧并串接 BOM 状态
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use brickmatch::{
  FromUrl, FrameScheduler, SchedulerOptions,
  input::{BomFile, JsonLinesInput},
  output::OutputWrapper,
  task::{ContinuousTask, Task},
};

/// Brickmatch 连续回放参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 帧输入，例如 jsonl:///data/frames.jsonl
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 初始 BOM，例如 bom:///data/bom.json
  #[arg(long, value_name = "BOM")]
  pub bom: Url,
  /// 输出，jsonl:///path 或 log:
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 调度器配置，例如 brickmatch://?timeout_ms=500
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<Url>,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("BOM 文件: {}", args.bom);
  info!("输出路径: {}", args.output);

  let options = match &args.config {
    Some(url) => SchedulerOptions::from_url(url)?,
    None => SchedulerOptions::default(),
  };
  let input = JsonLinesInput::from_url(&args.input)?;
  let bom = BomFile::load(&args.bom)?;
  let output = OutputWrapper::from_url(&args.output)?;
  let mut scheduler = FrameScheduler::new(options);

  let bom = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .interruptible()
    .run_task(input, &mut scheduler, bom, output)?;

  info!("BOM 是否完成: {}", bom.is_complete());
  Ok(())
}
