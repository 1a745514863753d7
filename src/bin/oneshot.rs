// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/bin/oneshot.rs - 处理单帧并输出分配结果
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
  task::{OneShotTask, Task},
};

/// Brickmatch 单帧参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 帧输入，只读取第一帧
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 初始 BOM
  #[arg(long, value_name = "BOM")]
  pub bom: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 调度器配置
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let options = args
    .config
    .as_ref()
    .map(SchedulerOptions::from_url)
    .transpose()?
    .unwrap_or_default();
  let input = JsonLinesInput::from_url(&args.input)?;
  let bom = BomFile::load(&args.bom)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let bom = OneShotTask.run_task(input, &mut FrameScheduler::new(options), bom, output)?;
  let pending = bom
    .parts
    .iter()
    .filter(|part| bom.remaining(&part.key()).unwrap_or(0) > 0)
    .count();
  info!("剩余未完成零件: {} 种", pending);
  Ok(())
}
