// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/task.rs - 回放任务：按顺序把帧送入调度器并串接 BOM 快照
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

use tracing::{info, warn};

use crate::{
  bom::BomState, frame::Frame, output::Record, scheduler::FrameScheduler, score::Scorer,
  solver::Solver,
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task<S: Solver, R: Scorer>(
    self,
    input: I,
    scheduler: &mut FrameScheduler<S, R>,
    bom: BomState,
    output: O,
  ) -> Result<BomState, Self::Error>;
}

pub struct OneShotTask;

impl<
  IE: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Frame, IE>>,
  O: Record<Error = RE>,
> Task<I, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task<S: Solver, R: Scorer>(
    self,
    mut input: I,
    scheduler: &mut FrameScheduler<S, R>,
    bom: BomState,
    output: O,
  ) -> Result<BomState, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))??;
    info!("输入帧获取成功，开始分配...");
    let now = std::time::Instant::now();
    let result = scheduler.process_frame(&frame, &bom)?;
    info!("分配完成，耗时: {:.2?}", now.elapsed());
    output.record(0, &result)?;
    output.finish()?;

    Ok(result.bom_state)
  }
}

#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  interruptible: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 安装 Ctrl-C 处理器；每个进程只能安装一次
  pub fn interruptible(mut self) -> Self {
    self.interruptible = true;
    self
  }
}

impl<
  IE: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = Result<Frame, IE>>,
  O: Record<Error = RE>,
> Task<I, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task<S: Solver, R: Scorer>(
    self,
    input: I,
    scheduler: &mut FrameScheduler<S, R>,
    mut bom: BomState,
    output: O,
  ) -> Result<BomState, Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    if self.interruptible {
      ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        let _ = tx.send(());
      })?;
    }

    let mut frame_index = 0;
    for frame in input {
      let frame = frame?;
      let now = std::time::Instant::now();
      let result = scheduler.process_frame(&frame, &bom)?;
      output.record(frame_index, &result)?;
      info!("第 {} 帧完成，耗时: {:.2?}", frame_index, now.elapsed());
      bom = result.bom_state;
      frame_index += 1;

      if bom.is_complete() {
        info!("BOM 已全部匹配，退出任务循环");
        break;
      }
      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    output.finish()?;
    let stats = scheduler.stats();
    info!(
      "任务完成: {} 帧, {} 个分配 (匈牙利 {}, 贪心 {}), 超时回退 {}, 队列降级 {}",
      stats.frames_processed,
      stats.total_assignments,
      stats.hungarian_assignments,
      stats.greedy_assignments,
      stats.timeout_fallbacks,
      stats.queue_overflows
    );
    Ok(bom)
  }
}
