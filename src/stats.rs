// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/stats.rs - 算法统计
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

use serde::Serialize;

use crate::{merge::Assignment, solver::AssignmentMethod};

/// 调度器实例级别的计数器，只在调用方显式重置时归零
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlgorithmStats {
  pub total_assignments: u64,
  pub greedy_assignments: u64,
  pub hungarian_assignments: u64,
  pub timeout_fallbacks: u64,
  pub queue_overflows: u64,
  pub solver_failures: u64,
  pub frames_processed: u64,
}

impl AlgorithmStats {
  pub fn record_assignments(&mut self, assignments: &[Assignment]) {
    for assignment in assignments {
      self.total_assignments += 1;
      match assignment.method {
        AssignmentMethod::Greedy => self.greedy_assignments += 1,
        AssignmentMethod::Hungarian => self.hungarian_assignments += 1,
      }
    }
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }
}
