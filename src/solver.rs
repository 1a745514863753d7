// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/solver.rs - 二分图分配求解器
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

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::matrix::CostMatrix;

/// 接受一对所需的最低相似度
pub const CONFIRMATION_THRESHOLD: f32 = 0.80;

/// 由代价反推相似度时的浮点容差
pub const SIMILARITY_EPSILON: f32 = 1e-6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
  #[error("求解超时，已耗时 {elapsed:?}")]
  Timeout { elapsed: Duration },
  #[error("求解器内部错误: {0}")]
  Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
  Greedy,
  Hungarian,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matched {
  pub detection_index: usize,
  pub candidate_index: usize,
  pub similarity: f32,
}

/// 在一个批次上求一对一匹配：任何检测或候选至多使用一次，
/// 且接受的对相似度不低于 `min_similarity`。超过 `deadline` 时返回 `Timeout`。
pub trait Solver {
  fn method(&self) -> AssignmentMethod;

  fn solve(
    &self,
    matrix: &CostMatrix,
    min_similarity: f32,
    deadline: Instant,
  ) -> Result<Vec<Matched>, SolverError>;
}

impl<S: Solver + ?Sized> Solver for &S {
  fn method(&self) -> AssignmentMethod {
    (**self).method()
  }

  fn solve(
    &self,
    matrix: &CostMatrix,
    min_similarity: f32,
    deadline: Instant,
  ) -> Result<Vec<Matched>, SolverError> {
    (**self).solve(matrix, min_similarity, deadline)
  }
}

/// 相似度是否达到阈值，允许代价与相似度互换带来的舍入误差。
///
/// 求解器、贪心匹配与调度器的复核共用这一个判定。
pub fn confirms(similarity: f32, min_similarity: f32) -> bool {
  similarity >= min_similarity - SIMILARITY_EPSILON
}

mod greedy;
mod hungarian;

pub use self::greedy::{GreedySolver, greedy_assign};
pub use self::hungarian::HungarianSolver;
