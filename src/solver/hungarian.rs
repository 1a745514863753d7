// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/solver/hungarian.rs - 匈牙利算法（带截止时间）
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

use std::time::Instant;

use tracing::debug;

use crate::{
  matrix::CostMatrix,
  solver::{AssignmentMethod, Matched, Solver, SolverError, confirms},
};

/// 按检测下标递增、只加在可接受单元上的偏置
const DETECTION_TIE_BIAS: f64 = 1e-9;

/// 基于势函数的最短增广路实现，O(n²m)，n = min(行, 列)。
///
/// 先最大化可接受对的数量，再在此前提下最小化总代价。每完成一行的增广
/// 检查一次截止时间。
///
/// 平局规则：
/// - 多个检测争夺同一候选、且不能全部匹配时，下标小的检测胜出。偏置只加在
///   可接受单元上，落到禁用单元的检测不承担偏置，因此无论是否转置都成立。
/// - 总代价相同的完美匹配之间不由偏置决定（偏置之和相同），结果取决于
///   按候选下标升序的扫描顺序，确定但不保证字典序最小。
#[derive(Debug, Default, Clone, Copy)]
pub struct HungarianSolver;

impl Solver for HungarianSolver {
  fn method(&self) -> AssignmentMethod {
    AssignmentMethod::Hungarian
  }

  fn solve(
    &self,
    matrix: &CostMatrix,
    min_similarity: f32,
    deadline: Instant,
  ) -> Result<Vec<Matched>, SolverError> {
    if matrix.is_empty() {
      return Ok(Vec::new());
    }

    let started = Instant::now();
    let transposed = matrix.rows() > matrix.cols();
    let (n, m) = if transposed {
      (matrix.cols(), matrix.rows())
    } else {
      (matrix.rows(), matrix.cols())
    };

    // 1-based 下标：i ∈ 1..=n 是短边，j ∈ 1..=m 是长边
    let cell = |i: usize, j: usize| -> Option<f32> {
      let (row, col) = if transposed { (j - 1, i - 1) } else { (i - 1, j - 1) };
      matrix
        .cost(row, col)
        .filter(|&c| confirms(1.0 - c, min_similarity))
    };
    // 禁用代价只需超过任一可行匹配的代价与偏置之和，保持较小以免吞掉偏置的精度
    let forbidden = n as f64 * (1.0 + m.max(n) as f64 * DETECTION_TIE_BIAS) + 1.0;
    let cost = |i: usize, j: usize| -> f64 {
      let row = if transposed { j - 1 } else { i - 1 };
      match cell(i, j) {
        Some(c) => c as f64 + row as f64 * DETECTION_TIE_BIAS,
        None => forbidden,
      }
    };

    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
      if Instant::now() >= deadline {
        return Err(SolverError::Timeout {
          elapsed: started.elapsed(),
        });
      }

      p[0] = i;
      let mut j0 = 0usize;
      let mut minv = vec![f64::INFINITY; m + 1];
      let mut used = vec![false; m + 1];

      loop {
        used[j0] = true;
        let i0 = p[j0];
        let mut delta = f64::INFINITY;
        let mut j1 = 0usize;

        for j in 1..=m {
          if used[j] {
            continue;
          }
          let reduced = cost(i0, j) - u[i0] - v[j];
          if reduced < minv[j] {
            minv[j] = reduced;
            way[j] = j0;
          }
          if minv[j] < delta {
            delta = minv[j];
            j1 = j;
          }
        }

        if j1 == 0 || !delta.is_finite() {
          return Err(SolverError::Internal(format!(
            "第 {} 行找不到增广路径",
            i
          )));
        }

        for j in 0..=m {
          if used[j] {
            u[p[j]] += delta;
            v[j] -= delta;
          } else {
            minv[j] -= delta;
          }
        }

        j0 = j1;
        if p[j0] == 0 {
          break;
        }
      }

      loop {
        let j1 = way[j0];
        p[j0] = p[j1];
        j0 = j1;
        if j0 == 0 {
          break;
        }
      }
    }

    let mut matched = Vec::with_capacity(n);
    for j in 1..=m {
      let i = p[j];
      if i == 0 {
        continue;
      }
      let Some(c) = cell(i, j) else {
        continue;
      };
      let (row, col) = if transposed { (j - 1, i - 1) } else { (i - 1, j - 1) };
      matched.push(Matched {
        detection_index: matrix.detection(row),
        candidate_index: matrix.candidate(col),
        similarity: 1.0 - c,
      });
    }
    matched.sort_by_key(|hit| hit.detection_index);

    debug!(
      "匈牙利算法: {}x{} -> {} 个分配, 耗时 {:.2?}",
      matrix.rows(),
      matrix.cols(),
      matched.len(),
      started.elapsed()
    );
    Ok(matched)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;
  use std::time::Duration;

  use super::*;
  use crate::prefilter::Pair;

  fn far_deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
  }

  fn solve(pairs: &[Pair]) -> Vec<(usize, usize)> {
    let matrix = CostMatrix::build(pairs);
    HungarianSolver
      .solve(&matrix, 0.8, far_deadline())
      .unwrap()
      .into_iter()
      .map(|m| (m.detection_index, m.candidate_index))
      .collect()
  }

  #[test]
  fn beats_greedy_on_crossed_preferences() {
    // 贪心会先拿 (0,0)=0.95，导致 1 无处可去
    let pairs = vec![
      Pair::new(0, 0, 0.95, 0.0),
      Pair::new(0, 1, 0.90, 0.0),
      Pair::new(1, 0, 0.90, 0.0),
    ];
    assert_eq!(solve(&pairs), vec![(0, 1), (1, 0)]);
  }

  #[test]
  fn minimises_total_cost() {
    let pairs = vec![
      Pair::new(0, 0, 0.85, 0.0),
      Pair::new(0, 1, 0.95, 0.0),
      Pair::new(1, 0, 0.95, 0.0),
      Pair::new(1, 1, 0.85, 0.0),
    ];
    assert_eq!(solve(&pairs), vec![(0, 1), (1, 0)]);
  }

  #[test]
  fn respects_confirmation_threshold() {
    let pairs = vec![Pair::new(0, 0, 0.75, 0.0), Pair::new(1, 1, 0.8, 0.0)];
    assert_eq!(solve(&pairs), vec![(1, 1)]);
  }

  #[test]
  fn tall_matrix_is_transposed() {
    let pairs: Vec<Pair> = (0..5).map(|d| Pair::new(d, 7, 0.85, 0.0)).collect();
    assert_eq!(solve(&pairs), vec![(0, 7)]);
  }

  #[test]
  fn contested_candidate_goes_to_earlier_detection() {
    // 2x2 不转置：两个检测都只能接受 4 号候选
    let square = vec![
      Pair::new(1, 4, 0.85, 0.0),
      Pair::new(0, 4, 0.85, 0.0),
      Pair::new(0, 5, 0.6, 0.0),
    ];
    assert!(CostMatrix::build(&square).rows() <= CostMatrix::build(&square).cols());
    assert_eq!(solve(&square), vec![(0, 4)]);

    // 3x1 转置后同样成立
    let tall = vec![
      Pair::new(2, 4, 0.85, 0.0),
      Pair::new(1, 4, 0.85, 0.0),
      Pair::new(0, 4, 0.85, 0.0),
    ];
    assert_eq!(solve(&tall), vec![(0, 4)]);
  }

  #[test]
  fn uniqueness_on_random_like_batch() {
    let mut pairs = Vec::new();
    for d in 0..20 {
      for k in 0..3 {
        let c = (d * 7 + k * 3) % 15;
        let s = 0.7 + ((d * 13 + k * 5) % 30) as f32 / 100.0;
        pairs.push(Pair::new(d, c, s, 0.0));
      }
    }
    let matched = solve(&pairs);
    let dets: HashSet<usize> = matched.iter().map(|m| m.0).collect();
    let cands: HashSet<usize> = matched.iter().map(|m| m.1).collect();
    assert_eq!(dets.len(), matched.len());
    assert_eq!(cands.len(), matched.len());
  }

  #[test]
  fn expired_deadline_times_out() {
    let pairs = vec![Pair::new(0, 0, 0.9, 0.0)];
    let matrix = CostMatrix::build(&pairs);
    let result = HungarianSolver.solve(&matrix, 0.8, Instant::now());
    assert!(matches!(result, Err(SolverError::Timeout { .. })));
  }
}
