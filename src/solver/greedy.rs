// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/solver/greedy.rs - 贪心匹配
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

use std::collections::HashSet;
use std::time::Instant;

use tracing::debug;

use crate::{
  matrix::CostMatrix,
  prefilter::Pair,
  solver::{AssignmentMethod, Matched, Solver, SolverError, confirms},
};

/// 按相似度降序扫描，接受第一个双方都未被占用且达到阈值的组合。
///
/// 平局时检测下标小者优先，其次候选下标小者优先。`used_detections` 与
/// `used_candidates` 跨调用累积，用于在多个批次之间保持唯一性。
pub fn greedy_assign(
  pairs: &[Pair],
  min_similarity: f32,
  used_detections: &mut HashSet<usize>,
  used_candidates: &mut HashSet<usize>,
) -> Vec<Pair> {
  let mut order: Vec<&Pair> = pairs
    .iter()
    .filter(|p| confirms(p.similarity, min_similarity))
    .collect();
  order.sort_by(|a, b| {
    b.similarity
      .total_cmp(&a.similarity)
      .then(a.detection_index.cmp(&b.detection_index))
      .then(a.candidate_index.cmp(&b.candidate_index))
  });

  let mut accepted = Vec::new();
  for pair in order {
    if used_detections.contains(&pair.detection_index)
      || used_candidates.contains(&pair.candidate_index)
    {
      continue;
    }
    used_detections.insert(pair.detection_index);
    used_candidates.insert(pair.candidate_index);
    accepted.push(*pair);
  }
  accepted
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GreedySolver;

impl Solver for GreedySolver {
  fn method(&self) -> AssignmentMethod {
    AssignmentMethod::Greedy
  }

  fn solve(
    &self,
    matrix: &CostMatrix,
    min_similarity: f32,
    _deadline: Instant,
  ) -> Result<Vec<Matched>, SolverError> {
    let pairs: Vec<Pair> = (0..matrix.rows())
      .flat_map(|row| {
        matrix.row_entries(row).into_iter().map(move |entry| {
          let similarity = 1.0 - entry.cost;
          Pair::new(
            matrix.detection(row),
            matrix.candidate(entry.index),
            similarity,
            similarity,
          )
        })
      })
      .collect();

    let accepted = greedy_assign(
      &pairs,
      min_similarity,
      &mut HashSet::new(),
      &mut HashSet::new(),
    );
    debug!("贪心匹配: {} 对 -> {} 个分配", pairs.len(), accepted.len());

    Ok(
      accepted
        .into_iter()
        .map(|p| Matched {
          detection_index: p.detection_index,
          candidate_index: p.candidate_index,
          similarity: p.similarity,
        })
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn picks_highest_first_and_respects_uniqueness() {
    let pairs = vec![
      Pair::new(0, 0, 0.85, 0.0),
      Pair::new(0, 1, 0.95, 0.0),
      Pair::new(1, 1, 0.90, 0.0),
      Pair::new(1, 0, 0.82, 0.0),
    ];
    let accepted = greedy_assign(&pairs, 0.8, &mut HashSet::new(), &mut HashSet::new());
    let got: Vec<(usize, usize)> = accepted
      .iter()
      .map(|p| (p.detection_index, p.candidate_index))
      .collect();
    assert_eq!(got, vec![(0, 1), (1, 0)]);
  }

  #[test]
  fn ties_go_to_earlier_detection() {
    let pairs = vec![Pair::new(3, 0, 0.85, 0.0), Pair::new(1, 0, 0.85, 0.0)];
    let accepted = greedy_assign(&pairs, 0.8, &mut HashSet::new(), &mut HashSet::new());
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].detection_index, 1);
  }

  #[test]
  fn below_confirmation_is_never_accepted() {
    let pairs = vec![Pair::new(0, 0, 0.79, 0.0)];
    assert!(greedy_assign(&pairs, 0.8, &mut HashSet::new(), &mut HashSet::new()).is_empty());
  }

  #[test]
  fn pair_at_threshold_after_rounding_is_accepted() {
    let pairs = vec![Pair::new(0, 0, 0.8 - 5e-7, 0.0)];
    let accepted = greedy_assign(&pairs, 0.8, &mut HashSet::new(), &mut HashSet::new());
    assert_eq!(accepted.len(), 1);
  }

  #[test]
  fn used_sets_carry_across_calls() {
    let mut used_d = HashSet::from([0]);
    let mut used_c = HashSet::new();
    let pairs = vec![Pair::new(0, 0, 0.95, 0.0), Pair::new(1, 0, 0.9, 0.0)];
    let accepted = greedy_assign(&pairs, 0.8, &mut used_d, &mut used_c);
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].detection_index, 1);
    assert!(used_c.contains(&0));
  }

  #[test]
  fn solver_reads_matrix() {
    let pairs = vec![Pair::new(0, 4, 0.9, 0.0), Pair::new(2, 4, 0.85, 0.0)];
    let matrix = CostMatrix::build(&pairs);
    let matched = GreedySolver
      .solve(&matrix, 0.8, Instant::now())
      .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].detection_index, 0);
    assert_eq!(matched[0].candidate_index, 4);
  }
}
