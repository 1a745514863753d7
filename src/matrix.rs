// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/matrix.rs - 稀疏代价矩阵
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::prefilter::{PREFILTER_THRESHOLD, Pair};

/// 填充密度低于该值时使用按行压缩的表示
pub const SPARSITY_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseEntry {
  /// 列号
  pub index: usize,
  pub cost: f32,
}

#[derive(Debug, Clone, PartialEq)]
enum Cells {
  /// 行优先，缺失的单元为 None（不是零代价）
  Dense(Vec<Option<f32>>),
  /// 每行按列号升序排列
  Sparse(Vec<Vec<SparseEntry>>),
}

/// 一个批次的代价矩阵，行是检测，列是候选，cost = 1 - similarity
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
  detections: Vec<usize>,
  candidates: Vec<usize>,
  cells: Cells,
  filled: usize,
}

impl CostMatrix {
  pub fn build(pairs: &[Pair]) -> Self {
    Self::build_with(pairs, PREFILTER_THRESHOLD, SPARSITY_THRESHOLD)
  }

  pub fn build_with(pairs: &[Pair], min_similarity: f32, sparsity_threshold: f32) -> Self {
    // 行列按原始下标升序，保证平局时靠前的检测优先
    let mut entries: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for pair in pairs.iter().filter(|p| p.similarity >= min_similarity) {
      let cost = entries
        .entry((pair.detection_index, pair.candidate_index))
        .or_insert(pair.cost);
      *cost = cost.min(pair.cost);
    }

    let mut detections: Vec<usize> = entries.keys().map(|&(d, _)| d).collect();
    detections.dedup();
    let mut candidates: Vec<usize> = entries.keys().map(|&(_, c)| c).collect();
    candidates.sort_unstable();
    candidates.dedup();

    let rows = detections.len();
    let cols = candidates.len();
    let filled = entries.len();
    let total = rows * cols;
    let density = if total == 0 {
      0.0
    } else {
      filled as f32 / total as f32
    };

    let column_of = |candidate: usize| candidates.binary_search(&candidate).unwrap_or_default();
    let row_of = |detection: usize| detections.binary_search(&detection).unwrap_or_default();

    let cells = if density < sparsity_threshold {
      let mut sparse = vec![Vec::new(); rows];
      for (&(d, c), &cost) in &entries {
        sparse[row_of(d)].push(SparseEntry {
          index: column_of(c),
          cost,
        });
      }
      Cells::Sparse(sparse)
    } else {
      let mut dense = vec![None; total];
      for (&(d, c), &cost) in &entries {
        dense[row_of(d) * cols + column_of(c)] = Some(cost);
      }
      Cells::Dense(dense)
    };

    let matrix = Self {
      detections,
      candidates,
      cells,
      filled,
    };
    debug!(
      "代价矩阵 {}x{}, 填充 {}, 密度 {:.3}, 压缩: {}",
      rows,
      cols,
      filled,
      matrix.density(),
      matrix.is_sparse()
    );
    matrix
  }

  pub fn rows(&self) -> usize {
    self.detections.len()
  }

  pub fn cols(&self) -> usize {
    self.candidates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.filled == 0
  }

  /// 行对应的检测下标
  pub fn detection(&self, row: usize) -> usize {
    self.detections[row]
  }

  /// 列对应的候选下标
  pub fn candidate(&self, col: usize) -> usize {
    self.candidates[col]
  }

  pub fn filled(&self) -> usize {
    self.filled
  }

  /// 已填充单元 / 总单元
  pub fn density(&self) -> f32 {
    let total = self.rows() * self.cols();
    if total == 0 {
      0.0
    } else {
      self.filled as f32 / total as f32
    }
  }

  pub fn is_sparse(&self) -> bool {
    matches!(self.cells, Cells::Sparse(_))
  }

  pub fn cost(&self, row: usize, col: usize) -> Option<f32> {
    match &self.cells {
      Cells::Dense(cells) => cells.get(row * self.cols() + col).copied().flatten(),
      Cells::Sparse(rows) => {
        let entries = rows.get(row)?;
        entries
          .binary_search_by_key(&col, |e| e.index)
          .ok()
          .map(|i| entries[i].cost)
      }
    }
  }

  pub fn row_entries(&self, row: usize) -> Vec<SparseEntry> {
    match &self.cells {
      Cells::Dense(cells) => {
        let cols = self.cols();
        cells[row * cols..(row + 1) * cols]
          .iter()
          .enumerate()
          .filter_map(|(index, cost)| cost.map(|cost| SparseEntry { index, cost }))
          .collect()
      }
      Cells::Sparse(rows) => rows[row].clone(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn absent_cells_are_not_zero_cost() {
    let pairs = vec![Pair::new(0, 0, 0.9, 0.9), Pair::new(1, 1, 0.8, 0.8)];
    let matrix = CostMatrix::build(&pairs);
    assert_eq!(matrix.rows(), 2);
    assert_eq!(matrix.cols(), 2);
    assert!((matrix.cost(0, 0).unwrap() - 0.1).abs() < 1e-6);
    assert_eq!(matrix.cost(0, 1), None);
    assert!((matrix.density() - 0.5).abs() < 1e-6);
    assert!(!matrix.is_sparse());
  }

  #[test]
  fn low_density_switches_to_compressed_rows() {
    let pairs: Vec<Pair> = (0..5).map(|i| Pair::new(i, i + 10, 0.85, 0.85)).collect();
    let matrix = CostMatrix::build(&pairs);
    assert!((matrix.density() - 0.2).abs() < 1e-6);
    assert!(matrix.is_sparse());
    assert_eq!(matrix.detection(3), 3);
    assert_eq!(matrix.candidate(3), 13);
    assert!((matrix.cost(3, 3).unwrap() - 0.15).abs() < 1e-6);
    assert_eq!(matrix.cost(3, 2), None);
    assert_eq!(matrix.row_entries(2), vec![SparseEntry { index: 2, cost: 0.15 }]);
  }

  #[test]
  fn pairs_below_prefilter_threshold_are_absent() {
    let pairs = vec![Pair::new(0, 0, 0.4, 0.4), Pair::new(0, 1, 0.9, 0.9)];
    let matrix = CostMatrix::build(&pairs);
    assert_eq!(matrix.cols(), 1);
    assert_eq!(matrix.filled(), 1);
  }

  #[test]
  fn dense_and_sparse_agree() {
    let pairs = vec![
      Pair::new(0, 0, 0.9, 0.9),
      Pair::new(0, 2, 0.8, 0.8),
      Pair::new(2, 1, 0.75, 0.75),
    ];
    let dense = CostMatrix::build_with(&pairs, PREFILTER_THRESHOLD, 0.0);
    let sparse = CostMatrix::build_with(&pairs, PREFILTER_THRESHOLD, 1.1);
    assert!(!dense.is_sparse());
    assert!(sparse.is_sparse());
    for row in 0..dense.rows() {
      assert_eq!(dense.row_entries(row), sparse.row_entries(row));
      for col in 0..dense.cols() {
        assert_eq!(dense.cost(row, col), sparse.cost(row, col));
      }
    }
  }
}
