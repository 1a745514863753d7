// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/prefilter.rs - 候选预筛选
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

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::{frame::Frame, score::Scorer};

pub const PREFILTER_THRESHOLD: f32 = 0.50;
pub const PREFILTER_TOP_K: usize = 3;

/// 检测-候选对，仅在一帧的处理过程中存在
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pair {
  pub detection_index: usize,
  pub candidate_index: usize,
  pub similarity: f32,
  /// 1 - similarity
  pub cost: f32,
  /// 与同一检测下其余最佳合格候选的相似度差
  pub margin: f32,
}

impl Pair {
  pub fn new(detection_index: usize, candidate_index: usize, similarity: f32, margin: f32) -> Self {
    Self {
      detection_index,
      candidate_index,
      similarity,
      cost: 1.0 - similarity,
      margin,
    }
  }
}

/// 只用仍然存活的对重新计算 `detections` 中各检测的裕度。
///
/// 规则与预筛选一致：最佳对减去次佳，其余对减去最佳，唯一的对减去 0。
pub fn refresh_margins(pairs: &mut [Pair], detections: &HashSet<usize>) {
  let mut top: HashMap<usize, (f32, Option<f32>)> = HashMap::new();
  for pair in pairs.iter().filter(|p| detections.contains(&p.detection_index)) {
    top
      .entry(pair.detection_index)
      .and_modify(|(best, second)| {
        if pair.similarity > *best {
          *second = Some(*best);
          *best = pair.similarity;
        } else if second.is_none_or(|s| pair.similarity > s) {
          *second = Some(pair.similarity);
        }
      })
      .or_insert((pair.similarity, None));
  }

  for pair in pairs.iter_mut() {
    let Some(&(best, second)) = top.get(&pair.detection_index) else {
      continue;
    };
    let rival = if pair.similarity >= best { second } else { Some(best) };
    pair.margin = pair.similarity - rival.unwrap_or(0.0);
  }
}

/// 把 N×M 的交叉积压缩到每个检测至多 `top_k` 个候选
#[derive(Debug, Clone, Copy)]
pub struct Prefilter {
  pub threshold: f32,
  pub top_k: usize,
}

impl Default for Prefilter {
  fn default() -> Self {
    Self {
      threshold: PREFILTER_THRESHOLD,
      top_k: PREFILTER_TOP_K,
    }
  }
}

impl Prefilter {
  pub fn run<S: Scorer + ?Sized>(&self, frame: &Frame, scorer: &S) -> Vec<Pair> {
    let mut pairs = Vec::with_capacity(frame.detections.len() * self.top_k);

    for detection_index in 0..frame.detections.len() {
      let mut qualified: Vec<(usize, f32)> = (0..frame.candidates.len())
        .map(|candidate_index| {
          (
            candidate_index,
            scorer.score(frame, detection_index, candidate_index),
          )
        })
        .filter(|&(_, similarity)| similarity >= self.threshold)
        .collect();

      // 稳定排序，相同相似度保持候选插入顺序
      qualified.sort_by(|a, b| b.1.total_cmp(&a.1));

      let best = qualified.first().map(|&(_, s)| s);
      let runner_up = qualified.get(1).map(|&(_, s)| s);

      for (rank, &(candidate_index, similarity)) in qualified.iter().take(self.top_k).enumerate() {
        let rival = if rank == 0 { runner_up } else { best };
        let margin = similarity - rival.unwrap_or(0.0);
        pairs.push(Pair::new(detection_index, candidate_index, similarity, margin));
      }
    }

    debug!(
      "预筛选: {} 个检测 x {} 个候选 -> {} 对",
      frame.detections.len(),
      frame.candidates.len(),
      pairs.len()
    );
    pairs
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{BoundingBox, Candidate, Detection};
  use crate::score::FrameScorer;

  fn frame(similarities: Vec<Vec<f32>>) -> Frame {
    let detections = (0..similarities.len())
      .map(|i| Detection::new(format!("d{i}"), BoundingBox::new(i as f32 * 10.0, 0.0, 1.0, 1.0)))
      .collect();
    let candidates = (0..similarities.first().map_or(0, Vec::len))
      .map(|j| Candidate::new(format!("p{j}"), "0"))
      .collect();
    Frame::new(detections, candidates).with_similarities(similarities)
  }

  #[test]
  fn keeps_top_three_above_threshold() {
    let f = frame(vec![vec![0.6, 0.9, 0.4, 0.7, 0.8]]);
    let pairs = Prefilter::default().run(&f, &FrameScorer);
    let picked: Vec<usize> = pairs.iter().map(|p| p.candidate_index).collect();
    assert_eq!(picked, vec![1, 4, 3]);
    assert!(pairs.iter().all(|p| p.similarity >= PREFILTER_THRESHOLD));
  }

  #[test]
  fn ties_keep_insertion_order() {
    let f = frame(vec![vec![0.8, 0.8, 0.8, 0.8]]);
    let pairs = Prefilter::default().run(&f, &FrameScorer);
    let picked: Vec<usize> = pairs.iter().map(|p| p.candidate_index).collect();
    assert_eq!(picked, vec![0, 1, 2]);
  }

  #[test]
  fn no_padding_and_no_pairs_below_threshold() {
    let f = frame(vec![vec![0.55, 0.1], vec![0.3, 0.49]]);
    let pairs = Prefilter::default().run(&f, &FrameScorer);
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].detection_index, 0);
  }

  #[test]
  fn output_is_bounded_by_three_per_detection() {
    let f = frame(vec![vec![0.9; 10]; 4]);
    let pairs = Prefilter::default().run(&f, &FrameScorer);
    assert_eq!(pairs.len(), 12);
  }

  #[test]
  fn refreshed_margins_ignore_removed_rivals() {
    let f = frame(vec![vec![0.95, 0.93, 0.6], vec![0.92, 0.91, 0.1]]);
    let mut pairs = Prefilter::default().run(&f, &FrameScorer);
    // 去掉检测 0 的最佳对
    pairs.retain(|p| !(p.detection_index == 0 && p.candidate_index == 0));
    refresh_margins(&mut pairs, &HashSet::from([0]));

    let margin = |d: usize, c: usize| {
      pairs
        .iter()
        .find(|p| p.detection_index == d && p.candidate_index == c)
        .map(|p| p.margin)
        .unwrap()
    };
    assert!((margin(0, 1) - 0.33).abs() < 1e-6);
    assert!((margin(0, 2) + 0.33).abs() < 1e-6);
    // 未列出的检测保持原值
    assert!((margin(1, 0) - 0.01).abs() < 1e-6);
  }

  #[test]
  fn equal_best_pairs_have_zero_margin() {
    let mut pairs = vec![Pair::new(0, 0, 0.9, 1.0), Pair::new(0, 1, 0.9, 1.0)];
    refresh_margins(&mut pairs, &HashSet::from([0]));
    assert!(pairs.iter().all(|p| p.margin.abs() < 1e-6));
  }

  #[test]
  fn margin_is_gap_to_best_rival() {
    let f = frame(vec![vec![0.95, 0.90, 0.2], vec![0.92, 0.1, 0.1]]);
    let pairs = Prefilter::default().run(&f, &FrameScorer);
    assert!((pairs[0].margin - 0.05).abs() < 1e-6);
    assert!((pairs[1].margin + 0.05).abs() < 1e-6);
    // 唯一合格候选：与 0 比较
    assert!((pairs[2].margin - 0.92).abs() < 1e-6);
    assert!((pairs[2].cost - 0.08).abs() < 1e-6);
  }
}
