// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/suppression.rs - 质心距离抑制（相邻物体消歧）
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  frame::Frame,
  prefilter::{Pair, refresh_margins},
};

/// 质心距离小于 `min(size) * SUPPRESSION_RATIO` 时视为相邻歧义
pub const SUPPRESSION_RATIO: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SuppressionPolicy {
  /// 从求解器输入中移除
  #[default]
  Exclude,
  /// 保留，但相似度乘以 `factor`
  Penalize { factor: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
  AdjacentSuppression,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SuppressedPair {
  pub detection_index: usize,
  pub candidate_index: usize,
  pub reason: SuppressionReason,
  pub distance: f32,
  pub threshold: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CentroidSuppression {
  pub policy: SuppressionPolicy,
}

impl CentroidSuppression {
  pub fn new(policy: SuppressionPolicy) -> Self {
    Self { policy }
  }

  /// 只检查双方都带有空间信息的对；返回 (保留的对, 被标记的对)。
  ///
  /// 受影响检测的裕度按存活的对重新计算。
  pub fn apply(&self, frame: &Frame, pairs: Vec<Pair>) -> (Vec<Pair>, Vec<SuppressedPair>) {
    let mut kept = Vec::with_capacity(pairs.len());
    let mut flagged = Vec::new();

    for pair in pairs {
      let Some(hit) = Self::check(frame, &pair) else {
        kept.push(pair);
        continue;
      };
      flagged.push(hit);

      if let SuppressionPolicy::Penalize { factor } = self.policy {
        let similarity = (pair.similarity * factor).clamp(0.0, 1.0);
        kept.push(Pair::new(
          pair.detection_index,
          pair.candidate_index,
          similarity,
          pair.margin,
        ));
      }
    }

    if !flagged.is_empty() {
      let touched: HashSet<usize> = flagged.iter().map(|f| f.detection_index).collect();
      refresh_margins(&mut kept, &touched);
      debug!(
        "质心抑制: 标记 {} 对, 策略 {:?}",
        flagged.len(),
        self.policy
      );
    }
    (kept, flagged)
  }

  fn check(frame: &Frame, pair: &Pair) -> Option<SuppressedPair> {
    let detection = frame.detections.get(pair.detection_index)?;
    let (candidate_box, candidate_size) = frame.candidates.get(pair.candidate_index)?.spatial()?;

    let distance = detection.bounding_box.centroid_distance(&candidate_box);
    let threshold = detection.size().min(candidate_size) * SUPPRESSION_RATIO;

    (distance < threshold).then_some(SuppressedPair {
      detection_index: pair.detection_index,
      candidate_index: pair.candidate_index,
      reason: SuppressionReason::AdjacentSuppression,
      distance,
      threshold,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{BoundingBox, Candidate, Detection};

  fn two_close_objects() -> Frame {
    let d0 = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    let d1 = BoundingBox::new(0.1, 0.0, 1.0, 1.0);
    Frame::new(
      vec![
        Detection::new("d0", d0).with_size(1.0),
        Detection::new("d1", d1).with_size(1.0),
      ],
      vec![
        Candidate::new("3001", "5").with_bounding_box(d1).with_size(1.0),
        Candidate::new("3002", "5"),
      ],
    )
  }

  #[test]
  fn close_centroids_are_excluded() {
    let frame = two_close_objects();
    let pairs = vec![Pair::new(0, 0, 0.85, 0.85), Pair::new(1, 1, 0.85, 0.85)];
    let (kept, flagged) = CentroidSuppression::default().apply(&frame, pairs);

    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].candidate_index, 1);
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].reason, SuppressionReason::AdjacentSuppression);
    assert!((flagged[0].distance - 0.1).abs() < 1e-6);
    assert!((flagged[0].threshold - 0.5).abs() < 1e-6);
  }

  #[test]
  fn far_centroids_pass() {
    let mut frame = two_close_objects();
    frame.candidates[0].bounding_box = Some(BoundingBox::new(5.0, 5.0, 1.0, 1.0));
    let (kept, flagged) = CentroidSuppression::default().apply(&frame, vec![Pair::new(0, 0, 0.9, 0.9)]);
    assert_eq!(kept.len(), 1);
    assert!(flagged.is_empty());
  }

  #[test]
  fn excluded_rival_no_longer_narrows_margin() {
    let frame = two_close_objects();
    // 检测 0 的最佳对 (0,0) 被抑制，剩下的 (0,1) 不再与它比较
    let pairs = vec![Pair::new(0, 0, 0.95, 0.02), Pair::new(0, 1, 0.93, -0.02)];
    let (kept, flagged) = CentroidSuppression::default().apply(&frame, pairs);
    assert_eq!(flagged.len(), 1);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].margin - 0.93).abs() < 1e-6);
  }

  #[test]
  fn penalize_keeps_pair_with_lower_similarity() {
    let frame = two_close_objects();
    let suppression = CentroidSuppression::new(SuppressionPolicy::Penalize { factor: 0.5 });
    let (kept, flagged) = suppression.apply(&frame, vec![Pair::new(0, 0, 0.8, 0.3)]);
    assert_eq!(flagged.len(), 1);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].similarity - 0.4).abs() < 1e-6);
    assert!((kept[0].cost - 0.6).abs() < 1e-6);
  }
}
