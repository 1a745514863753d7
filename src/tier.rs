// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/tier.rs - 置信度分层路由
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
use tracing::debug;

use crate::{frame::Frame, prefilter::Pair};

pub const HIGH_CONFIDENCE: f32 = 0.90;
pub const MEDIUM_CONFIDENCE: f32 = 0.70;
pub const MIN_MARGIN: f32 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
  /// similarity > high，直接接受
  High,
  /// medium <= similarity <= high，批量最优分配
  Medium,
  /// similarity < medium，进入待审队列，从不自动分配
  Low,
}

#[derive(Debug, Clone, Default)]
pub struct TieredPairs {
  pub high: Vec<Pair>,
  pub medium: Vec<Pair>,
  pub low: Vec<Pair>,
}

impl TieredPairs {
  pub fn len(&self) -> usize {
    self.high.len() + self.medium.len() + self.low.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
  LowConfidence,
  /// 与次优候选的差距不足，倾向人工复核
  AmbiguousMargin,
}

/// 待审队列中的一项，附带调用方便于展示的标识
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeldPair {
  #[serde(flatten)]
  pub pair: Pair,
  pub detection_id: String,
  pub part_id: String,
  pub color_id: String,
  pub reason: HoldReason,
}

impl HeldPair {
  pub fn new(frame: &Frame, pair: Pair, reason: HoldReason) -> Self {
    let candidate = &frame.candidates[pair.candidate_index];
    Self {
      pair,
      detection_id: frame.detections[pair.detection_index].id.clone(),
      part_id: candidate.part_id.clone(),
      color_id: candidate.color_id.clone(),
      reason,
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct TierRouter {
  pub high: f32,
  pub medium: f32,
  pub min_margin: f32,
}

impl Default for TierRouter {
  fn default() -> Self {
    Self {
      high: HIGH_CONFIDENCE,
      medium: MEDIUM_CONFIDENCE,
      min_margin: MIN_MARGIN,
    }
  }
}

impl TierRouter {
  pub fn classify(&self, similarity: f32) -> Tier {
    if similarity > self.high {
      Tier::High
    } else if similarity >= self.medium {
      Tier::Medium
    } else {
      Tier::Low
    }
  }

  /// 按相似度划分为三个互不相交的集合，保持输入顺序
  pub fn route(&self, pairs: Vec<Pair>) -> TieredPairs {
    let mut tiered = TieredPairs::default();
    for pair in pairs {
      match self.classify(pair.similarity) {
        Tier::High => tiered.high.push(pair),
        Tier::Medium => tiered.medium.push(pair),
        Tier::Low => tiered.low.push(pair),
      }
    }
    debug!(
      "分层: 高 {} / 中 {} / 低 {}",
      tiered.high.len(),
      tiered.medium.len(),
      tiered.low.len()
    );
    tiered
  }

  /// 把高置信度对中裕度不足的挑出来：(可直接接受, 需复核)
  pub fn split_ambiguous(&self, high: Vec<Pair>) -> (Vec<Pair>, Vec<Pair>) {
    high
      .into_iter()
      .partition(|pair| pair.margin >= self.min_margin)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn boundaries_follow_thresholds() {
    let router = TierRouter::default();
    assert_eq!(router.classify(0.95), Tier::High);
    assert_eq!(router.classify(0.90), Tier::Medium);
    assert_eq!(router.classify(0.70), Tier::Medium);
    assert_eq!(router.classify(0.69), Tier::Low);
  }

  #[test]
  fn route_is_a_partition() {
    let pairs: Vec<Pair> = [0.5, 0.69, 0.7, 0.85, 0.9, 0.91, 0.99]
      .iter()
      .enumerate()
      .map(|(i, &s)| Pair::new(i, i, s, s))
      .collect();
    let tiered = TierRouter::default().route(pairs.clone());

    assert_eq!(tiered.len(), pairs.len());
    let mut rebuilt: Vec<Pair> = tiered
      .high
      .iter()
      .chain(&tiered.medium)
      .chain(&tiered.low)
      .copied()
      .collect();
    rebuilt.sort_by_key(|p| p.detection_index);
    assert_eq!(rebuilt, pairs);
    assert_eq!(tiered.high.len(), 2);
    assert_eq!(tiered.medium.len(), 3);
    assert_eq!(tiered.low.len(), 2);
  }

  #[test]
  fn narrow_margin_goes_to_review() {
    let router = TierRouter::default();
    let (accept, review) =
      router.split_ambiguous(vec![Pair::new(0, 0, 0.97, 0.05), Pair::new(1, 1, 0.95, 0.4)]);
    assert_eq!(accept.len(), 1);
    assert_eq!(accept[0].detection_index, 1);
    assert_eq!(review[0].detection_index, 0);
  }
}
