// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/merge.rs - 单写者 BOM 合并
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

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::{
  bom::{BomError, BomKey, BomState},
  frame::Frame,
  solver::AssignmentMethod,
  tier::Tier,
};

/// 待合并的候选分配
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
  pub detection_index: usize,
  pub candidate_index: usize,
  pub detection_id: String,
  pub part_id: String,
  pub color_id: String,
  pub similarity: f32,
  pub tier: Tier,
  pub method: AssignmentMethod,
}

impl Proposal {
  pub fn new(
    frame: &Frame,
    detection_index: usize,
    candidate_index: usize,
    similarity: f32,
    tier: Tier,
    method: AssignmentMethod,
  ) -> Self {
    let candidate = &frame.candidates[candidate_index];
    Self {
      detection_index,
      candidate_index,
      detection_id: frame.detections[detection_index].id.clone(),
      part_id: candidate.part_id.clone(),
      color_id: candidate.color_id.clone(),
      similarity,
      tier,
      method,
    }
  }

  pub fn key(&self) -> BomKey {
    BomKey::new(&self.part_id, &self.color_id)
  }
}

/// 已合并的分配，携带应用之后的 BOM 快照；交给调用方后不再改变
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
  pub detection_id: String,
  pub detection_index: usize,
  pub candidate_index: usize,
  pub part_id: String,
  pub color_id: String,
  pub similarity: f32,
  pub tier: Tier,
  pub method: AssignmentMethod,
  pub bom_state: BomState,
  pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
  NotInBom,
  QuantityExhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
  pub proposal: Proposal,
  pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
  pub bom_state: BomState,
  pub assignments: Vec<Assignment>,
  pub rejected: Vec<Rejection>,
}

/// 逐条、按顺序把分配写入 BOM。
///
/// 数量限制下的写入不满足交换律，因此绝不能并行或重排。单条被拒不会中止
/// 整批；账本出现负值是上游缺陷，直接报错，不做修正。
#[derive(Debug, Default, Clone, Copy)]
pub struct BomMerger;

impl BomMerger {
  pub fn merge(&self, bom: &BomState, proposals: Vec<Proposal>) -> Result<MergeOutcome, BomError> {
    Self::post_check(bom)?;

    let mut state = bom.clone();
    let mut assignments = Vec::with_capacity(proposals.len());
    let mut rejected = Vec::new();

    for proposal in proposals {
      let key = proposal.key();
      let Some(quantity) = state.part(&key).map(|part| i64::from(part.quantity)) else {
        debug!("拒绝分配 {} -> {}: 不在 BOM 中", proposal.detection_id, key);
        rejected.push(Rejection {
          proposal,
          reason: RejectReason::NotInBom,
        });
        continue;
      };

      let used = state.used(&key);
      if used >= quantity {
        debug!(
          "拒绝分配 {} -> {}: 数量已用尽 ({}/{})",
          proposal.detection_id, key, used, quantity
        );
        rejected.push(Rejection {
          proposal,
          reason: RejectReason::QuantityExhausted,
        });
        continue;
      }

      state.used.insert(key, used + 1);
      assignments.push(Assignment {
        detection_id: proposal.detection_id,
        detection_index: proposal.detection_index,
        candidate_index: proposal.candidate_index,
        part_id: proposal.part_id,
        color_id: proposal.color_id,
        similarity: proposal.similarity,
        tier: proposal.tier,
        method: proposal.method,
        bom_state: state.clone(),
        timestamp: Utc::now(),
      });
    }

    Self::post_check(&state)?;

    if !rejected.is_empty() {
      warn!(
        "BOM 合并: 接受 {} 条, 拒绝 {} 条",
        assignments.len(),
        rejected.len()
      );
    }

    Ok(MergeOutcome {
      bom_state: state,
      assignments,
      rejected,
    })
  }

  /// 扫描账本，任何越界值都是致命错误
  pub fn post_check(bom: &BomState) -> Result<(), BomError> {
    bom.check_invariants().inspect_err(|e| {
      error!("{}", e);
    })
  }
}
