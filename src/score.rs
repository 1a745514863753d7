// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/score.rs - 检测与候选之间的相似度评分
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

use crate::frame::Frame;

/// 给出检测 `detection_index` 与候选 `candidate_index` 的相似度，取值 [0, 1]
pub trait Scorer {
  fn score(&self, frame: &Frame, detection_index: usize, candidate_index: usize) -> f32;
}

/// 默认评分：相似度矩阵 > 候选自带相似度 > 嵌入余弦相似度 > 0
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameScorer;

impl Scorer for FrameScorer {
  fn score(&self, frame: &Frame, detection_index: usize, candidate_index: usize) -> f32 {
    if let Some(value) = frame
      .similarities
      .as_ref()
      .and_then(|rows| rows.get(detection_index))
      .and_then(|row| row.get(candidate_index))
    {
      return *value;
    }

    let candidate = &frame.candidates[candidate_index];
    if let Some(similarity) = candidate.similarity {
      return similarity;
    }

    let detection = &frame.detections[detection_index];
    match (&detection.embedding, &candidate.embedding) {
      (Some(a), Some(b)) => cosine_similarity(a, b),
      _ => 0.0,
    }
  }
}

/// 只看嵌入向量的评分器
#[derive(Debug, Default, Clone, Copy)]
pub struct CosineScorer;

impl Scorer for CosineScorer {
  fn score(&self, frame: &Frame, detection_index: usize, candidate_index: usize) -> f32 {
    let detection = &frame.detections[detection_index];
    let candidate = &frame.candidates[candidate_index];
    match (&detection.embedding, &candidate.embedding) {
      (Some(a), Some(b)) => cosine_similarity(a, b),
      _ => 0.0,
    }
  }
}

impl<F> Scorer for F
where
  F: Fn(&Frame, usize, usize) -> f32,
{
  fn score(&self, frame: &Frame, detection_index: usize, candidate_index: usize) -> f32 {
    self(frame, detection_index, candidate_index)
  }
}

/// 余弦相似度，负相关截断为 0；维度不一致或零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }

  let mut dot = 0.0f64;
  let mut norm_a = 0.0f64;
  let mut norm_b = 0.0f64;
  for (&ai, &bi) in a.iter().zip(b) {
    let (ai, bi) = (ai as f64, bi as f64);
    dot += ai * bi;
    norm_a += ai * ai;
    norm_b += bi * bi;
  }

  if norm_a == 0.0 || norm_b == 0.0 {
    return 0.0;
  }

  (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0) as f32
}
