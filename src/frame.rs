// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/frame.rs - 单帧检测与候选定义
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
use thiserror::Error;

use crate::bom::{BomKey, id_string};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
  #[error("检测 {index} 缺少 id")]
  MissingDetectionId { index: usize },
  #[error("检测 id 重复: {0}")]
  DuplicateDetectionId(String),
  #[error("检测 {index} 的几何信息无效")]
  InvalidGeometry { index: usize },
  #[error("候选 {index} 缺少 part_id")]
  MissingPartId { index: usize },
  #[error("候选 {index} 缺少 color_id")]
  MissingColorId { index: usize },
  #[error("候选 {index} 的几何信息无效")]
  InvalidCandidateGeometry { index: usize },
  #[error("候选 {index} 的相似度无效: {value}")]
  InvalidSimilarity { index: usize, value: f32 },
  #[error("相似度矩阵尺寸不匹配: 期望 {expected_rows}x{expected_cols}, 实际 {rows}x{cols}")]
  SimilarityShape {
    expected_rows: usize,
    expected_cols: usize,
    rows: usize,
    cols: usize,
  },
  #[error("相似度矩阵 ({row}, {col}) 的值无效: {value}")]
  InvalidSimilarityCell { row: usize, col: usize, value: f32 },
}

/// 边界框，左上角坐标加宽高；同一帧内单位一致即可（归一化或像素）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn centroid(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  /// 特征尺寸 max(width, height)
  pub fn characteristic_size(&self) -> f32 {
    self.width.max(self.height)
  }

  pub fn centroid_distance(&self, other: &BoundingBox) -> f32 {
    let (ax, ay) = self.centroid();
    let (bx, by) = other.centroid();
    ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
  }

  fn is_valid(&self) -> bool {
    [self.x, self.y, self.width, self.height]
      .iter()
      .all(|v| v.is_finite())
      && self.width >= 0.0
      && self.height >= 0.0
  }
}

/// 帧内的一个检测对象
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub id: String,
  pub bounding_box: BoundingBox,
  /// 未给出时取边界框的特征尺寸
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
}

impl Detection {
  pub fn new(id: impl Into<String>, bounding_box: BoundingBox) -> Self {
    Self {
      id: id.into(),
      bounding_box,
      size: None,
      embedding: None,
    }
  }

  pub fn with_size(mut self, size: f32) -> Self {
    self.size = Some(size);
    self
  }

  pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
    self.embedding = Some(embedding);
    self
  }

  pub fn size(&self) -> f32 {
    self
      .size
      .unwrap_or_else(|| self.bounding_box.characteristic_size())
  }
}

/// BOM 中可分配的 (part_id, color_id) 候选
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
  #[serde(deserialize_with = "id_string")]
  pub part_id: String,
  #[serde(deserialize_with = "id_string")]
  pub color_id: String,
  /// 外部评分器给出的相似度，原样使用
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub similarity: Option<f32>,
  /// 候选关联的空间位置，仅用于质心抑制
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub bounding_box: Option<BoundingBox>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<f32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub embedding: Option<Vec<f32>>,
}

impl Candidate {
  pub fn new(part_id: impl Into<String>, color_id: impl Into<String>) -> Self {
    Self {
      part_id: part_id.into(),
      color_id: color_id.into(),
      similarity: None,
      bounding_box: None,
      size: None,
      embedding: None,
    }
  }

  pub fn with_similarity(mut self, similarity: f32) -> Self {
    self.similarity = Some(similarity);
    self
  }

  pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
    self.bounding_box = Some(bounding_box);
    self
  }

  pub fn with_size(mut self, size: f32) -> Self {
    self.size = Some(size);
    self
  }

  pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
    self.embedding = Some(embedding);
    self
  }

  pub fn key(&self) -> BomKey {
    BomKey::new(&self.part_id, &self.color_id)
  }

  /// 候选携带空间信息时返回 (边界框, 特征尺寸)
  pub fn spatial(&self) -> Option<(BoundingBox, f32)> {
    self.bounding_box.map(|bbox| {
      let size = self.size.unwrap_or_else(|| bbox.characteristic_size());
      (bbox, size)
    })
  }
}

/// 一帧的输入：检测、候选以及可选的 N×M 相似度矩阵
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
  pub detections: Vec<Detection>,
  pub candidates: Vec<Candidate>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub similarities: Option<Vec<Vec<f32>>>,
}

impl Frame {
  pub fn new(detections: Vec<Detection>, candidates: Vec<Candidate>) -> Self {
    Self {
      detections,
      candidates,
      similarities: None,
    }
  }

  pub fn with_similarities(mut self, similarities: Vec<Vec<f32>>) -> Self {
    self.similarities = Some(similarities);
    self
  }

  /// 在任何 BOM 变更之前校验输入，出错即整帧拒绝
  pub fn validate(&self) -> Result<(), FrameError> {
    let mut seen = HashSet::with_capacity(self.detections.len());
    for (index, detection) in self.detections.iter().enumerate() {
      if detection.id.is_empty() {
        return Err(FrameError::MissingDetectionId { index });
      }
      if !seen.insert(detection.id.as_str()) {
        return Err(FrameError::DuplicateDetectionId(detection.id.clone()));
      }
      if !detection.bounding_box.is_valid() || !is_valid_size(detection.size) {
        return Err(FrameError::InvalidGeometry { index });
      }
    }

    for (index, candidate) in self.candidates.iter().enumerate() {
      if candidate.part_id.is_empty() {
        return Err(FrameError::MissingPartId { index });
      }
      if candidate.color_id.is_empty() {
        return Err(FrameError::MissingColorId { index });
      }
      if let Some(value) = candidate.similarity
        && !is_unit(value)
      {
        return Err(FrameError::InvalidSimilarity { index, value });
      }
      // NaN 锚点会让质心抑制的距离比较恒为假
      if !candidate.bounding_box.is_none_or(|b| b.is_valid()) || !is_valid_size(candidate.size) {
        return Err(FrameError::InvalidCandidateGeometry { index });
      }
    }

    if let Some(matrix) = &self.similarities {
      let expected_rows = self.detections.len();
      let expected_cols = self.candidates.len();
      let shape_error = |rows: usize, cols: usize| FrameError::SimilarityShape {
        expected_rows,
        expected_cols,
        rows,
        cols,
      };
      if matrix.len() != expected_rows {
        return Err(shape_error(
          matrix.len(),
          matrix.first().map_or(0, Vec::len),
        ));
      }
      for (row, values) in matrix.iter().enumerate() {
        if values.len() != expected_cols {
          return Err(shape_error(matrix.len(), values.len()));
        }
        if let Some((col, &value)) = values.iter().enumerate().find(|(_, v)| !is_unit(**v)) {
          return Err(FrameError::InvalidSimilarityCell { row, col, value });
        }
      }
    }

    Ok(())
  }
}

fn is_valid_size(size: Option<f32>) -> bool {
  size.is_none_or(|s| s.is_finite() && s >= 0.0)
}

fn is_unit(value: f32) -> bool {
  value.is_finite() && (0.0..=1.0).contains(&value)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn unit_box() -> BoundingBox {
    BoundingBox::new(0.0, 0.0, 1.0, 1.0)
  }

  #[test]
  fn detection_size_defaults_to_longest_side() {
    let det = Detection::new("a", BoundingBox::new(0.0, 0.0, 2.0, 3.0));
    assert_eq!(det.size(), 3.0);
    assert_eq!(det.with_size(1.5).size(), 1.5);
  }

  #[test]
  fn centroid_distance_is_euclidean() {
    let a = BoundingBox::new(0.0, 0.0, 2.0, 2.0);
    let b = BoundingBox::new(3.0, 4.0, 2.0, 2.0);
    assert!((a.centroid_distance(&b) - 5.0).abs() < 1e-6);
  }

  #[test]
  fn validate_rejects_missing_part_id() {
    let frame = Frame::new(
      vec![Detection::new("d0", unit_box())],
      vec![Candidate::new("", "5").with_similarity(0.9)],
    );
    assert_eq!(frame.validate(), Err(FrameError::MissingPartId { index: 0 }));
  }

  #[test]
  fn validate_rejects_duplicate_detection_ids() {
    let frame = Frame::new(
      vec![
        Detection::new("d0", unit_box()),
        Detection::new("d0", unit_box()),
      ],
      vec![],
    );
    assert_eq!(
      frame.validate(),
      Err(FrameError::DuplicateDetectionId("d0".to_string()))
    );
  }

  #[test]
  fn validate_rejects_out_of_range_similarity() {
    let frame = Frame::new(
      vec![Detection::new("d0", unit_box())],
      vec![Candidate::new("3001", "5").with_similarity(1.2)],
    );
    assert!(matches!(
      frame.validate(),
      Err(FrameError::InvalidSimilarity { index: 0, .. })
    ));
  }

  #[test]
  fn validate_rejects_bad_candidate_anchor() {
    let nan_anchor = Frame::new(
      vec![Detection::new("d0", unit_box())],
      vec![Candidate::new("3001", "5").with_bounding_box(BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0))],
    );
    assert_eq!(
      nan_anchor.validate(),
      Err(FrameError::InvalidCandidateGeometry { index: 0 })
    );

    let negative_size = Frame::new(
      vec![Detection::new("d0", unit_box())],
      vec![
        Candidate::new("3001", "5"),
        Candidate::new("3002", "5").with_bounding_box(unit_box()).with_size(-1.0),
      ],
    );
    assert_eq!(
      negative_size.validate(),
      Err(FrameError::InvalidCandidateGeometry { index: 1 })
    );
  }

  #[test]
  fn validate_checks_matrix_shape() {
    let frame = Frame::new(
      vec![Detection::new("d0", unit_box())],
      vec![Candidate::new("3001", "5"), Candidate::new("3002", "5")],
    )
    .with_similarities(vec![vec![0.9]]);
    assert!(matches!(
      frame.validate(),
      Err(FrameError::SimilarityShape {
        expected_rows: 1,
        expected_cols: 2,
        ..
      })
    ));
  }

  #[test]
  fn candidate_ids_accept_numbers() {
    let json = r#"{"part_id": 3001, "color_id": 5, "similarity": 0.95}"#;
    let candidate: Candidate = serde_json::from_str(json).unwrap();
    assert_eq!(candidate.part_id, "3001");
    assert_eq!(candidate.key().to_string(), "3001_5");
  }

  #[test]
  fn missing_candidates_array_is_rejected_at_parse_time() {
    let json = r#"{"detections": []}"#;
    assert!(serde_json::from_str::<Frame>(json).is_err());
  }
}
