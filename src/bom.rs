// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/bom.rs - 物料清单（BOM）状态
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
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BomError {
  #[error("BOM 不变量被破坏: {key} 的已用数量为负 ({used})")]
  NegativeUsage { key: BomKey, used: i64 },
  #[error("BOM 不变量被破坏: {key} 的已用数量 {used} 超过需求数量 {quantity}")]
  UsageExceedsQuantity { key: BomKey, used: i64, quantity: u32 },
}

/// `part_id_color_id` 形式的账本键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BomKey(String);

impl BomKey {
  pub fn new(part_id: &str, color_id: &str) -> Self {
    BomKey(format!("{}_{}", part_id, color_id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for BomKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BomPart {
  #[serde(deserialize_with = "id_string")]
  pub part_id: String,
  #[serde(deserialize_with = "id_string")]
  pub color_id: String,
  pub quantity: u32,
}

impl BomPart {
  pub fn new(part_id: impl Into<String>, color_id: impl Into<String>, quantity: u32) -> Self {
    Self {
      part_id: part_id.into(),
      color_id: color_id.into(),
      quantity,
    }
  }

  pub fn key(&self) -> BomKey {
    BomKey::new(&self.part_id, &self.color_id)
  }
}

/// 剩余数量快照。`parts` 在一次运行内不变，`used` 是已消耗账本。
///
/// 任何时刻都应满足 `0 <= used[key] <= quantity`。账本使用有符号整数，
/// 以便上游缺陷导致的负值能够被检测出来而不是被类型悄悄吞掉。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BomState {
  pub parts: Vec<BomPart>,
  #[serde(default)]
  pub used: BTreeMap<BomKey, i64>,
}

impl BomState {
  pub fn new(parts: Vec<BomPart>) -> Self {
    Self {
      parts,
      used: BTreeMap::new(),
    }
  }

  pub fn part(&self, key: &BomKey) -> Option<&BomPart> {
    self.parts.iter().find(|part| &part.key() == key)
  }

  pub fn used(&self, key: &BomKey) -> i64 {
    self.used.get(key).copied().unwrap_or(0)
  }

  /// 剩余可分配数量，键不在 BOM 中时为 `None`
  pub fn remaining(&self, key: &BomKey) -> Option<i64> {
    self
      .part(key)
      .map(|part| i64::from(part.quantity) - self.used(key))
  }

  pub fn is_complete(&self) -> bool {
    self
      .parts
      .iter()
      .all(|part| self.used(&part.key()) >= i64::from(part.quantity))
  }

  /// 检查账本不变量；负值永远不可恢复，也绝不就地修正
  pub fn check_invariants(&self) -> Result<(), BomError> {
    for (key, &used) in &self.used {
      if used < 0 {
        return Err(BomError::NegativeUsage {
          key: key.clone(),
          used,
        });
      }
      if let Some(part) = self.part(key)
        && used > i64::from(part.quantity)
      {
        return Err(BomError::UsageExceedsQuantity {
          key: key.clone(),
          used,
          quantity: part.quantity,
        });
      }
    }
    Ok(())
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Text(String),
  Signed(i64),
  Unsigned(u64),
}

/// 接受字符串或整数形式的标识符，统一为字符串
pub(crate) fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match RawId::deserialize(deserializer)? {
    RawId::Text(text) => text,
    RawId::Signed(value) => value.to_string(),
    RawId::Unsigned(value) => value.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_joins_part_and_color() {
    assert_eq!(BomKey::new("3001", "5").as_str(), "3001_5");
  }

  #[test]
  fn remaining_tracks_usage() {
    let mut bom = BomState::new(vec![BomPart::new("3001", "5", 3)]);
    let key = BomKey::new("3001", "5");
    bom.used.insert(key.clone(), 2);
    assert_eq!(bom.remaining(&key), Some(1));
    assert_eq!(bom.remaining(&BomKey::new("3002", "5")), None);
    assert!(!bom.is_complete());
  }

  #[test]
  fn negative_usage_is_fatal() {
    let mut bom = BomState::new(vec![BomPart::new("3001", "5", 1)]);
    bom.used.insert(BomKey::new("3001", "5"), -1);
    assert!(matches!(
      bom.check_invariants(),
      Err(BomError::NegativeUsage { used: -1, .. })
    ));
  }

  #[test]
  fn over_usage_is_fatal() {
    let mut bom = BomState::new(vec![BomPart::new("3001", "5", 1)]);
    bom.used.insert(BomKey::new("3001", "5"), 2);
    assert!(matches!(
      bom.check_invariants(),
      Err(BomError::UsageExceedsQuantity { used: 2, quantity: 1, .. })
    ));
  }

  #[test]
  fn bom_json_uses_string_keys() {
    let json = r#"{"parts": [{"part_id": "3001", "color_id": 5, "quantity": 2}], "used": {"3001_5": 1}}"#;
    let bom: BomState = serde_json::from_str(json).unwrap();
    assert_eq!(bom.used(&BomKey::new("3001", "5")), 1);
    assert!(bom.check_invariants().is_ok());
  }
}
