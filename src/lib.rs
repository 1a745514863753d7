// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/lib.rs - 库主文件
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

pub mod bom;
pub mod frame;
pub mod input;
pub mod matrix;
pub mod merge;
pub mod output;
pub mod prefilter;
pub mod scheduler;
pub mod score;
pub mod solver;
pub mod stats;
pub mod suppression;
pub mod task;
pub mod tier;

pub use self::bom::{BomKey, BomPart, BomState};
pub use self::frame::{BoundingBox, Candidate, Detection, Frame};
pub use self::merge::Assignment;
pub use self::scheduler::{FrameOutput, FrameScheduler, SchedulerError, SchedulerOptions};
pub use self::stats::AlgorithmStats;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
