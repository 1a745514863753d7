// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/output.rs - 帧处理结果输出
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, scheduler::FrameOutput};

pub trait Record: Sized {
  type Error;
  fn record(&self, frame_index: usize, output: &FrameOutput) -> Result<(), Self::Error>;
  fn finish(&self) -> Result<(), Self::Error> {
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("输出已被毒化")]
  Poisoned,
}

/// 每帧一行 JSON：`jsonl:///path/out.jsonl`
pub struct JsonLinesOutput {
  path: PathBuf,
  writer: Arc<Mutex<BufWriter<File>>>,
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let path = PathBuf::from(url.path());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(&path)?;
    info!("输出到 {}", path.display());
    Ok(JsonLinesOutput {
      path,
      writer: Arc::new(Mutex::new(BufWriter::new(file))),
    })
  }
}

impl JsonLinesOutput {
  pub fn path(&self) -> &std::path::Path {
    &self.path
  }
}

impl Record for JsonLinesOutput {
  type Error = OutputError;

  fn record(&self, frame_index: usize, output: &FrameOutput) -> Result<(), Self::Error> {
    let line = serde_json::json!({
      "frame": frame_index,
      "recorded_at": Utc::now(),
      "output": output,
    });
    let mut writer = self.writer.lock().map_err(|_| OutputError::Poisoned)?;
    serde_json::to_writer(&mut *writer, &line)?;
    writer.write_all(b"\n")?;
    Ok(())
  }

  fn finish(&self) -> Result<(), Self::Error> {
    self
      .writer
      .lock()
      .map_err(|_| OutputError::Poisoned)?
      .flush()?;
    Ok(())
  }
}

/// 只打印摘要日志：`log:`
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(LogOutput)
  }
}

impl Record for LogOutput {
  type Error = OutputError;

  fn record(&self, frame_index: usize, output: &FrameOutput) -> Result<(), Self::Error> {
    info!(
      "帧 {}: 路径 {:?}, 分配 {}, 待审 {}, 抑制 {}",
      frame_index,
      output.path,
      output.assignments.len(),
      output.hold_queue.len(),
      output.suppressed.len()
    );
    for a in &output.assignments {
      info!(
        "  - {} -> {}/{} ({:.2}%, {:?}, {:?})",
        a.detection_id,
        a.part_id,
        a.color_id,
        a.similarity * 100.0,
        a.tier,
        a.method
      );
    }
    Ok(())
  }
}

pub enum OutputWrapper {
  JsonLines(JsonLinesOutput),
  Log(LogOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonLinesOutput::SCHEME => Ok(OutputWrapper::JsonLines(JsonLinesOutput::from_url(url)?)),
      LogOutput::SCHEME => Ok(OutputWrapper::Log(LogOutput::from_url(url)?)),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Record for OutputWrapper {
  type Error = OutputError;

  fn record(&self, frame_index: usize, output: &FrameOutput) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonLines(inner) => inner.record(frame_index, output),
      OutputWrapper::Log(inner) => inner.record(frame_index, output),
    }
  }

  fn finish(&self) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonLines(inner) => inner.finish(),
      OutputWrapper::Log(inner) => inner.finish(),
    }
  }
}
