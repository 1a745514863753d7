// 该文件是 Brickmatch （积木匹配） 项目的一部分。
// src/input.rs - 帧与 BOM 输入
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
use std::io::{BufRead, BufReader};

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, bom::BomState, frame::Frame};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行 JSON 解析错误: {source}")]
  ParseError {
    line: usize,
    #[source]
    source: serde_json::Error,
  },
}

/// 每行一个 JSON 帧。`jsonl:///path/frames.jsonl`，路径为 `-` 时读标准输入
pub struct JsonLinesInput {
  reader: Box<dyn BufRead>,
  line: usize,
}

impl FromUrlWithScheme for JsonLinesInput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch);
    }

    let reader: Box<dyn BufRead> = match url.path() {
      "-" => Box::new(BufReader::new(std::io::stdin())),
      path => {
        info!("打开帧文件: {}", path);
        Box::new(BufReader::new(File::open(path)?))
      }
    };

    Ok(JsonLinesInput { reader, line: 0 })
  }
}

impl JsonLinesInput {
  pub fn from_reader(reader: impl BufRead + 'static) -> Self {
    JsonLinesInput {
      reader: Box::new(reader),
      line: 0,
    }
  }
}

impl Iterator for JsonLinesInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut buffer = String::new();
    loop {
      buffer.clear();
      self.line += 1;
      match self.reader.read_line(&mut buffer) {
        Ok(0) => return None,
        Ok(_) if buffer.trim().is_empty() => continue,
        Ok(_) => {
          let line = self.line;
          return Some(
            serde_json::from_str(&buffer).map_err(|source| InputError::ParseError { line, source }),
          );
        }
        Err(e) => return Some(Err(e.into())),
      }
    }
  }
}

/// 从 `bom:///path/bom.json` 读取初始 BOM 快照
pub struct BomFile;

impl BomFile {
  pub const SCHEME: &'static str = "bom";

  pub fn load(url: &Url) -> Result<BomState, InputError> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }
    let file = File::open(url.path())?;
    let bom: BomState = serde_json::from_reader(BufReader::new(file))
      .map_err(|source| InputError::ParseError { line: 0, source })?;
    info!("载入 BOM: {} 种零件", bom.parts.len());
    Ok(bom)
  }
}
