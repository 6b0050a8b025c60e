// 该文件是 Qianli （千里眼） 项目的一部分。
// src/labels.rs - 类别名称表
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

use std::{collections::HashMap, path::Path};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ClassTableLoadError {
  #[error("无法读取类别文件 {path}: {source}")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },
}

/// 类别编号到名称的只读映射，每行一个 `<编号>,<名称>`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassNameTable {
  names: HashMap<i32, String>,
}

impl ClassNameTable {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ClassTableLoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ClassTableLoadError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let table = Self::parse(&text);
    info!("从 {} 加载了 {} 个类别", path.display(), table.len());
    Ok(table)
  }

  /// 格式错误的行会被跳过；重复编号保留第一次出现的名称
  pub fn parse(text: &str) -> Self {
    let mut names = HashMap::new();
    for (lineno, line) in text.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }

      let Some((index, label)) = line.split_once(',') else {
        warn!("类别文件第 {} 行缺少逗号，已跳过: {:?}", lineno + 1, line);
        continue;
      };
      let label = label.trim();
      let index = match index.trim().parse::<i32>() {
        Ok(index) if !label.is_empty() => index,
        _ => {
          warn!("类别文件第 {} 行格式错误，已跳过: {:?}", lineno + 1, line);
          continue;
        }
      };

      if names.contains_key(&index) {
        warn!("类别编号 {} 重复，保留第一次出现的名称", index);
        continue;
      }
      names.insert(index, label.to_string());
    }
    Self { names }
  }

  pub fn get(&self, index: i32) -> Option<&str> {
    self.names.get(&index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl<S: Into<String>> FromIterator<(i32, S)> for ClassNameTable {
  fn from_iter<T: IntoIterator<Item = (i32, S)>>(iter: T) -> Self {
    let mut names = HashMap::new();
    for (index, name) in iter {
      names.entry(index).or_insert_with(|| name.into());
    }
    Self { names }
  }
}
