use crate::paths;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const MAX_TAG_NAME_LEN: usize = 50;
pub const DEFAULT_TAG_COLOR: &str = "#ED3347";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagStoreError {
  #[error("tag name is empty")]
  Empty,

  #[error("tag name exceeds {MAX_TAG_NAME_LEN} characters")]
  TooLong,

  #[error("tag store: {0}")]
  Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
  name: String,
  color: String,
}

impl Tag {
  pub fn new(name: &str, color: &str) -> Result<Self, TagStoreError> {
    let name = name.trim();
    if name.is_empty() {
      return Err(TagStoreError::Empty);
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
      return Err(TagStoreError::TooLong);
    }
    Ok(Self {
      name: name.to_string(),
      color: color.to_string(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

pub trait TagStore {
  fn exists(&self, name: &str) -> bool;
  fn create(&self, tag: Tag) -> Result<(), TagStoreError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
  pub accepted: Vec<String>,
  pub skipped: Vec<String>,
}

pub fn reconcile<'n>(
  store: &dyn TagStore,
  candidates: impl IntoIterator<Item = &'n str>,
  enabled: bool,
) -> Reconciled {
  let mut out = Reconciled::default();
  if !enabled {
    return out;
  }

  for raw in candidates {
    let name = raw.trim();
    if out.accepted.iter().any(|n| n == name) || out.skipped.iter().any(|n| n == raw) {
      continue;
    }
    if store.exists(name) {
      out.accepted.push(name.to_string());
      continue;
    }
    match Tag::new(name, DEFAULT_TAG_COLOR).and_then(|tag| store.create(tag)) {
      Ok(()) => out.accepted.push(name.to_string()),
      Err(e) => {
        tracing::debug!(tag = %raw, reason = %e, "tag not created");
        out.skipped.push(raw.to_string());
      }
    }
  }

  out
}

pub struct FileTagStore {
  path: PathBuf,
  tags: RefCell<BTreeMap<String, Tag>>,
}

impl FileTagStore {
  pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
    let path = path.into();
    let tags = if path.exists() {
      let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
      let list: Vec<Tag> = serde_json::from_slice(&bytes)
        .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))?;
      list.into_iter().map(|t| (t.name.clone(), t)).collect()
    } else {
      BTreeMap::new()
    };
    Ok(Self {
      path,
      tags: RefCell::new(tags),
    })
  }

  fn persist(&self) -> anyhow::Result<()> {
    let list: Vec<Tag> = self.tags.borrow().values().cloned().collect();
    paths::write_atomic(&self.path, &serde_json::to_vec_pretty(&list)?)
  }
}

impl TagStore for FileTagStore {
  fn exists(&self, name: &str) -> bool {
    self.tags.borrow().contains_key(name)
  }

  fn create(&self, tag: Tag) -> Result<(), TagStoreError> {
    let previous = self.tags.borrow_mut().insert(tag.name.clone(), tag.clone());
    if let Err(e) = self.persist() {
      let mut tags = self.tags.borrow_mut();
      match previous {
        Some(p) => tags.insert(p.name.clone(), p),
        None => tags.remove(&tag.name),
      };
      return Err(TagStoreError::Io(e.to_string()));
    }
    Ok(())
  }
}
