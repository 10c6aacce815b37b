use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::{TransportError, TransportErrorKind};
use crate::tags::{Tag, TagStore, TagStoreError};
use crate::transport::{HttpRequest, HttpResponse, Sleeper, Transport};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

pub struct ScriptedTransport {
  script: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
  requests: RefCell<Vec<HttpRequest>>,
}

impl ScriptedTransport {
  pub fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
    Self {
      script: RefCell::new(script.into()),
      requests: RefCell::new(Vec::new()),
    }
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.borrow().clone()
  }

  pub fn remaining(&self) -> usize {
    self.script.borrow().len()
  }
}

impl Transport for ScriptedTransport {
  fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
    self.requests.borrow_mut().push(req.clone());
    self
      .script
      .borrow_mut()
      .pop_front()
      .unwrap_or_else(|| panic!("unexpected request: {} {}", req.method.as_str(), req.url))
  }
}

pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
  HttpResponse {
    status,
    body: serde_json::to_vec(&body).unwrap(),
  }
}

pub fn connect_error() -> TransportError {
  TransportError::new(TransportErrorKind::Connect, "connection refused")
}

#[derive(Default)]
pub struct RecordingSleeper {
  sleeps: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
  pub fn sleeps(&self) -> Vec<Duration> {
    self.sleeps.borrow().clone()
  }
}

impl Sleeper for RecordingSleeper {
  fn sleep(&self, d: Duration) {
    self.sleeps.borrow_mut().push(d);
  }
}

#[derive(Default)]
pub struct MemoryTagStore {
  names: RefCell<BTreeSet<String>>,
  fail_on: BTreeSet<String>,
}

impl MemoryTagStore {
  pub fn with_existing(names: &[&str]) -> Self {
    Self {
      names: RefCell::new(names.iter().map(|s| s.to_string()).collect()),
      fail_on: BTreeSet::new(),
    }
  }

  pub fn failing_on(mut self, name: &str) -> Self {
    self.fail_on.insert(name.to_string());
    self
  }

  pub fn names(&self) -> Vec<String> {
    self.names.borrow().iter().cloned().collect()
  }
}

impl TagStore for MemoryTagStore {
  fn exists(&self, name: &str) -> bool {
    self.names.borrow().contains(name)
  }

  fn create(&self, tag: Tag) -> Result<(), TagStoreError> {
    if self.fail_on.contains(tag.name()) {
      return Err(TagStoreError::Io(format!("cannot create {}", tag.name())));
    }
    self.names.borrow_mut().insert(tag.name().to_string());
    Ok(())
  }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
  slot: RefCell<Option<Checkpoint>>,
  saves: Cell<usize>,
}

impl MemoryCheckpointStore {
  // Seeded state does not count as a save.
  pub fn seeded(cp: Checkpoint) -> Self {
    Self {
      slot: RefCell::new(Some(cp)),
      saves: Cell::new(0),
    }
  }

  pub fn get(&self) -> Option<Checkpoint> {
    self.slot.borrow().clone()
  }

  pub fn saves(&self) -> usize {
    self.saves.get()
  }
}

impl CheckpointStore for MemoryCheckpointStore {
  fn load(&self) -> anyhow::Result<Option<Checkpoint>> {
    Ok(self.slot.borrow().clone())
  }

  fn save(&self, cp: &Checkpoint) -> anyhow::Result<()> {
    *self.slot.borrow_mut() = Some(cp.clone());
    self.saves.set(self.saves.get() + 1);
    Ok(())
  }

  fn clear(&self) -> anyhow::Result<()> {
    *self.slot.borrow_mut() = None;
    Ok(())
  }
}
