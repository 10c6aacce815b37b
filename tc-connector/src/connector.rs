use crate::api::{ApiClient, INDICATORS_PATH, SECURITY_OWNERS_PATH};
use crate::checkpoint::CheckpointStore;
use crate::config::{self, ConnectorConfig};
use crate::error::ApiError;
use crate::groups::{
  is_supported_group_type, GroupError, GroupRef, GroupResolver, CREATE_GROUP_VALUE, DEFAULT_GROUP_TYPE,
  SUPPORTED_GROUP_TYPES,
};
use crate::pull::PullEngine;
use crate::push::{PushEngine, PushResult, PushStats};
use crate::tags::TagStore;
use crate::transport::{Sleeper, Transport};
use crate::types::Indicator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ADD_TO_GROUP: &str = "add_to_group";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
  pub success: bool,
  pub message: String,
}

impl ValidationResult {
  pub fn ok(message: &str) -> Self {
    Self {
      success: true,
      message: message.to_string(),
    }
  }

  pub fn fail(message: impl Into<String>) -> Self {
    Self {
      success: false,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionDescriptor {
  pub label: String,
  pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
  pub value: String,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
}

impl Action {
  pub fn add_to_group(group: &GroupRef) -> Self {
    let mut parameters = BTreeMap::new();
    match group {
      GroupRef::Existing(id) => {
        parameters.insert("group_name".to_string(), id.clone());
      }
      GroupRef::Create { name, kind } => {
        parameters.insert("group_name".to_string(), CREATE_GROUP_VALUE.to_string());
        parameters.insert("new_group_name".to_string(), name.clone());
        parameters.insert("new_group_type".to_string(), kind.clone());
      }
    }
    Self {
      value: ADD_TO_GROUP.to_string(),
      parameters,
    }
  }

  fn param(&self, key: &str) -> &str {
    self.parameters.get(key).map(String::as_str).unwrap_or("")
  }

  pub fn group_ref(&self) -> GroupRef {
    GroupRef::from_params(
      self.param("group_name"),
      self.param("new_group_name"),
      self.param("new_group_type"),
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
  Choice,
  Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
  pub key: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionField {
  pub label: String,
  pub key: String,
  #[serde(rename = "type")]
  pub kind: FieldKind,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub choices: Vec<Choice>,
  pub mandatory: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default: Option<String>,
  pub description: String,
}

pub trait Connector {
  fn validate(&self) -> ValidationResult;

  fn pull(&self, last_run_at: Option<DateTime<Utc>>) -> Result<Vec<Indicator>, ApiError>;

  fn push(&self, indicators: &[Indicator], action: &Action) -> PushResult;

  fn describe_actions(&self) -> Vec<ActionDescriptor>;
}

pub struct ThreatConnectConnector<'a> {
  cfg: &'a ConnectorConfig,
  transport: &'a dyn Transport,
  sleeper: &'a dyn Sleeper,
  checkpoints: &'a dyn CheckpointStore,
  tags: &'a dyn TagStore,
}

impl<'a> ThreatConnectConnector<'a> {
  pub fn new(
    cfg: &'a ConnectorConfig,
    transport: &'a dyn Transport,
    sleeper: &'a dyn Sleeper,
    checkpoints: &'a dyn CheckpointStore,
    tags: &'a dyn TagStore,
  ) -> Self {
    Self {
      cfg,
      transport,
      sleeper,
      checkpoints,
      tags,
    }
  }

  fn api(&self) -> ApiClient<'a> {
    ApiClient::new(self.transport, self.sleeper, self.cfg)
  }

  fn credentials_accepted(&self) -> bool {
    match self.api().get(SECURITY_OWNERS_PATH) {
      Ok(resp) if resp.is_success() => true,
      Ok(resp) => {
        tracing::error!(status = resp.status, "credential check rejected");
        false
      }
      Err(e) => {
        tracing::error!(error = %e, "credential check failed");
        false
      }
    }
  }

  pub fn action_fields(&self, action: &Action) -> Result<Vec<ActionField>, GroupError> {
    if action.value != ADD_TO_GROUP {
      return Ok(Vec::new());
    }

    let api = self.api();
    let groups = GroupResolver::new(&api).group_names()?;
    let mut group_choices: Vec<Choice> = groups
      .into_iter()
      .map(|(name, id)| Choice { key: name, value: id })
      .collect();
    group_choices.push(Choice {
      key: "Create New Group".to_string(),
      value: CREATE_GROUP_VALUE.to_string(),
    });

    Ok(vec![
      ActionField {
        label: "Add to Existing Group.".to_string(),
        key: "group_name".to_string(),
        kind: FieldKind::Choice,
        choices: group_choices,
        mandatory: true,
        default: None,
        description: "Available groups.".to_string(),
      },
      ActionField {
        label: "Name of New Group (only applicable for Create New Group).".to_string(),
        key: "new_group_name".to_string(),
        kind: FieldKind::Text,
        choices: Vec::new(),
        mandatory: false,
        default: Some(String::new()),
        description: "Name of new group in which you want to add all your IoCs.".to_string(),
      },
      ActionField {
        label: "Type of New Group (only applicable for Create New Group).".to_string(),
        key: "new_group_type".to_string(),
        kind: FieldKind::Choice,
        choices: SUPPORTED_GROUP_TYPES
          .iter()
          .map(|t| Choice {
            key: t.to_string(),
            value: t.to_string(),
          })
          .collect(),
        mandatory: false,
        default: Some(DEFAULT_GROUP_TYPE.to_string()),
        description: "Select group type for new group.".to_string(),
      },
    ])
  }

  pub fn validate_action(&self, action: &Action) -> ValidationResult {
    if action.value != ADD_TO_GROUP {
      return ValidationResult::fail("Invalid Action Provided.");
    }
    if action.param("group_name").trim().is_empty() {
      return ValidationResult::fail("Invalid Group provided.");
    }
    if let GroupRef::Create { name, kind } = action.group_ref() {
      if name.is_empty() {
        return ValidationResult::fail("Invalid Name of New Group provided.");
      }
      if !is_supported_group_type(&kind) {
        return ValidationResult::fail("Invalid Type of New Group provided.");
      }
    }
    ValidationResult::ok("Action configuration validated.")
  }
}

impl Connector for ThreatConnectConnector<'_> {
  fn validate(&self) -> ValidationResult {
    if let Some(msg) = config::validate_connector_config(self.cfg) {
      tracing::error!(error = %msg, "validation error");
      return ValidationResult::fail(msg);
    }
    if !self.credentials_accepted() {
      return ValidationResult::fail("Invalid Access ID or Secret key provided.");
    }
    if let Some(msg) = config::validate_days(self.cfg.days) {
      tracing::error!(error = %msg, "validation error");
      return ValidationResult::fail(msg);
    }
    ValidationResult::ok("Validation successful.")
  }

  fn pull(&self, last_run_at: Option<DateTime<Utc>>) -> Result<Vec<Indicator>, ApiError> {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("pull", %run_id, connector = %self.cfg.name);
    let _enter = span.enter();

    if !self.cfg.is_pull_required {
      tracing::info!("polling is disabled; skipping pull");
      return Ok(Vec::new());
    }

    let api = self.api();
    let engine = PullEngine::new(&api, self.checkpoints, self.tags, self.cfg);
    let outcome = engine.pull(INDICATORS_PATH, self.cfg.threat_type, last_run_at, Utc::now())?;
    tracing::info!(
      indicators = outcome.indicators.len(),
      pages = outcome.pages,
      resumed = outcome.resumed,
      terminal = ?outcome.terminal,
      "pull finished"
    );
    Ok(outcome.indicators)
  }

  fn push(&self, indicators: &[Indicator], action: &Action) -> PushResult {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("push", %run_id, connector = %self.cfg.name);
    let _enter = span.enter();

    let verdict = self.validate_action(action);
    if !verdict.success {
      tracing::error!(error = %verdict.message, "push rejected");
      return PushResult {
        success: false,
        message: verdict.message,
        stats: PushStats::default(),
      };
    }

    tracing::info!(indicators = indicators.len(), "pushing indicators");
    let mut group = action.group_ref();
    let api = self.api();
    PushEngine::new(&api).push(indicators, &mut group)
  }

  fn describe_actions(&self) -> Vec<ActionDescriptor> {
    vec![ActionDescriptor {
      label: "Add to Group".to_string(),
      value: ADD_TO_GROUP.to_string(),
    }]
  }
}
