use crate::api::{decode_envelope, ApiClient, CREATE_GROUP_PATH, GROUPS_PATH, OWNERS_MINE_PATH, PAGE_SIZE};
use crate::error::ApiError;
use crate::schema::{CreateGroupBody, GroupRecord, OwnerData, TagList};
use crate::types::PROVENANCE_TAG;
use std::collections::BTreeMap;
use thiserror::Error;

pub const CREATE_GROUP_VALUE: &str = "create_group";
pub const DEFAULT_GROUP_TYPE: &str = "Incident";

// Document, Report and Signature need extra fields and are not offered.
pub const SUPPORTED_GROUP_TYPES: [&str; 14] = [
  "Adversary",
  "Attack Pattern",
  "Campaign",
  "Course of Action",
  "Email",
  "Event",
  "Incident",
  "Intrusion Set",
  "Malware",
  "Tactic",
  "Task",
  "Threat",
  "Tool",
  "Vulnerability",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupRef {
  Existing(String),
  Create { name: String, kind: String },
}

impl GroupRef {
  pub fn from_params(group_name: &str, new_group_name: &str, new_group_type: &str) -> Self {
    if group_name != CREATE_GROUP_VALUE {
      return Self::Existing(group_name.to_string());
    }
    let kind = match new_group_type.trim() {
      "" => DEFAULT_GROUP_TYPE,
      k => k,
    };
    Self::Create {
      name: new_group_name.trim().to_string(),
      kind: kind.to_string(),
    }
  }
}

pub fn is_supported_group_type(kind: &str) -> bool {
  SUPPORTED_GROUP_TYPES.contains(&kind)
}

#[derive(Debug, Error)]
pub enum GroupError {
  #[error(transparent)]
  Api(#[from] ApiError),

  #[error("error while fetching owner information: {0}")]
  Owner(String),

  #[error("error while fetching group details: {0}")]
  Listing(String),

  #[error("error while creating a group: {0}")]
  Create(String),
}

pub struct GroupResolver<'a> {
  api: &'a ApiClient<'a>,
}

impl<'a> GroupResolver<'a> {
  pub fn new(api: &'a ApiClient<'a>) -> Self {
    Self { api }
  }

  pub fn owner_name(&self) -> Result<String, GroupError> {
    let env = self.api.get_envelope::<OwnerData>(OWNERS_MINE_PATH)?;
    if !env.is_success() {
      return Err(GroupError::Owner(env.message().to_string()));
    }
    env
      .data
      .and_then(|d| d.owner)
      .and_then(|o| o.name)
      .filter(|n| !n.is_empty())
      .ok_or_else(|| GroupError::Owner("response carried no owner name".to_string()))
  }

  pub fn group_names(&self) -> Result<BTreeMap<String, String>, GroupError> {
    let owner = self.owner_name()?;
    let tql = format!("ownerName == '{owner}'");
    let mut path = format!(
      "{GROUPS_PATH}?tql={}&resultLimit={PAGE_SIZE}",
      urlencoding::encode(&tql)
    );

    let mut names = BTreeMap::new();
    loop {
      let env = self.api.get_envelope::<Vec<GroupRecord>>(&path)?;
      if !env.is_success() {
        return Err(GroupError::Listing(env.message().to_string()));
      }
      for group in env.data.unwrap_or_default() {
        let (Some(name), Some(id)) = (group.name.clone(), group.id_string()) else {
          continue;
        };
        names.entry(name).or_insert(id);
      }
      match env.next.as_deref().filter(|n| !n.is_empty()) {
        Some(next) => path = self.api.relative_path(next),
        None => return Ok(names),
      }
    }
  }

  // A `Create` ref becomes `Existing` once resolved.
  pub fn resolve(&self, group: &mut GroupRef) -> Result<String, GroupError> {
    let (name, kind) = match group {
      GroupRef::Existing(id) => return Ok(id.clone()),
      GroupRef::Create { name, kind } => (name.clone(), kind.clone()),
    };

    let existing = self.group_names()?;
    let id = match existing.get(&name) {
      Some(id) => {
        tracing::debug!(group = %name, id = %id, "group already exists; reusing it");
        id.clone()
      }
      None => self.create(&name, &kind)?,
    };

    *group = GroupRef::Existing(id.clone());
    Ok(id)
  }

  fn create(&self, name: &str, kind: &str) -> Result<String, GroupError> {
    let body = CreateGroupBody {
      name: name.to_string(),
      kind: kind.to_string(),
      tags: TagList::single(PROVENANCE_TAG),
    };
    let resp = self.api.post_json(CREATE_GROUP_PATH, &body)?;
    let env = decode_envelope::<GroupRecord>(&resp)?;

    let created = env
      .data
      .as_ref()
      .filter(|_| env.is_success())
      .and_then(|g| g.name.as_ref().and(g.id_string()));
    match created {
      Some(id) => {
        tracing::info!(group = %name, kind = %kind, id = %id, "created group");
        Ok(id)
      }
      None => Err(GroupError::Create(env.message().to_string())),
    }
  }
}
