use serde::{Deserialize, Deserializer, Serialize};

pub const STATUS_SUCCESS: &str = "Success";

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
  #[serde(default)]
  pub status: String,
  #[serde(default)]
  pub message: Option<String>,
  pub data: Option<T>,
  #[serde(default)]
  pub next: Option<String>,
}

impl<T> Envelope<T> {
  pub fn is_success(&self) -> bool {
    self.status == STATUS_SUCCESS
  }

  pub fn message(&self) -> &str {
    self.message.as_deref().unwrap_or("")
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
  #[serde(rename = "type", default)]
  pub record_kind: String,
  #[serde(default)]
  pub md5: Option<String>,
  #[serde(default)]
  pub sha256: Option<String>,
  #[serde(default)]
  pub text: Option<String>,
  #[serde(default)]
  pub active: Option<bool>,
  #[serde(default)]
  pub rating: Option<f64>,
  // Outer `None`: key absent. `Some(None)`: key present but null.
  #[serde(default, deserialize_with = "present")]
  pub confidence: Option<Option<i64>>,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub date_added: Option<String>,
  #[serde(default)]
  pub last_modified: Option<String>,
  #[serde(default)]
  pub tags: Option<TagList>,
}

impl RawRecord {
  pub fn is_file(&self) -> bool {
    self.record_kind == "File"
  }

  pub fn tag_names(&self) -> impl Iterator<Item = &str> {
    self
      .tags
      .iter()
      .flat_map(|t| t.data.iter())
      .filter_map(|t| t.name.as_deref())
  }
}

fn present<'de, D>(d: D) -> Result<Option<Option<i64>>, D::Error>
where
  D: Deserializer<'de>,
{
  Option::<i64>::deserialize(d).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TagList {
  #[serde(default)]
  pub data: Vec<TagRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRef {
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupRecord {
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(rename = "type", default)]
  pub kind: Option<String>,
}

impl GroupRecord {
  pub fn id_string(&self) -> Option<String> {
    id_to_string(self.id.as_ref()?)
  }
}

pub fn id_to_string(v: &serde_json::Value) -> Option<String> {
  match v {
    serde_json::Value::Number(n) => Some(n.to_string()),
    serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
    _ => None,
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerData {
  #[serde(default)]
  pub owner: Option<Owner>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
  #[serde(default)]
  pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndicatorBody {
  #[serde(rename = "type")]
  pub kind: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub text: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub md5: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  pub associated_groups: GroupAssociation,
  pub tags: TagList,
  pub rating: u8,
  pub confidence: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupAssociation {
  pub data: Vec<GroupIdRef>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mode: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupIdRef {
  pub id: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIndicatorBody {
  pub associated_groups: GroupAssociation,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateGroupBody {
  pub name: String,
  #[serde(rename = "type")]
  pub kind: String,
  pub tags: TagList,
}

impl TagList {
  pub fn single(name: &str) -> Self {
    Self {
      data: vec![TagRef {
        name: Some(name.to_string()),
      }],
    }
  }
}
