//! Core types: inbound alert blobs, normalized alerts, Argus incidents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

// ---------------------------------------------------------------------------
// Inbound types (JSON contract: what NAV's event engine and API emit)
// ---------------------------------------------------------------------------

/// One alert blob as emitted by the event engine. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundAlert {
  #[serde(default)]
  pub history: Option<u64>,
  #[serde(default)]
  pub state: Option<String>,
  #[serde(default)]
  pub netbox: Option<u64>,
  #[serde(default)]
  pub subject_type: Option<String>,
  #[serde(default)]
  pub subid: Option<serde_json::Value>,
  #[serde(default)]
  pub subject: Option<String>,
  #[serde(default)]
  pub subject_url: Option<String>,
  #[serde(default)]
  pub severity: Option<serde_json::Value>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub time: Option<String>,
  #[serde(default)]
  pub event_type: Option<NamedRef>,
  #[serde(default)]
  pub alert_type: Option<NamedRef>,
  #[serde(default)]
  pub room: Option<serde_json::Value>,
  #[serde(default)]
  pub location: Option<serde_json::Value>,
  #[serde(default)]
  pub organization: Option<serde_json::Value>,
  #[serde(default)]
  pub on_maintenance: Option<bool>,
  #[serde(default)]
  pub alert_details_url: Option<String>,
  #[serde(default)]
  pub event_history_url: Option<String>,
  #[serde(default)]
  pub tags: BTreeMap<String, serde_json::Value>,
}

/// NAV serializes event and alert types either as a bare id or as a nested object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NamedRef {
  Plain(String),
  Object {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
  },
}

impl NamedRef {
  pub fn id(&self) -> Option<&str> {
    match self {
      Self::Plain(s) => Some(s),
      Self::Object { id, name } => id.as_deref().or(name.as_deref()),
    }
  }

  pub fn name(&self) -> Option<&str> {
    match self {
      Self::Plain(s) => Some(s),
      Self::Object { id, name } => name.as_deref().or(id.as_deref()),
    }
  }
}

// ---------------------------------------------------------------------------
// Normalized alert
// ---------------------------------------------------------------------------

/// NAV alert history id. Shared by the start and end event of one alert, and
/// used verbatim as Argus' `source_incident_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(pub u64);

impl AlertId {
  pub fn source_incident_id(self) -> String {
    self.0.to_string()
  }
}

impl fmt::Display for AlertId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertState {
  /// Stateful alert became active.
  #[serde(rename = "s")]
  Start,
  /// Stateful alert was resolved.
  #[serde(rename = "e")]
  End,
  /// Momentary event without a separate resolution.
  #[serde(rename = "x")]
  Stateless,
}

impl AlertState {
  pub fn from_code(code: &str) -> Option<Self> {
    match code {
      "s" => Some(Self::Start),
      "e" => Some(Self::End),
      "x" => Some(Self::Stateless),
      _ => None,
    }
  }
}

/// Identity of the monitored object an alert concerns, e.g. `netbox:12`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectKey(pub String);

impl fmt::Display for SubjectKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
  pub key: SubjectKey,
  /// NAV model name of the subject (`Netbox`, `Interface`, ...).
  pub kind: Option<String>,
  /// Human readable subject, e.g. a sysname or an interface name.
  pub name: Option<String>,
  pub url: Option<String>,
}

/// Canonical internal alert after decoding + validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
  pub id: AlertId,
  pub state: AlertState,
  pub subject: Subject,
  /// NAV severity, if present and numeric.
  pub severity: Option<i64>,
  pub message: String,
  pub time: DateTime<Utc>,
  pub event_type: Option<String>,
  pub alert_type: Option<String>,
  /// Where the subject's netbox lives, when the blob says so.
  pub room: Option<String>,
  pub location: Option<String>,
  pub organization: Option<String>,
  pub on_maintenance: bool,
  pub details_url: Option<String>,
  /// Extra tags carried by the blob itself.
  pub tags: BTreeMap<String, String>,
}

/// NAV's record of a single alert, looked up when its incident has to be
/// closed without an end event from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
  pub id: AlertId,
  /// `None` while NAV still considers the alert open.
  pub end_time: Option<DateTime<Utc>>,
  pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

pub const MAINTENANCE_EVENT: &str = "maintenanceState";

/// Subjects currently under maintenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSet(HashSet<SubjectKey>);

impl MaintenanceSet {
  /// NAV keeps a `maintenanceState` alert active for every subject on maintenance.
  pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a Alert>) -> Self {
    alerts
      .into_iter()
      .filter(|a| a.event_type.as_deref() == Some(MAINTENANCE_EVENT) || a.on_maintenance)
      .map(|a| a.subject.key.clone())
      .collect()
  }

  pub fn contains(&self, key: &SubjectKey) -> bool {
    self.0.contains(key)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<SubjectKey> for MaintenanceSet {
  fn from_iter<I: IntoIterator<Item = SubjectKey>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

// ---------------------------------------------------------------------------
// Argus incidents
// ---------------------------------------------------------------------------

/// Argus encodes an open stateful incident with this end time.
pub const INFINITY: &str = "infinity";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EndTime {
  /// Stateful and still open.
  Open,
  /// Stateless incident (`end_time: null`); can never be resolved.
  #[default]
  Stateless,
  Resolved(DateTime<Utc>),
}

/// An incident as returned by Argus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Incident {
  pub pk: u64,
  pub source_incident_id: String,
  #[serde(default)]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, with = "end_time")]
  pub end_time: EndTime,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub level: Option<u8>,
}

impl Incident {
  /// The NAV alert this incident mirrors, if its source id is one of ours.
  pub fn alert_id(&self) -> Option<AlertId> {
    self.source_incident_id.trim().parse().ok().map(AlertId)
  }

  pub fn is_open(&self) -> bool {
    self.end_time == EndTime::Open
  }
}

/// Payload for creating an incident.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewIncident {
  pub start_time: DateTime<Utc>,
  #[serde(with = "end_time")]
  pub end_time: EndTime,
  pub source_incident_id: String,
  pub details_url: String,
  pub description: String,
  pub level: u8,
  #[serde(serialize_with = "serialize_tags")]
  pub tags: BTreeMap<String, String>,
}

/// How an open incident gets closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
  pub timestamp: DateTime<Utc>,
  pub description: String,
}

/// Argus wants tags as `[{"tag": "key=value"}, ...]`.
fn serialize_tags<S: Serializer>(tags: &BTreeMap<String, String>, s: S) -> Result<S::Ok, S::Error> {
  #[derive(Serialize)]
  struct TagEntry {
    tag: String,
  }

  s.collect_seq(tags.iter().map(|(k, v)| TagEntry {
    tag: format!("{}={}", k, v),
  }))
}

mod end_time {
  use super::{EndTime, INFINITY};
  use chrono::{DateTime, Utc};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &EndTime, s: S) -> Result<S::Ok, S::Error> {
    match value {
      EndTime::Open => s.serialize_str(INFINITY),
      EndTime::Stateless => s.serialize_none(),
      EndTime::Resolved(ts) => s.serialize_str(&ts.to_rfc3339()),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<EndTime, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref() {
      None => Ok(EndTime::Stateless),
      Some(INFINITY) => Ok(EndTime::Open),
      Some(ts) => DateTime::parse_from_rfc3339(ts)
        .map(|t| EndTime::Resolved(t.with_timezone(&Utc)))
        .map_err(serde::de::Error::custom),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn incident_end_time_variants() {
    let open: Incident =
      serde_json::from_str(r#"{"pk": 1, "source_incident_id": "42", "end_time": "infinity"}"#).unwrap();
    assert!(open.is_open());
    assert_eq!(open.alert_id(), Some(AlertId(42)));

    let stateless: Incident =
      serde_json::from_str(r#"{"pk": 2, "source_incident_id": "43", "end_time": null}"#).unwrap();
    assert_eq!(stateless.end_time, EndTime::Stateless);

    let closed: Incident = serde_json::from_str(
      r#"{"pk": 3, "source_incident_id": "x-1", "end_time": "2021-03-01T12:00:00+00:00"}"#,
    )
    .unwrap();
    assert!(matches!(closed.end_time, EndTime::Resolved(_)));
    assert_eq!(closed.alert_id(), None);
  }

  #[test]
  fn new_incident_serializes_argus_tags() {
    let mut tags = BTreeMap::new();
    tags.insert("host".to_string(), "gw1".to_string());
    tags.insert("event_type".to_string(), "boxState".to_string());
    let incident = NewIncident {
      start_time: DateTime::parse_from_rfc3339("2021-03-01T12:00:00Z").unwrap().with_timezone(&Utc),
      end_time: EndTime::Open,
      source_incident_id: "42".into(),
      details_url: String::new(),
      description: "box down".into(),
      level: 2,
      tags,
    };
    let json = serde_json::to_value(&incident).unwrap();
    assert_eq!(json["end_time"], "infinity");
    assert_eq!(json["tags"][0]["tag"], "event_type=boxState");
    assert_eq!(json["tags"][1]["tag"], "host=gw1");
  }

  #[test]
  fn named_ref_accepts_both_shapes() {
    let plain: NamedRef = serde_json::from_str(r#""boxState""#).unwrap();
    assert_eq!(plain.id(), Some("boxState"));
    let nested: NamedRef = serde_json::from_str(r#"{"name": "boxDown", "description": "x"}"#).unwrap();
    assert_eq!(nested.name(), Some("boxDown"));
  }
}
