//! Decode raw alert records into canonical [`Alert`] values.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::DecodeError;
use crate::types::*;

/// Parse one framed record.
pub fn decode(record: &[u8]) -> Result<Alert, DecodeError> {
  let raw: InboundAlert = serde_json::from_slice(record)?;
  normalize(raw)
}

/// Decode an alert that arrived as an already parsed JSON value (NAV API listings).
pub fn decode_value(value: Value) -> Result<Alert, DecodeError> {
  let raw: InboundAlert = serde_json::from_value(value)?;
  normalize(raw)
}

/// Validate and normalize an inbound blob.
pub fn normalize(raw: InboundAlert) -> Result<Alert, DecodeError> {
  let id = match raw.history {
    Some(id) if id > 0 => AlertId(id),
    _ => return Err(DecodeError::MissingField("history")),
  };

  let state = raw.state.as_deref().ok_or(DecodeError::MissingField("state"))?;
  let state = AlertState::from_code(state)
    .ok_or_else(|| DecodeError::invalid("state", &format!("expected s|e|x, got {:?}", state)))?;

  let time = match raw.time.as_deref() {
    Some(t) => parse_time(t)?,
    None => Utc::now(),
  };

  let subid = raw.subid.as_ref().and_then(scalar_string);
  let key = match (raw.netbox, raw.subject_type.as_deref(), subid.as_deref()) {
    (Some(netbox), _, _) => format!("netbox:{}", netbox),
    (None, Some(kind), Some(subid)) => format!("{}:{}", kind, subid),
    _ => format!("alert:{}", id),
  };

  let tags = raw
    .tags
    .iter()
    .filter_map(|(k, v)| scalar_string(v).map(|v| (k.clone(), v)))
    .collect();

  Ok(Alert {
    id,
    state,
    subject: Subject {
      key: SubjectKey(key),
      kind: raw.subject_type,
      name: raw.subject,
      url: raw.subject_url,
    },
    severity: raw.severity.as_ref().and_then(severity_number),
    message: raw.message.unwrap_or_default(),
    time,
    event_type: raw.event_type.as_ref().and_then(NamedRef::id).map(str::to_string),
    alert_type: raw.alert_type.as_ref().and_then(NamedRef::name).map(str::to_string),
    room: raw.room.as_ref().and_then(reference_id),
    location: raw.location.as_ref().and_then(reference_id),
    organization: raw.organization.as_ref().and_then(reference_id),
    on_maintenance: raw.on_maintenance.unwrap_or(false),
    details_url: raw.alert_details_url.or(raw.event_history_url),
    tags,
  })
}

/// NAV emits either RFC 3339 or naive local timestamps.
pub(crate) fn parse_time(s: &str) -> Result<DateTime<Utc>, DecodeError> {
  if let Ok(t) = DateTime::parse_from_rfc3339(s) {
    return Ok(t.with_timezone(&Utc));
  }
  let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
    .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
    .map_err(|e| DecodeError::invalid("time", &format!("{:?}: {}", s, e)))?;
  Local
    .from_local_datetime(&naive)
    .earliest()
    .map(|t| t.with_timezone(&Utc))
    .ok_or_else(|| DecodeError::invalid("time", &format!("{:?} does not exist locally", s)))
}

fn severity_number(v: &Value) -> Option<i64> {
  match v {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Rooms, locations and organizations come as a bare id or as `{"id": ...}`.
fn reference_id(v: &Value) -> Option<String> {
  match v {
    Value::Object(obj) => obj.get("id").and_then(scalar_string),
    other => scalar_string(other),
  }
}

fn scalar_string(v: &Value) -> Option<String> {
  match v {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const BOX_DOWN: &str = r#"{
    "id": 1203,
    "history": 4711,
    "state": "s",
    "netbox": 12,
    "subject_type": "Netbox",
    "subject": "gw1.example.org",
    "subject_url": "/ipdevinfo/gw1.example.org/",
    "severity": 2,
    "message": "gw1.example.org is down",
    "time": "2021-03-01T12:00:00+01:00",
    "event_type": {"id": "boxState", "description": "Tells us whether a network-unit is down or up."},
    "alert_type": {"name": "boxDown", "description": "Box declared down."},
    "on_maintenance": false,
    "alert_details_url": "/api/alert/4711/",
    "acknowledgement": null,
    "device_groups": ["core"]
  }"#;

  #[test]
  fn decodes_event_engine_blob() {
    let alert = decode(BOX_DOWN.as_bytes()).unwrap();
    assert_eq!(alert.id, AlertId(4711));
    assert_eq!(alert.state, AlertState::Start);
    assert_eq!(alert.subject.key, SubjectKey("netbox:12".into()));
    assert_eq!(alert.subject.name.as_deref(), Some("gw1.example.org"));
    assert_eq!(alert.severity, Some(2));
    assert_eq!(alert.event_type.as_deref(), Some("boxState"));
    assert_eq!(alert.alert_type.as_deref(), Some("boxDown"));
    assert_eq!(alert.details_url.as_deref(), Some("/api/alert/4711/"));
    assert_eq!(alert.time.to_rfc3339(), "2021-03-01T11:00:00+00:00");
  }

  #[test]
  fn empty_blob_has_no_history() {
    let err = decode(b"{}").unwrap_err();
    assert!(matches!(err, DecodeError::MissingField("history")));
  }

  #[test]
  fn missing_state_is_rejected() {
    let err = decode(br#"{"history": 3}"#).unwrap_err();
    assert!(matches!(err, DecodeError::MissingField("state")));
  }

  #[test]
  fn unknown_state_is_rejected() {
    let err = decode(br#"{"history": 3, "state": "q"}"#).unwrap_err();
    assert!(err.to_string().contains("state"));
  }

  #[test]
  fn bad_time_is_rejected() {
    let err = decode(br#"{"history": 3, "state": "e", "time": "yesterday"}"#).unwrap_err();
    assert!(err.to_string().contains("time"));
  }

  #[test]
  fn naive_time_is_accepted() {
    assert!(decode(br#"{"history": 3, "state": "e", "time": "2021-03-01T12:00:00.123456"}"#).is_ok());
  }

  #[test]
  fn subject_key_falls_back_to_subid_then_alert() {
    let alert = decode(br#"{"history": 5, "state": "x", "subject_type": "Interface", "subid": 831}"#).unwrap();
    assert_eq!(alert.subject.key, SubjectKey("Interface:831".into()));
    let alert = decode(br#"{"history": 6, "state": "x"}"#).unwrap();
    assert_eq!(alert.subject.key, SubjectKey("alert:6".into()));
  }

  #[test]
  fn odd_severity_is_unmapped_not_fatal() {
    let alert = decode(br#"{"history": 5, "state": "s", "severity": "high"}"#).unwrap();
    assert_eq!(alert.severity, None);
    let alert = decode(br#"{"history": 5, "state": "s", "severity": "4"}"#).unwrap();
    assert_eq!(alert.severity, Some(4));
  }

  #[test]
  fn netbox_placement_accepts_ids_and_objects() {
    let alert = decode(
      br#"{"history": 5, "state": "s", "netbox": 1, "room": "serverroom-1",
           "location": {"id": "oslo", "description": "Oslo"}, "organization": 4}"#,
    )
    .unwrap();
    assert_eq!(alert.room.as_deref(), Some("serverroom-1"));
    assert_eq!(alert.location.as_deref(), Some("oslo"));
    assert_eq!(alert.organization.as_deref(), Some("4"));
    assert_eq!(decode(BOX_DOWN.as_bytes()).unwrap().room, None);
  }

  #[test]
  fn blob_tags_are_kept_as_strings() {
    let alert = decode(br#"{"history": 5, "state": "s", "tags": {"service": "other", "rack": 4, "x": [1]}}"#).unwrap();
    assert_eq!(alert.tags["service"], "other");
    assert_eq!(alert.tags["rack"], "4");
    assert!(!alert.tags.contains_key("x"));
  }
}
