//! Turn alerts into Argus incident payloads: level, tags, description.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::config::{Policy, TagConfig};
use crate::types::*;

/// Argus levels run 1 (critical) to 5 (informational), same scale as NAV
/// severities. Anything else falls back to the configured default.
pub fn level_for(severity: Option<i64>, default_level: u8) -> u8 {
  match severity {
    Some(s @ 1..=5) => s as u8,
    _ => default_level,
  }
}

/// Tags describing the alert itself.
pub fn derived_tags(alert: &Alert) -> BTreeMap<String, String> {
  let mut tags = alert.tags.clone();
  if let Some(event_type) = &alert.event_type {
    tags.insert("event_type".into(), event_type.clone());
  }
  if let Some(alert_type) = &alert.alert_type {
    tags.insert("alert_type".into(), alert_type.clone());
  }
  let subject = &alert.subject;
  match (subject.kind.as_deref(), subject.name.as_deref()) {
    (Some("Netbox"), Some(name)) => {
      tags.insert("host".into(), name.to_string());
      if let Some(url) = &subject.url {
        tags.insert("host_url".into(), url.clone());
      }
    }
    (Some("Interface"), Some(name)) => {
      tags.insert("interface".into(), name.to_string());
    }
    _ => {}
  }
  for (key, value) in [
    ("room", &alert.room),
    ("location", &alert.location),
    ("organization", &alert.organization),
  ] {
    if let Some(value) = value {
      tags.insert(key.into(), value.clone());
    }
  }
  tags
}

/// Merge configured tags into alert tags. Configuration wins on conflicts
/// unless `alert-overrides` is set.
pub fn merge_tags(derived: BTreeMap<String, String>, config: &TagConfig) -> BTreeMap<String, String> {
  if config.alert_overrides {
    let mut tags = config.always_add.clone();
    tags.extend(derived);
    tags
  } else {
    let mut tags = derived;
    tags.extend(config.always_add.clone());
    tags
  }
}

/// Build the create payload for an active or stateless alert.
pub fn build(alert: &Alert, policy: &Policy) -> NewIncident {
  NewIncident {
    start_time: alert.time,
    end_time: match alert.state {
      AlertState::Stateless => EndTime::Stateless,
      _ => EndTime::Open,
    },
    source_incident_id: alert.id.source_incident_id(),
    details_url: alert.details_url.clone().unwrap_or_default(),
    description: alert.message.clone(),
    level: level_for(alert.severity, policy.default_level),
    tags: merge_tags(derived_tags(alert), &policy.tags),
  }
}

/// Resolution carried by an end-state alert.
pub fn resolution_of(alert: &Alert) -> Resolution {
  Resolution {
    timestamp: alert.time,
    description: alert.message.clone(),
  }
}

const RESOLVED_IN_NAV: &str = "Alert resolved in NAV";

/// Resolution for an incident whose alert NAV has since closed: NAV's own
/// end time, or now if NAV hasn't stamped one.
pub fn resolution_from(record: &AlertRecord) -> Resolution {
  Resolution {
    timestamp: record.end_time.unwrap_or_else(Utc::now),
    description: record
      .message
      .clone()
      .filter(|m| !m.is_empty())
      .unwrap_or_else(|| RESOLVED_IN_NAV.into()),
  }
}
