//! [`AlertSource`] backed by the NAV REST API.
//!
//! `GET /alert/` lists the alerts NAV currently holds open. Subjects on
//! maintenance show up there too, as `maintenanceState` alerts or alerts
//! flagged `on_maintenance`. Entries are alert history records: `id` is the
//! alert history id and `start_time` the start, not the `history` and `time`
//! of the event engine's blobs.

use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::decode;
use crate::error::{DecodeError, StoreError};
use crate::http::ApiClient;
use crate::store::AlertSource;
use crate::types::{Alert, AlertId, AlertRecord, MaintenanceSet, INFINITY};

const ALERTS: &str = "alert/";

pub struct NavClient {
  api: ApiClient,
}

impl NavClient {
  pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
    Ok(Self {
      api: ApiClient::new(base_url, token, timeout)?,
    })
  }

  pub fn base_url(&self) -> &str {
    self.api.base_url()
  }
}

fn copy_missing(obj: &mut Map<String, Value>, from: &str, to: &str) {
  if obj.get(to).map_or(true, Value::is_null) {
    if let Some(value) = obj.get(from).cloned() {
      obj.insert(to.to_string(), value);
    }
  }
}

/// Listed alerts are active by definition, so the API omits `state`. A
/// `null` end time marks a stateless alert.
fn decode_listed(mut value: Value) -> Option<Alert> {
  if let Some(obj) = value.as_object_mut() {
    copy_missing(obj, "id", "history");
    copy_missing(obj, "start_time", "time");
    let state = match obj.get("end_time") {
      Some(Value::Null) => "x",
      _ => "s",
    };
    obj.entry("state").or_insert_with(|| Value::from(state));
  }
  let listed_id = value.get("id").cloned();
  match decode::decode_value(value) {
    Ok(alert) => Some(alert),
    Err(e) => {
      warn!(id = ?listed_id, error = %e, "Skipping undecodable NAV alert");
      None
    }
  }
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
  id: u64,
  #[serde(default)]
  end_time: Option<String>,
  #[serde(default)]
  message: Option<String>,
}

/// NAV marks open alerts with `infinity` or a year-9999 sentinel.
fn end_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, DecodeError> {
  match raw {
    None | Some(INFINITY) => Ok(None),
    Some(t) => {
      let t = decode::parse_time(t).map_err(|e| DecodeError::invalid("end_time", &e.to_string()))?;
      Ok((t.year() < 9999).then_some(t))
    }
  }
}

fn decode_record(value: Value) -> Result<AlertRecord, DecodeError> {
  let raw: ListedRecord = serde_json::from_value(value)?;
  Ok(AlertRecord {
    id: AlertId(raw.id),
    end_time: end_time(raw.end_time.as_deref())?,
    message: raw.message,
  })
}

impl AlertSource for NavClient {
  fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
    let listed: Vec<Value> = self.api.get_all(ALERTS, &[])?;
    let total = listed.len();
    let alerts: Vec<Alert> = listed.into_iter().filter_map(decode_listed).collect();
    // An empty result here would make a resync close every open incident.
    if total > 0 && alerts.is_empty() {
      return Err(StoreError::malformed(
        ALERTS,
        format!("none of the {} listed alerts could be decoded", total),
      ));
    }
    Ok(alerts)
  }

  fn maintenance(&self) -> Result<MaintenanceSet, StoreError> {
    Ok(MaintenanceSet::from_alerts(&self.active_alerts()?))
  }

  fn alert(&self, id: AlertId) -> Result<Option<AlertRecord>, StoreError> {
    let endpoint = format!("{}{}/", ALERTS, id);
    match self.api.get_one::<Value>(&endpoint)? {
      Some(value) => decode_record(value)
        .map(Some)
        .map_err(|e| StoreError::malformed(&endpoint, e.to_string())),
      None => Ok(None),
    }
  }
}
