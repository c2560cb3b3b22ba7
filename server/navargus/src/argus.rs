//! [`IncidentStore`] backed by the Argus REST API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::http::ApiClient;
use crate::store::IncidentStore;
use crate::types::{AlertId, Incident, NewIncident, Resolution};

const MY_INCIDENTS: &str = "incidents/mine/";

#[derive(Debug, Serialize)]
struct EndEvent<'a> {
  timestamp: DateTime<Utc>,
  #[serde(rename = "type")]
  kind: &'static str,
  description: &'a str,
}

pub struct ArgusClient {
  api: ApiClient,
}

impl ArgusClient {
  pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
    Ok(Self {
      api: ApiClient::new(base_url, token, timeout)?,
    })
  }

  pub fn base_url(&self) -> &str {
    self.api.base_url()
  }

  /// Cheapest authenticated call there is: peek at the first open incident.
  pub fn test_access(&self) -> Result<(), StoreError> {
    self.api.get_first::<Value>(MY_INCIDENTS, &[("open", "true")])?;
    Ok(())
  }
}

impl IncidentStore for ArgusClient {
  fn find_incident(&self, alert: AlertId, open_only: bool) -> Result<Option<Incident>, StoreError> {
    let id = alert.source_incident_id();
    let mut query = vec![("source_incident_id", id.as_str())];
    if open_only {
      query.push(("open", "true"));
    }
    self.api.get_first(MY_INCIDENTS, &query)
  }

  fn create_incident(&self, incident: &NewIncident) -> Result<Incident, StoreError> {
    self.api.post("incidents/", incident)
  }

  fn resolve_incident(&self, incident: &Incident, resolution: &Resolution) -> Result<(), StoreError> {
    let event = EndEvent {
      timestamp: resolution.timestamp,
      kind: "END",
      description: &resolution.description,
    };
    self
      .api
      .post::<_, Value>(&format!("incidents/{}/events/", incident.pk), &event)?;
    Ok(())
  }

  fn open_incidents(&self) -> Result<Vec<Incident>, StoreError> {
    self.api.get_all(MY_INCIDENTS, &[("open", "true")])
  }
}
