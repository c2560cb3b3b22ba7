//! Map one alert onto a create / resolve / no-op against Argus.
//!
//! Per alert there are two implicit states, derived from Argus on every call:
//! no incident, or an open incident. The reconciler keeps nothing in memory,
//! so repeating an alert is harmless and a resync can always correct it.

use tracing::{debug, error, info, warn};

use crate::config::Policy;
use crate::error::StoreError;
use crate::incident;
use crate::store::IncidentStore;
use crate::types::*;

/// What a reconciliation step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  Created { pk: u64 },
  Resolved { pk: u64 },
  /// Duplicate start notification; the incident is already open.
  AlreadyOpen { pk: u64 },
  /// Resolve for something Argus has no open incident for.
  NothingToResolve,
  /// Argus already has an incident (possibly closed) for this alert.
  AlreadyExists { pk: u64 },
  /// Stateless incidents have no end and can't be resolved.
  NotResolvable { pk: u64 },
}

pub struct Reconciler<S> {
  store: S,
  policy: Policy,
}

impl<S: IncidentStore> Reconciler<S> {
  pub fn new(store: S, policy: Policy) -> Self {
    Self { store, policy }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn policy(&self) -> &Policy {
    &self.policy
  }

  /// Reconcile one live alert that already passed the filter stage.
  pub fn apply(&self, alert: &Alert) -> Result<Outcome, StoreError> {
    match alert.state {
      AlertState::Start => self.open(alert),
      AlertState::Stateless => self.create(alert),
      AlertState::End => self.close(alert.id, &incident::resolution_of(alert)),
    }
  }

  /// Open an incident for an active alert unless one is already open.
  pub fn open(&self, alert: &Alert) -> Result<Outcome, StoreError> {
    if let Some(existing) = self.store.find_incident(alert.id, true)? {
      debug!(alert_id = %alert.id, incident = existing.pk, "Incident already open");
      return Ok(Outcome::AlreadyOpen { pk: existing.pk });
    }
    self.create(alert)
  }

  /// Open an incident only if Argus has never seen this alert at all.
  pub fn restore(&self, alert: &Alert) -> Result<Outcome, StoreError> {
    if let Some(existing) = self.store.find_incident(alert.id, false)? {
      warn!(
        alert_id = %alert.id,
        incident = existing.pk,
        end_time = ?existing.end_time,
        "Argus incident already exists for this NAV alert, ignoring"
      );
      return Ok(Outcome::AlreadyExists { pk: existing.pk });
    }
    self.create(alert)
  }

  fn create(&self, alert: &Alert) -> Result<Outcome, StoreError> {
    let payload = incident::build(alert, &self.policy);
    let created = self.store.create_incident(&payload)?;
    info!(
      alert_id = %alert.id,
      incident = created.pk,
      level = payload.level,
      stateless = payload.end_time == EndTime::Stateless,
      "Created incident"
    );
    Ok(Outcome::Created { pk: created.pk })
  }

  /// Resolve the open incident mirroring `alert`, if there is one.
  pub fn close(&self, alert: AlertId, resolution: &Resolution) -> Result<Outcome, StoreError> {
    match self.store.find_incident(alert, true)? {
      Some(incident) => self.close_incident(&incident, resolution),
      None => {
        warn!(alert_id = %alert, "Couldn't find corresponding Argus incident to resolve");
        Ok(Outcome::NothingToResolve)
      }
    }
  }

  pub fn close_incident(&self, incident: &Incident, resolution: &Resolution) -> Result<Outcome, StoreError> {
    if incident.end_time == EndTime::Stateless {
      error!(incident = incident.pk, "Cannot resolve a stateless incident");
      return Ok(Outcome::NotResolvable { pk: incident.pk });
    }
    self.store.resolve_incident(incident, resolution)?;
    info!(
      incident = incident.pk,
      source_incident_id = %incident.source_incident_id,
      "Resolved incident"
    );
    Ok(Outcome::Resolved { pk: incident.pk })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TagConfig;
  use crate::decode::decode;
  use crate::store::memory::{Call, MemoryStore};

  fn alert(id: u64, state: &str) -> Alert {
    decode(format!(r#"{{"history": {}, "state": "{}", "message": "m{}", "severity": 2}}"#, id, state, id).as_bytes())
      .unwrap()
  }

  #[test]
  fn duplicate_active_alert_creates_once() {
    let reconciler = Reconciler::new(MemoryStore::default(), Policy::default());
    let a = alert(1, "s");
    assert_eq!(reconciler.apply(&a).unwrap(), Outcome::Created { pk: 1 });
    assert_eq!(reconciler.apply(&a).unwrap(), Outcome::AlreadyOpen { pk: 1 });
    assert_eq!(reconciler.store().calls(), vec![Call::Create("1".into())]);
  }

  #[test]
  fn resolve_after_create_resolves() {
    let reconciler = Reconciler::new(MemoryStore::default(), Policy::default());
    reconciler.apply(&alert(1, "s")).unwrap();
    assert_eq!(reconciler.apply(&alert(1, "e")).unwrap(), Outcome::Resolved { pk: 1 });
    assert!(reconciler.store().open_ids().is_empty());
    assert_eq!(
      reconciler.store().calls(),
      vec![Call::Create("1".into()), Call::Resolve(1)]
    );
  }

  #[test]
  fn resolve_without_open_incident_is_a_no_op() {
    let reconciler = Reconciler::new(MemoryStore::default(), Policy::default());
    assert_eq!(reconciler.apply(&alert(1, "e")).unwrap(), Outcome::NothingToResolve);
    assert!(reconciler.store().open_ids().is_empty());
    assert!(reconciler.store().calls().is_empty());
  }

  #[test]
  fn stateless_alert_creates_stateless_incident_every_time() {
    let reconciler = Reconciler::new(MemoryStore::default(), Policy::default());
    reconciler.apply(&alert(5, "x")).unwrap();
    let created = reconciler.store().incident(5).unwrap();
    assert_eq!(created.end_time, EndTime::Stateless);
    assert!(reconciler.store().open_ids().is_empty());
  }

  #[test]
  fn stateless_incident_is_not_resolved() {
    let store = MemoryStore::default();
    store.insert(5, EndTime::Stateless);
    let reconciler = Reconciler::new(store, Policy::default());
    let incident = reconciler.store().incident(5).unwrap();
    let outcome = reconciler.close_incident(&incident, &incident::resolution_of(&alert(5, "e"))).unwrap();
    assert_eq!(outcome, Outcome::NotResolvable { pk: 1 });
    assert!(reconciler.store().calls().is_empty());
  }

  #[test]
  fn store_failure_surfaces_as_error() {
    let store = MemoryStore::default();
    store.fail(true);
    let reconciler = Reconciler::new(store, Policy::default());
    assert!(reconciler.apply(&alert(1, "s")).is_err());
  }

  #[test]
  fn restore_skips_closed_incidents() {
    let store = MemoryStore::default();
    store.insert(3, EndTime::Resolved(chrono::Utc::now()));
    let reconciler = Reconciler::new(store, Policy::default());
    assert_eq!(reconciler.restore(&alert(3, "s")).unwrap(), Outcome::AlreadyExists { pk: 1 });
    assert!(reconciler.store().calls().is_empty());
  }

  #[test]
  fn created_incident_uses_policy() {
    let policy = Policy {
      default_level: 3,
      tags: TagConfig {
        always_add: [("service".to_string(), "CNaaS".to_string())].into_iter().collect(),
        alert_overrides: false,
      },
      ..Policy::default()
    };
    let reconciler = Reconciler::new(MemoryStore::default(), policy);
    let a = decode(br#"{"history": 8, "state": "s", "severity": 99, "tags": {"service": "other"}}"#).unwrap();
    reconciler.apply(&a).unwrap();
    let created = reconciler.store().created();
    assert_eq!(created[0].level, 3);
    assert_eq!(created[0].tags["service"], "CNaaS");
  }
}
