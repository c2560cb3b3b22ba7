//! The two remote systems the reconciler talks to.
//!
//! Argus owns incident state and is the source of truth; nothing here caches
//! it. NAV is read-only: it tells us which alerts are active and which
//! subjects are on maintenance.

use crate::error::StoreError;
use crate::types::{Alert, AlertId, AlertRecord, Incident, MaintenanceSet, NewIncident, Resolution};

pub trait IncidentStore {
  /// Incident mirroring `alert`, optionally restricted to open ones.
  fn find_incident(&self, alert: AlertId, open_only: bool) -> Result<Option<Incident>, StoreError>;

  fn create_incident(&self, incident: &NewIncident) -> Result<Incident, StoreError>;

  fn resolve_incident(&self, incident: &Incident, resolution: &Resolution) -> Result<(), StoreError>;

  /// Every open incident created by this source.
  fn open_incidents(&self) -> Result<Vec<Incident>, StoreError>;
}

pub trait AlertSource {
  /// Alerts NAV currently considers active.
  fn active_alerts(&self) -> Result<Vec<Alert>, StoreError>;

  fn maintenance(&self) -> Result<MaintenanceSet, StoreError>;

  /// NAV's record of one alert, open or closed; `None` if NAV has no such alert.
  fn alert(&self, id: AlertId) -> Result<Option<AlertRecord>, StoreError>;
}

impl<T: IncidentStore + ?Sized> IncidentStore for &T {
  fn find_incident(&self, alert: AlertId, open_only: bool) -> Result<Option<Incident>, StoreError> {
    (**self).find_incident(alert, open_only)
  }

  fn create_incident(&self, incident: &NewIncident) -> Result<Incident, StoreError> {
    (**self).create_incident(incident)
  }

  fn resolve_incident(&self, incident: &Incident, resolution: &Resolution) -> Result<(), StoreError> {
    (**self).resolve_incident(incident, resolution)
  }

  fn open_incidents(&self) -> Result<Vec<Incident>, StoreError> {
    (**self).open_incidents()
  }
}

impl<T: AlertSource + ?Sized> AlertSource for &T {
  fn active_alerts(&self) -> Result<Vec<Alert>, StoreError> {
    (**self).active_alerts()
  }

  fn maintenance(&self) -> Result<MaintenanceSet, StoreError> {
    (**self).maintenance()
  }

  fn alert(&self, id: AlertId) -> Result<Option<AlertRecord>, StoreError> {
    (**self).alert(id)
  }
}
