//! Decide whether a decoded alert should reach the reconciler at all.

use std::fmt;

use crate::config::FilterConfig;
use crate::types::{Alert, AlertState, MaintenanceSet, MAINTENANCE_EVENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Pass,
  /// Subject is on maintenance right now.
  Maintenance,
  Stateless,
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Pass => "pass",
      Self::Maintenance => "subject on maintenance",
      Self::Stateless => "stateless alert",
    })
  }
}

/// Whether evaluating `alert` needs a current maintenance set. Resolves are
/// never suppressed, so they don't.
pub fn needs_maintenance_set(alert: &Alert, config: &FilterConfig) -> bool {
  config.ignore_maintenance
    && alert.state != AlertState::End
    && !(alert.state == AlertState::Stateless && config.ignore_stateless)
}

pub fn on_maintenance(alert: &Alert, maintenance: &MaintenanceSet) -> bool {
  alert.on_maintenance
    || alert.event_type.as_deref() == Some(MAINTENANCE_EVENT)
    || maintenance.contains(&alert.subject.key)
}

pub fn evaluate(alert: &Alert, maintenance: &MaintenanceSet, config: &FilterConfig) -> Verdict {
  match alert.state {
    AlertState::End => Verdict::Pass,
    AlertState::Stateless if config.ignore_stateless => Verdict::Stateless,
    _ if config.ignore_maintenance && on_maintenance(alert, maintenance) => Verdict::Maintenance,
    _ => Verdict::Pass,
  }
}
