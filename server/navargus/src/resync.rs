//! Full-state reconciliation of NAV's active alerts against Argus' open
//! incidents, and the timer deciding when to run it.
//!
//! A run fetches a [`Snapshot`], diffs it into a [`SyncPlan`] and applies the
//! plan through the same [`Reconciler`] that handles live alerts. Snapshot
//! failures abort the run; failures on single items are logged and counted.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::FilterConfig;
use crate::error::ResyncError;
use crate::filter;
use crate::incident;
use crate::reconcile::{Outcome, Reconciler};
use crate::store::{AlertSource, IncidentStore};
use crate::types::*;

// ---------------------------------------------------------------------------
// Snapshot + diff
// ---------------------------------------------------------------------------

/// Both halves of the comparison, plus maintenance when it matters.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
  pub open_incidents: Vec<Incident>,
  pub active_alerts: Vec<Alert>,
  pub maintenance: MaintenanceSet,
}

impl Snapshot {
  pub fn fetch<S, A>(store: &S, source: &A, filters: &FilterConfig) -> Result<Self, ResyncError>
  where
    S: IncidentStore,
    A: AlertSource,
  {
    let open_incidents = store.open_incidents().map_err(ResyncError::Incidents)?;
    let active_alerts = source.active_alerts().map_err(ResyncError::Alerts)?;
    // Maintenance shows up in the same listing, so it needs no second fetch.
    let maintenance = if filters.ignore_maintenance {
      MaintenanceSet::from_alerts(&active_alerts)
    } else {
      MaintenanceSet::default()
    };
    debug!(
      open_incidents = open_incidents.len(),
      active_alerts = active_alerts.len(),
      maintenance = maintenance.len(),
      "Fetched resync snapshot"
    );
    Ok(Self {
      open_incidents,
      active_alerts,
      maintenance,
    })
  }
}

/// Discrepancies between Argus and NAV, ordered by alert id.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
  /// Open in Argus, no longer active in NAV.
  pub to_resolve: Vec<Incident>,
  /// Active in NAV, not open in Argus.
  pub to_create: Vec<Alert>,
  /// Active in NAV but left alone because the subject is on maintenance.
  pub suppressed: Vec<AlertId>,
}

impl SyncPlan {
  pub fn is_empty(&self) -> bool {
    self.to_resolve.is_empty() && self.to_create.is_empty()
  }
}

/// Diff a snapshot. Maintenance only holds back creation: an incident whose
/// alert is still active in NAV is never resolved because of it.
pub fn plan(snapshot: &Snapshot, filters: &FilterConfig) -> SyncPlan {
  let active: BTreeMap<AlertId, &Alert> = snapshot
    .active_alerts
    .iter()
    .filter(|a| a.state == AlertState::Start)
    .map(|a| (a.id, a))
    .collect();

  let mut open: BTreeMap<AlertId, &Incident> = BTreeMap::new();
  for incident in &snapshot.open_incidents {
    match incident.alert_id() {
      Some(id) => {
        open.insert(id, incident);
      }
      None => warn!(
        incident = incident.pk,
        source_incident_id = %incident.source_incident_id,
        "Open incident does not refer to a NAV alert, ignoring"
      ),
    }
  }

  let open_ids: BTreeSet<AlertId> = open.keys().copied().collect();
  let mut plan = SyncPlan::default();

  for (id, incident) in &open {
    if !active.contains_key(id) {
      plan.to_resolve.push((*incident).clone());
    }
  }

  for (id, alert) in &active {
    if open_ids.contains(id) {
      continue;
    }
    if filters.ignore_maintenance && filter::on_maintenance(alert, &snapshot.maintenance) {
      plan.suppressed.push(*id);
      continue;
    }
    plan.to_create.push((*alert).clone());
  }

  plan
}

// ---------------------------------------------------------------------------
// Applying a plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub created: usize,
  pub resolved: usize,
  /// Items left alone: on maintenance, already handled, or unknown to NAV.
  pub skipped: usize,
  pub failed: usize,
}

/// Push every discrepancy through the reconciler. Incidents are closed with
/// the end time NAV recorded for their alert. Item failures don't stop the
/// remaining items.
pub fn apply<S, A>(reconciler: &Reconciler<S>, source: &A, plan: &SyncPlan) -> SyncReport
where
  S: IncidentStore,
  A: AlertSource,
{
  let mut report = SyncReport {
    skipped: plan.suppressed.len(),
    ..SyncReport::default()
  };

  for alert in &plan.to_create {
    match reconciler.restore(alert) {
      Ok(Outcome::Created { .. }) => report.created += 1,
      Ok(_) => report.skipped += 1,
      Err(e) => {
        warn!(alert_id = %alert.id, error = %e, "Failed to create incident during resync");
        report.failed += 1;
      }
    }
  }

  for incident in &plan.to_resolve {
    let Some(id) = incident.alert_id() else {
      report.skipped += 1;
      continue;
    };
    let resolution = match source.alert(id) {
      Ok(Some(record)) => incident::resolution_from(&record),
      Ok(None) => {
        error!(incident = incident.pk, alert_id = %id, "Incident refers to an alert NAV doesn't know, leaving it open");
        report.skipped += 1;
        continue;
      }
      Err(e) => {
        warn!(incident = incident.pk, alert_id = %id, error = %e, "Failed to look up alert during resync");
        report.failed += 1;
        continue;
      }
    };
    match reconciler.close_incident(incident, &resolution) {
      Ok(Outcome::Resolved { .. }) => report.resolved += 1,
      Ok(_) => report.skipped += 1,
      Err(e) => {
        warn!(incident = incident.pk, error = %e, "Failed to resolve incident during resync");
        report.failed += 1;
      }
    }
  }

  report
}

/// One complete resync run.
pub fn run<S, A>(reconciler: &Reconciler<S>, source: &A) -> Result<SyncReport, ResyncError>
where
  S: IncidentStore,
  A: AlertSource,
{
  let filters = reconciler.policy().filters;
  let snapshot = Snapshot::fetch(reconciler.store(), source, &filters)?;
  let plan = plan(&snapshot, &filters);
  let report = apply(reconciler, source, &plan);
  info!(
    created = report.created,
    resolved = report.resolved,
    skipped = report.skipped,
    failed = report.failed,
    "Resync finished"
  );
  Ok(report)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

fn describe_incident(incident: &Incident) -> String {
  let start = incident
    .start_time
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| "N/A".into());
  format!("{}\t{}\t{}", incident.source_incident_id, start, incident.description)
}

fn describe_alert(alert: &Alert) -> String {
  let message = if alert.message.is_empty() { "N/A" } else { alert.message.as_str() };
  format!("{}\t{}\t{}", alert.id, alert.time.to_rfc3339(), message)
}

fn caption(out: &mut impl Write, text: &str) -> io::Result<()> {
  writeln!(out, "{}\n{}", text, "=".repeat(text.len()))
}

/// Human readable, tab separated listing of what a resync would change.
pub fn write_report(plan: &SyncPlan, out: &mut impl Write) -> io::Result<()> {
  if !plan.to_resolve.is_empty() {
    caption(out, "These incidents are resolved in NAV, but not in Argus")?;
    for incident in &plan.to_resolve {
      writeln!(out, "{}", describe_incident(incident))?;
    }
    if !plan.to_create.is_empty() {
      writeln!(out)?;
    }
  }
  if !plan.to_create.is_empty() {
    caption(out, "These incidents are open in NAV, but are missing from Argus")?;
    for alert in &plan.to_create {
      writeln!(out, "{}", describe_alert(alert))?;
    }
  }
  Ok(())
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
  Idle,
  Running,
}

/// Tracks when the next resync is due. Runs never overlap: a trigger that
/// arrives while one is running is dropped, and the interval counts from
/// the end of the previous run.
#[derive(Debug)]
pub struct Scheduler {
  interval: Option<Duration>,
  last_run: Option<Instant>,
  state: SchedulerState,
}

impl Scheduler {
  pub fn new(interval: Option<Duration>) -> Self {
    Self {
      interval,
      last_run: None,
      state: SchedulerState::Idle,
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.interval.is_some()
  }

  pub fn state(&self) -> SchedulerState {
    self.state
  }

  pub fn is_due(&self, now: Instant) -> bool {
    self.state == SchedulerState::Idle && self.wait_time(now) == Some(Duration::ZERO)
  }

  /// How long until the next run is due; `None` when disabled.
  pub fn wait_time(&self, now: Instant) -> Option<Duration> {
    let interval = self.interval?;
    Some(match self.last_run {
      None => Duration::ZERO,
      Some(last) => (last + interval).saturating_duration_since(now),
    })
  }

  /// Claim the next run. False if one is already running or resync is off.
  pub fn start(&mut self) -> bool {
    if !self.is_enabled() || self.state == SchedulerState::Running {
      return false;
    }
    self.state = SchedulerState::Running;
    true
  }

  pub fn finish(&mut self, at: Instant) {
    self.state = SchedulerState::Idle;
    self.last_run = Some(at);
  }
}
