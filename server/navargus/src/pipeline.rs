//! The decision loop: frames → decode → filter → reconcile, with resyncs
//! interleaved on the same thread.
//!
//! Blocking on stdin happens on a separate reader thread that feeds a
//! one-slot channel. The loop waits on that channel only until the next
//! resync is due, so an idle input never delays a resync, and a live alert
//! can never race a resync decision for the same alert id.

use std::io::Read;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::decode;
use crate::error::{DecodeError, FrameError, ResyncError};
use crate::filter::{self, Verdict};
use crate::frame::{FrameReader, Record};
use crate::reconcile::{Outcome, Reconciler};
use crate::resync::{self, Scheduler, SyncReport};
use crate::store::{AlertSource, IncidentStore};
use crate::types::MaintenanceSet;

/// Everything the decision loop can be woken up by.
#[derive(Debug)]
pub enum Message {
  Record(Result<Record, FrameError>),
  /// The input stream reached EOF.
  Closed,
  /// Reading the input stream failed; nothing more will arrive.
  Failed(FrameError),
  /// Termination signal.
  Shutdown,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
  EndOfInput,
  Shutdown,
  /// The input stream broke before EOF.
  InputFailed,
}

/// What happened to one input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
  Undecodable,
  Filtered(Verdict),
  Reconciled(Outcome),
  /// A remote call failed; left for the next resync.
  Failed,
}

/// Read records off `source` on a dedicated thread until EOF, a read error,
/// or until the receiving side goes away.
pub fn spawn_reader<R>(source: R, tx: SyncSender<Message>) -> std::io::Result<JoinHandle<()>>
where
  R: Read + Send + 'static,
{
  thread::Builder::new().name("frame-reader".into()).spawn(move || {
    for record in FrameReader::new(source) {
      let message = match record {
        Err(e @ FrameError::Io(_)) => {
          let _ = tx.send(Message::Failed(e));
          return;
        }
        other => Message::Record(other),
      };
      if tx.send(message).is_err() {
        return;
      }
    }
    let _ = tx.send(Message::Closed);
  })
}

pub struct Pipeline<S, A> {
  reconciler: Reconciler<S>,
  source: A,
  scheduler: Scheduler,
}

impl<S: IncidentStore, A: AlertSource> Pipeline<S, A> {
  pub fn new(reconciler: Reconciler<S>, source: A, sync_interval: Option<Duration>) -> Self {
    Self {
      reconciler,
      source,
      scheduler: Scheduler::new(sync_interval),
    }
  }

  pub fn reconciler(&self) -> &Reconciler<S> {
    &self.reconciler
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.scheduler
  }

  /// Initial resync before any input is consumed. Unlike periodic runs, a
  /// failure here is fatal. Returns `None` when resync is disabled.
  pub fn startup(&mut self) -> Result<Option<SyncReport>, ResyncError> {
    if !self.scheduler.start() {
      info!("Periodic resync disabled, skipping initial resync");
      return Ok(None);
    }
    info!("Running initial resync");
    let result = resync::run(&self.reconciler, &self.source);
    self.scheduler.finish(Instant::now());
    result.map(Some)
  }

  /// Consume messages until input ends or a shutdown arrives.
  pub fn run(&mut self, rx: &Receiver<Message>) -> Exit {
    loop {
      let message = match self.scheduler.wait_time(Instant::now()) {
        Some(wait) => rx.recv_timeout(wait),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
      };

      match message {
        Ok(Message::Record(Ok(record))) => {
          self.handle_record(&record);
        }
        Ok(Message::Record(Err(e))) => warn!(error = %e, "Skipping malformed input"),
        Ok(Message::Closed) | Err(RecvTimeoutError::Disconnected) => {
          info!("Input stream closed");
          return Exit::EndOfInput;
        }
        Ok(Message::Failed(e)) => {
          error!(error = %e, "Reading input failed");
          return Exit::InputFailed;
        }
        Ok(Message::Shutdown) => {
          info!("Shutdown requested");
          return Exit::Shutdown;
        }
        Err(RecvTimeoutError::Timeout) => {}
      }

      // Checked after every message too, so a busy stream can't starve resync.
      if self.scheduler.is_due(Instant::now()) {
        self.resync();
      }
    }
  }

  /// Decode, filter and reconcile one record. Never fails the loop.
  pub fn handle_record(&mut self, record: &[u8]) -> Handled {
    let alert = match decode::decode(record) {
      Ok(alert) => alert,
      // The event engine emits bare `{}` keepalives.
      Err(DecodeError::MissingField("history")) => {
        debug!(len = record.len(), "Ignoring record without alert history id");
        return Handled::Undecodable;
      }
      Err(e) => {
        warn!(error = %e, len = record.len(), "Skipping undecodable alert");
        return Handled::Undecodable;
      }
    };
    debug!(alert_id = %alert.id, state = ?alert.state, subject = %alert.subject.key, "Received alert");

    let filters = self.reconciler.policy().filters;
    // Alerts that flag their own maintenance don't need the remote lookup.
    let lookup = filter::needs_maintenance_set(&alert, &filters)
      && !filter::on_maintenance(&alert, &MaintenanceSet::default());
    let maintenance = if lookup {
      match self.source.maintenance() {
        Ok(set) => set,
        Err(e) => {
          warn!(alert_id = %alert.id, error = %e, "Couldn't fetch maintenance set, dropping alert");
          return Handled::Failed;
        }
      }
    } else {
      MaintenanceSet::default()
    };

    let verdict = filter::evaluate(&alert, &maintenance, &filters);
    if verdict != Verdict::Pass {
      debug!(alert_id = %alert.id, reason = %verdict, "Ignoring alert");
      return Handled::Filtered(verdict);
    }

    match self.reconciler.apply(&alert) {
      Ok(outcome) => Handled::Reconciled(outcome),
      Err(e) => {
        error!(alert_id = %alert.id, error = %e, "Argus call failed, leaving it to the next resync");
        Handled::Failed
      }
    }
  }

  fn resync(&mut self) {
    if !self.scheduler.start() {
      return;
    }
    if let Err(e) = resync::run(&self.reconciler, &self.source) {
      error!(error = %e, "Resync failed, retrying at next interval");
    }
    self.scheduler.finish(Instant::now());
  }
}
