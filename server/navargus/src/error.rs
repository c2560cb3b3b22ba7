//! Structured error types, one enum per concern.

use std::path::PathBuf;

use thiserror::Error;

/// Problems found while cutting the input stream into records.
#[derive(Debug, Error)]
pub enum FrameError {
  #[error("read: {0}")]
  Io(#[from] std::io::Error),

  #[error("skipped {len} bytes of non-JSON input")]
  Junk { len: usize },

  #[error("record larger than {limit} bytes, discarded")]
  Oversized { limit: usize },

  #[error("input ended inside a record, {len} bytes dropped")]
  Truncated { len: usize },
}

/// A well-framed record that is not a usable alert.
#[derive(Debug, Error)]
pub enum DecodeError {
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("missing field: {0}")]
  MissingField(&'static str),

  #[error("invalid {field}: {reason}")]
  Invalid { field: String, reason: String },
}

impl DecodeError {
  pub fn invalid(field: &str, reason: &str) -> Self {
    Self::Invalid {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// Failures talking to Argus or NAV.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("http: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{endpoint}: access denied ({status})")]
  Unauthorized { endpoint: String, status: u16 },

  #[error("{endpoint}: unexpected status {status}: {body}")]
  Status {
    endpoint: String,
    status: u16,
    body: String,
  },

  #[error("{endpoint}: {reason}")]
  Malformed { endpoint: String, reason: String },

  #[error("{endpoint}: gave up after {limit} pages")]
  TooManyPages { endpoint: String, limit: usize },
}

impl StoreError {
  pub fn status(endpoint: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
    let endpoint = endpoint.into();
    if status == 401 || status == 403 {
      return Self::Unauthorized { endpoint, status };
    }
    Self::Status {
      endpoint,
      status,
      body: body.into(),
    }
  }

  pub fn malformed(endpoint: &str, reason: impl Into<String>) -> Self {
    Self::Malformed {
      endpoint: endpoint.to_string(),
      reason: reason.into(),
    }
  }
}

/// A resync run that could not fetch its snapshot.
#[derive(Debug, Error)]
pub enum ResyncError {
  #[error("fetching open incidents: {0}")]
  Incidents(#[source] StoreError),

  #[error("fetching active alerts: {0}")]
  Alerts(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("reading {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("yaml: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("{field}: {reason}")]
  Invalid { field: String, reason: String },
}

impl ConfigError {
  pub fn invalid(field: &str, reason: &str) -> Self {
    Self::Invalid {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}
