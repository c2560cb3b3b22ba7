//! Configuration loaded from `navargus.yml`. Every key is optional; the
//! defaults are what NAV installations of the export script have always used.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "navargus.yml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
  pub api: ApiConfig,
  pub nav: NavConfig,
  pub tags: TagConfig,
  pub filters: FilterConfig,
}

/// Argus API access and reconciliation knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ApiConfig {
  /// Argus API base URL, e.g. `https://argus.example.org/api/v2`.
  pub url: Option<String>,
  pub token: Option<String>,
  /// Per-request timeout in seconds.
  pub timeout: f64,
  /// Minutes between full resyncs. `null` or `0` disables resync entirely.
  pub sync_interval: Option<i64>,
  /// Incident level used when an alert's severity can't be mapped.
  pub default_level: u8,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: None,
      token: None,
      timeout: 2.0,
      sync_interval: Some(1),
      default_level: 3,
    }
  }
}

/// NAV API access, used for resync snapshots and maintenance lookups.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NavConfig {
  /// NAV API base URL, e.g. `https://nav.example.org/api/1`.
  pub url: Option<String>,
  pub token: Option<String>,
  pub timeout: f64,
}

impl Default for NavConfig {
  fn default() -> Self {
    Self {
      url: None,
      token: None,
      timeout: 2.0,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TagConfig {
  /// Tags added to every incident. These win over alert-derived tags.
  #[serde(deserialize_with = "scalar_map")]
  pub always_add: BTreeMap<String, String>,
  /// Let alert-derived tags win over `always-add` on key conflicts instead.
  pub alert_overrides: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FilterConfig {
  pub ignore_maintenance: bool,
  pub ignore_stateless: bool,
}

impl Default for FilterConfig {
  fn default() -> Self {
    Self {
      ignore_maintenance: true,
      ignore_stateless: false,
    }
  }
}

/// The immutable slice of configuration the filter stage and reconciler consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
  pub default_level: u8,
  pub tags: TagConfig,
  pub filters: FilterConfig,
}

impl Default for Policy {
  fn default() -> Self {
    Self {
      default_level: ApiConfig::default().default_level,
      tags: TagConfig::default(),
      filters: FilterConfig::default(),
    }
  }
}

impl Config {
  /// Load and validate a config file. A missing file yields the defaults.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    match std::fs::read_to_string(path) {
      Ok(text) => Self::from_yaml(&text),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        info!(path = %path.display(), "No configuration file found");
        Ok(Self::default())
      }
      Err(source) => Err(ConfigError::Io {
        path: path.to_path_buf(),
        source,
      }),
    }
  }

  pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
    // An empty file parses as YAML null.
    let config: Option<Config> = serde_yaml::from_str(text)?;
    let config = config.unwrap_or_default();
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if let Some(minutes) = self.api.sync_interval {
      if minutes < 0 {
        return Err(ConfigError::invalid(
          "api.sync-interval",
          &format!("must be a positive integer, got {}", minutes),
        ));
      }
    }
    if !(1..=5).contains(&self.api.default_level) {
      return Err(ConfigError::invalid("api.default-level", "must be between 1 and 5"));
    }
    for (field, timeout) in [("api.timeout", self.api.timeout), ("nav.timeout", self.nav.timeout)] {
      if !(timeout.is_finite() && timeout > 0.0) {
        return Err(ConfigError::invalid(field, "must be a positive number of seconds"));
      }
    }
    Ok(())
  }

  /// Resync period; `None` means never resync, not even at startup.
  pub fn sync_interval(&self) -> Option<Duration> {
    match self.api.sync_interval {
      Some(minutes) if minutes > 0 => Some(Duration::from_secs(minutes as u64 * 60)),
      _ => None,
    }
  }

  pub fn policy(&self) -> Policy {
    Policy {
      default_level: self.api.default_level,
      tags: self.tags.clone(),
      filters: self.filters,
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs_f64(self.timeout)
  }

  pub fn endpoint(&self) -> Result<(&str, &str), ConfigError> {
    required(&self.url, "api.url").and_then(|url| Ok((url, required(&self.token, "api.token")?)))
  }
}

impl NavConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs_f64(self.timeout)
  }

  pub fn endpoint(&self) -> Result<(&str, &str), ConfigError> {
    required(&self.url, "nav.url").and_then(|url| Ok((url, required(&self.token, "nav.token")?)))
  }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ConfigError> {
  match value.as_deref().map(str::trim) {
    Some(v) if !v.is_empty() => Ok(v),
    _ => Err(ConfigError::invalid(field, "must be set")),
  }
}

/// Accept any YAML scalar as a tag value (`site: 12` is as valid as `site: "12"`).
fn scalar_map<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
  let raw: Option<BTreeMap<String, serde_yaml::Value>> = Option::deserialize(d)?;
  raw
    .unwrap_or_default()
    .into_iter()
    .map(|(k, v)| match v {
      serde_yaml::Value::String(s) => Ok((k, s)),
      serde_yaml::Value::Number(n) => Ok((k, n.to_string())),
      serde_yaml::Value::Bool(b) => Ok((k, b.to_string())),
      other => Err(serde::de::Error::custom(format!(
        "tag {:?} must have a scalar value, got {:?}",
        k, other
      ))),
    })
    .collect()
}
