//! Blocking JSON client shared by the Argus and NAV adapters.
//!
//! Both APIs are Django REST Framework services: token auth in the
//! `Authorization` header, and listings that are either a bare array or a
//! page object with `next` / `results`.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Upper bound on pages followed for one listing.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
  Page {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
  },
  Plain(Vec<T>),
}

#[derive(Debug, Clone)]
pub struct ApiClient {
  base_url: String,
  auth: String,
  http: Client,
  max_pages: usize,
}

impl ApiClient {
  pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, StoreError> {
    let http = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("navargus/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self {
      base_url: base_url.trim_end_matches('/').to_string(),
      auth: format!("Token {}", token),
      http,
      max_pages: MAX_PAGES,
    })
  }

  /// Lower the page limit; listings longer than this fail instead of being cut short.
  pub fn with_max_pages(mut self, max_pages: usize) -> Self {
    self.max_pages = max_pages;
    self
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  fn url(&self, path: &str) -> String {
    format!("{}/{}", self.base_url, path.trim_start_matches('/'))
  }

  /// Send with credentials and turn non-2xx replies into errors.
  fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, StoreError> {
    let response = request.header(AUTHORIZATION, &self.auth).send()?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(StoreError::status(endpoint, status.as_u16(), body))
  }

  /// Every item of a listing, following `next` links.
  pub fn get_all<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Vec<T>, StoreError> {
    debug!(path, ?query, "GET listing");
    let mut request = self.http.get(self.url(path)).query(query);
    let mut items = Vec::new();

    for _ in 0..self.max_pages {
      match self.send(request, path)?.json::<Listing<T>>()? {
        Listing::Plain(all) => {
          items.extend(all);
          return Ok(items);
        }
        Listing::Page { next, results } => {
          items.extend(results);
          match next {
            Some(next) => request = self.http.get(next),
            None => return Ok(items),
          }
        }
      }
    }
    Err(StoreError::TooManyPages {
      endpoint: path.to_string(),
      limit: self.max_pages,
    })
  }

  /// A single object; `None` when the API answers 404.
  pub fn get_one<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, StoreError> {
    debug!(path, "GET");
    match self.send(self.http.get(self.url(path)), path) {
      Ok(response) => Ok(Some(response.json()?)),
      Err(StoreError::Status { status: 404, .. }) => Ok(None),
      Err(e) => Err(e),
    }
  }

  /// First item of a listing, without fetching further pages.
  pub fn get_first<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<T>, StoreError> {
    debug!(path, ?query, "GET first");
    let request = self.http.get(self.url(path)).query(query);
    Ok(match self.send(request, path)?.json::<Listing<T>>()? {
      Listing::Plain(all) => all.into_iter().next(),
      Listing::Page { results, .. } => results.into_iter().next(),
    })
  }

  pub fn post<B, T>(&self, path: &str, body: &B) -> Result<T, StoreError>
  where
    B: Serialize,
    T: DeserializeOwned,
  {
    debug!(path, "POST");
    let request = self.http.post(self.url(path)).json(body);
    Ok(self.send(request, path)?.json()?)
  }
}
