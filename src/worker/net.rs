//! Request/response model and the network seam the worker fetches through.

use futures::future::{BoxFuture, FutureExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  /// Any failed fetch. The strategies always turn this into a fallback response.
  #[error("Network request failed: {0}")]
  NetworkFailure(String),

  #[error("Failed to precache {url}: {reason}")]
  Precache { url: String, reason: String },

  #[error("Invalid worker setting: {0}")]
  InvalidSetting(String),
}

/// How the page issued the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
  Navigate,
  #[default]
  SameOrigin,
  NoCors,
  Cors,
}

/// What the response will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  Document,
  Style,
  Script,
  Font,
  Image,
  #[default]
  Other,
}

#[derive(Debug, Clone)]
pub struct Request {
  pub url: Url,
  pub method: Method,
  pub mode: RequestMode,
  pub destination: Destination,
  pub accept: Option<String>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      url,
      method: Method::GET,
      mode: RequestMode::default(),
      destination: Destination::default(),
      accept: None,
    }
  }

  /// A top-level page load.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      destination: Destination::Document,
      accept: Some("text/html,application/xhtml+xml".to_string()),
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn with_accept(mut self, accept: &str) -> Self {
    self.accept = Some(accept.to_string());
    self
  }

  /// Lookup key used by the cache: the URL without its fragment.
  pub fn cache_key(&self) -> String {
    cache_key(&self.url)
  }
}

pub(crate) fn cache_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      content_type: content_type.map(str::to_string),
      body: body.into(),
    }
  }

  /// Empty 200 used when a font provider is unreachable and nothing is cached.
  pub fn empty(content_type: &str) -> Self {
    Self::new(200, Some(content_type), Vec::new())
  }

  /// Last-resort response when even the offline page is gone.
  pub fn unavailable() -> Self {
    Self::new(503, Some("text/plain; charset=utf-8"), "Offline")
  }

  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Anything that can perform a fetch. HTTP error statuses are responses, not errors.
pub trait Network: Send + Sync {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, WorkerError>>;
}

/// Network backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new() -> Result<Self, WorkerError> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("graph-sketch/", env!("CARGO_PKG_VERSION")))
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| WorkerError::NetworkFailure(e.to_string()))?;
    Ok(Self { client })
  }
}

impl Network for ReqwestNetwork {
  fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, WorkerError>> {
    async move {
      let mut builder = self
        .client
        .request(request.method.clone(), request.url.clone());
      if let Some(accept) = &request.accept {
        builder = builder.header(ACCEPT, accept);
      }
      let response = builder
        .send()
        .await
        .map_err(|e| WorkerError::NetworkFailure(e.to_string()))?;

      let status = response.status().as_u16();
      let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
      let body = response
        .bytes()
        .await
        .map_err(|e| WorkerError::NetworkFailure(e.to_string()))?;

      Ok(Response {
        status,
        content_type,
        body: body.to_vec(),
      })
    }
    .boxed()
  }
}
