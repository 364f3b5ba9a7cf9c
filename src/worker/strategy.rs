//! Request routing and the fetch strategies behind it.
//!
//! Every strategy ends in a response. Network failures fall back to a cached
//! copy, the offline page, or a synthesized response.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cache::CacheStorage;
use super::net::{cache_key, Destination, Network, Request, RequestMode, Response};
use super::WorkerSettings;

/// Which branch of the dispatch table a request falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Font provider: cache-first with an empty fallback.
  Font,
  /// Not intercepted.
  PassThrough,
  /// Page load: network-first.
  Navigation,
  /// One of the precached shell files: cache-first into the shell cache.
  Precache,
  /// Fingerprinted build output: cache-first into the runtime cache.
  Asset,
  /// Any other same-origin GET.
  StaleWhileRevalidate,
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  Network,
  Cache,
  /// Cached health page served for an offline health-check navigation.
  HealthPage,
  /// Cached app shell served for an uncached offline navigation.
  AppShell,
  OfflinePage,
  /// Empty body for an unreachable font provider.
  EmptyFont,
  /// Nothing usable was cached.
  Unavailable,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
  pub response: Response,
  pub source: ResponseSource,
  pub route: Route,
}

impl FetchResult {
  fn new(route: Route, source: ResponseSource, response: Response) -> Self {
    Self {
      response,
      source,
      route,
    }
  }
}

pub fn is_navigation(request: &Request) -> bool {
  request.mode == RequestMode::Navigate
    || (request.method == reqwest::Method::GET
      && request
        .accept
        .as_deref()
        .is_some_and(|accept| accept.contains("text/html")))
}

/// First matching branch wins.
pub fn route(settings: &WorkerSettings, request: &Request) -> Route {
  let url = &request.url;
  let host = url.host_str().unwrap_or_default();
  if settings.font_hosts.iter().any(|h| h == host) {
    return Route::Font;
  }
  if url.origin() != settings.origin.origin() {
    return Route::PassThrough;
  }
  if is_navigation(request) {
    return Route::Navigation;
  }
  if settings.precache_paths().iter().any(|p| p == url.path()) {
    return Route::Precache;
  }
  let is_get = request.method == reqwest::Method::GET;
  if is_get && url.path().starts_with(&settings.with_base("assets/")) {
    return Route::Asset;
  }
  if is_get {
    return Route::StaleWhileRevalidate;
  }
  Route::PassThrough
}

/// Runs the strategies against shared caches and a network.
pub(crate) struct Strategies {
  caches: Arc<CacheStorage>,
  network: Arc<dyn Network>,
  settings: Arc<WorkerSettings>,
  revalidations: Mutex<Vec<JoinHandle<()>>>,
}

impl Strategies {
  pub fn new(
    caches: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    settings: Arc<WorkerSettings>,
  ) -> Self {
    Self {
      caches,
      network,
      settings,
      revalidations: Mutex::new(Vec::new()),
    }
  }

  /// Dispatch a request. `None` means the request is not intercepted.
  pub async fn handle(&self, request: &Request) -> Option<FetchResult> {
    let route = route(&self.settings, request);
    let result = match route {
      Route::PassThrough => return None,
      Route::Font => self.font(request).await,
      Route::Navigation => self.network_first(request).await,
      Route::Precache => {
        let shell = self.settings.shell_cache();
        self.cache_first(route, request, &shell).await
      }
      Route::Asset => {
        let runtime = self.settings.runtime_cache();
        self.cache_first(route, request, &runtime).await
      }
      Route::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
    };
    debug!(
      "{} {} -> {:?} via {:?}",
      request.method, request.url, result.source, route
    );
    Some(result)
  }

  /// Wait for background cache refreshes started by stale-while-revalidate.
  pub async fn settle(&self) {
    let handles: Vec<_> = match self.revalidations.lock() {
      Ok(mut pending) => pending.drain(..).collect(),
      Err(poisoned) => poisoned.into_inner().drain(..).collect(),
    };
    for handle in handles {
      if let Err(e) = handle.await {
        warn!("Cache revalidation task failed: {}", e);
      }
    }
  }

  fn lookup(&self, path: &str) -> Option<Response> {
    let url = self.settings.origin.join(path).ok()?;
    self.caches.match_any(&cache_key(&url))
  }

  fn offline(&self, route: Route) -> FetchResult {
    match self.lookup(&self.settings.offline_path()) {
      Some(page) => FetchResult::new(route, ResponseSource::OfflinePage, page),
      None => {
        warn!("Offline page missing from cache");
        FetchResult::new(route, ResponseSource::Unavailable, Response::unavailable())
      }
    }
  }

  async fn font(&self, request: &Request) -> FetchResult {
    let key = request.cache_key();
    if let Some(cached) = self.caches.match_any(&key) {
      return FetchResult::new(Route::Font, ResponseSource::Cache, cached);
    }
    match self.network.fetch(request).await {
      Ok(response) => {
        self
          .caches
          .put(&self.settings.runtime_cache(), &key, response.clone());
        FetchResult::new(Route::Font, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!("Font fetch failed: {}", e);
        let is_style = request.destination == Destination::Style
          || request.url.host_str() == Some("fonts.googleapis.com");
        let content_type = if is_style {
          "text/css"
        } else {
          "application/octet-stream"
        };
        FetchResult::new(
          Route::Font,
          ResponseSource::EmptyFont,
          Response::empty(content_type),
        )
      }
    }
  }

  async fn network_first(&self, request: &Request) -> FetchResult {
    let route = Route::Navigation;
    let key = request.cache_key();
    match self.network.fetch(request).await {
      Ok(response) => {
        self
          .caches
          .put(&self.settings.runtime_cache(), &key, response.clone());
        FetchResult::new(route, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!("Navigation fetch failed, using cache: {}", e);
        if let Some(cached) = self.caches.match_any(&key) {
          return FetchResult::new(route, ResponseSource::Cache, cached);
        }
        let path = request.url.path().trim_end_matches('/');
        if path.ends_with("/health") {
          if let Some(health) = self.lookup(&self.settings.with_base("health/index.html")) {
            return FetchResult::new(route, ResponseSource::HealthPage, health);
          }
        }
        match self.lookup(&self.settings.with_base("index.html")) {
          Some(shell) => FetchResult::new(route, ResponseSource::AppShell, shell),
          None => self.offline(route),
        }
      }
    }
  }

  async fn cache_first(&self, route: Route, request: &Request, store_in: &str) -> FetchResult {
    let key = request.cache_key();
    if let Some(cached) = self.caches.match_any(&key) {
      return FetchResult::new(route, ResponseSource::Cache, cached);
    }
    match self.network.fetch(request).await {
      Ok(response) => {
        self.caches.put(store_in, &key, response.clone());
        FetchResult::new(route, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!("Cache-first fetch failed for {}: {}", request.url, e);
        self.offline(route)
      }
    }
  }

  async fn stale_while_revalidate(&self, request: &Request) -> FetchResult {
    let route = Route::StaleWhileRevalidate;
    let key = request.cache_key();
    let runtime = self.settings.runtime_cache();

    if let Some(cached) = self.caches.match_any(&key) {
      let caches = Arc::clone(&self.caches);
      let network = Arc::clone(&self.network);
      let request = request.clone();
      let handle = tokio::spawn(async move {
        match network.fetch(&request).await {
          Ok(fresh) => caches.put(&runtime, &key, fresh),
          Err(e) => debug!("Revalidation of {} failed: {}", request.url, e),
        }
      });
      let mut pending = match self.revalidations.lock() {
        Ok(pending) => pending,
        Err(poisoned) => poisoned.into_inner(),
      };
      pending.retain(|h| !h.is_finished());
      pending.push(handle);
      return FetchResult::new(route, ResponseSource::Cache, cached);
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        self.caches.put(&runtime, &key, response.clone());
        FetchResult::new(route, ResponseSource::Network, response)
      }
      Err(e) => {
        debug!("Fetch of {} failed with nothing cached: {}", request.url, e);
        self.offline(route)
      }
    }
  }
}
