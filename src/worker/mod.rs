//! Offline cache controller: versioned caches, precache install, and fetch interception.

mod cache;
mod net;
mod registration;
mod strategy;

pub use cache::CacheStorage;
pub use net::{
  Destination, Network, ReqwestNetwork, Request, RequestMode, Response, WorkerError,
};
pub use registration::PageClient;
pub use strategy::{is_navigation, route, FetchResult, ResponseSource, Route};

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use strategy::Strategies;

/// Bump whenever the caching behaviour changes; old caches are purged on activate.
pub const DEFAULT_VERSION: &str = "v12";
pub const SKIP_WAITING: &str = "SKIP_WAITING";
pub const DEFAULT_FONT_HOSTS: [&str; 2] = ["fonts.googleapis.com", "fonts.gstatic.com"];

/// Shell files, relative to the worker scope.
const PRECACHE_ASSETS: [&str; 8] = [
  "index.html",
  "offline.html",
  "manifest.json",
  "styles.css",
  "app_icon.png",
  "icon-192.png",
  "icon-512.png",
  "health/index.html",
];

/// Where the worker is hosted and which cache generation it owns.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
  pub version: String,
  pub origin: Url,
  pub scope_path: String,
  pub font_hosts: Vec<String>,
}

impl WorkerSettings {
  pub fn new(version: &str, origin: &str, scope: &str) -> Result<Self, WorkerError> {
    let origin = Url::parse(origin)
      .map_err(|e| WorkerError::InvalidSetting(format!("origin {:?}: {}", origin, e)))?;
    if version.trim().is_empty() {
      return Err(WorkerError::InvalidSetting("empty cache version".to_string()));
    }
    let trimmed = scope.trim_matches('/');
    let scope_path = if trimmed.is_empty() {
      "/".to_string()
    } else {
      format!("/{}/", trimmed)
    };
    Ok(Self {
      version: version.to_string(),
      origin,
      scope_path,
      font_hosts: DEFAULT_FONT_HOSTS.iter().map(|h| h.to_string()).collect(),
    })
  }

  pub fn with_font_hosts(mut self, hosts: Vec<String>) -> Self {
    self.font_hosts = hosts;
    self
  }

  pub fn shell_cache(&self) -> String {
    format!("graph-sketch-shell-{}", self.version)
  }

  pub fn runtime_cache(&self) -> String {
    format!("graph-sketch-runtime-{}", self.version)
  }

  /// Resolve a path against the scope, so sub-path hosting keeps working.
  pub fn with_base(&self, path: &str) -> String {
    format!("{}{}", self.scope_path, path.trim_start_matches('/'))
  }

  pub fn offline_path(&self) -> String {
    self.with_base("offline.html")
  }

  pub fn precache_paths(&self) -> Vec<String> {
    PRECACHE_ASSETS.iter().map(|p| self.with_base(p)).collect()
  }

  pub fn scope_url(&self) -> Result<Url, WorkerError> {
    self
      .origin
      .join(&self.scope_path)
      .map_err(|e| WorkerError::InvalidSetting(e.to_string()))
  }

  fn resolve(&self, path: &str) -> Result<Url, WorkerError> {
    self
      .origin
      .join(path)
      .map_err(|e| WorkerError::InvalidSetting(format!("{}: {}", path, e)))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Waiting,
  Activating,
  Active,
  /// Install failed; this worker never controls pages.
  Redundant,
}

pub struct OfflineCacheController {
  settings: Arc<WorkerSettings>,
  caches: Arc<CacheStorage>,
  network: Arc<dyn Network>,
  strategies: Strategies,
  state: WorkerState,
  skip_waiting: bool,
}

impl std::fmt::Debug for OfflineCacheController {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OfflineCacheController")
      .field("version", &self.settings.version)
      .field("state", &self.state)
      .finish()
  }
}

impl OfflineCacheController {
  /// `caches` outlives any single controller so upgrades can see older generations.
  pub fn new(
    settings: WorkerSettings,
    caches: Arc<CacheStorage>,
    network: Arc<dyn Network>,
  ) -> Self {
    let settings = Arc::new(settings);
    let strategies = Strategies::new(
      Arc::clone(&caches),
      Arc::clone(&network),
      Arc::clone(&settings),
    );
    Self {
      settings,
      caches,
      network,
      strategies,
      state: WorkerState::Parsed,
      skip_waiting: true,
    }
  }

  /// Stay in `Waiting` after install until asked to skip waiting or all pages close.
  pub fn wait_for_clients(mut self) -> Self {
    self.skip_waiting = false;
    self
  }

  pub fn settings(&self) -> &WorkerSettings {
    &self.settings
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn caches(&self) -> &Arc<CacheStorage> {
    &self.caches
  }

  /// Fetch every shell file into the shell cache. Any failure aborts the whole
  /// install and leaves the shell cache untouched.
  pub async fn install(&mut self) -> Result<(), WorkerError> {
    if self.state != WorkerState::Parsed {
      return Err(WorkerError::InvalidSetting(format!(
        "cannot install from state {:?}",
        self.state
      )));
    }
    self.state = WorkerState::Installing;

    match self.precache().await {
      Ok(entries) => {
        let shell = self.settings.shell_cache();
        self.caches.put_all(&shell, entries);
        info!("Installed {} ({} shell files)", self.settings.version, self.caches.len(&shell));
        self.state = WorkerState::Waiting;
        if self.skip_waiting {
          self.activate();
        }
        Ok(())
      }
      Err(e) => {
        warn!("Install of {} failed: {}", self.settings.version, e);
        self.state = WorkerState::Redundant;
        Err(e)
      }
    }
  }

  async fn precache(&self) -> Result<Vec<(String, Response)>, WorkerError> {
    let mut entries = Vec::with_capacity(PRECACHE_ASSETS.len());
    for path in self.settings.precache_paths() {
      let url = self.settings.resolve(&path)?;
      let request = Request::get(url);
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| WorkerError::Precache {
          url: request.url.to_string(),
          reason: e.to_string(),
        })?;
      if !response.ok() {
        return Err(WorkerError::Precache {
          url: request.url.to_string(),
          reason: format!("status {}", response.status),
        });
      }
      entries.push((request.cache_key(), response));
    }
    Ok(entries)
  }

  /// Take control and delete every cache from other versions. Returns the deleted names.
  pub fn activate(&mut self) -> Vec<String> {
    if self.state != WorkerState::Waiting {
      debug!("Ignoring activate in state {:?}", self.state);
      return Vec::new();
    }
    self.state = WorkerState::Activating;
    let keep = [self.settings.shell_cache(), self.settings.runtime_cache()];
    let stale: Vec<String> = self
      .caches
      .keys()
      .into_iter()
      .filter(|name| !keep.contains(name))
      .collect();
    for name in &stale {
      self.caches.delete(name);
      info!("Deleted stale cache {}", name);
    }
    self.state = WorkerState::Active;
    stale
  }

  /// Page-to-worker messages. Returns whether the message was understood.
  pub fn handle_message(&mut self, message: &Value) -> bool {
    if message.get("type").and_then(Value::as_str) != Some(SKIP_WAITING) {
      return false;
    }
    self.skip_waiting = true;
    if self.state == WorkerState::Waiting {
      self.activate();
    }
    true
  }

  /// Every page using the previous worker has closed.
  pub fn clients_closed(&mut self) {
    if self.state == WorkerState::Waiting {
      self.activate();
    }
  }

  /// Intercept a request. `None` means it goes to the network untouched,
  /// which is also the case until the controller is active.
  pub async fn fetch(&self, request: &Request) -> Option<FetchResult> {
    if self.state != WorkerState::Active {
      return None;
    }
    self.strategies.handle(request).await
  }

  /// Wait for background cache refreshes.
  pub async fn settle(&self) {
    self.strategies.settle().await;
  }
}


#[cfg(test)]
mod tests {
  use super::mock::MockNetwork;
  use super::*;
  use serde_json::json;

  const ORIGIN: &str = "https://sketch.example";
  const BASE: &str = "https://sketch.example/apps/graph/";

  fn settings(version: &str) -> WorkerSettings {
    WorkerSettings::new(version, ORIGIN, "/apps/graph").unwrap()
  }

  fn url(path: &str) -> Url {
    Url::parse(&format!("{}{}", BASE, path)).unwrap()
  }

  async fn active(network: Arc<MockNetwork>) -> OfflineCacheController {
    let mut worker = OfflineCacheController::new(
      settings("v12"),
      Arc::new(CacheStorage::new()),
      network,
    );
    worker.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Active);
    worker
  }

  #[test]
  fn test_settings_resolve_against_scope() {
    let s = settings("v12");
    assert_eq!(s.scope_path, "/apps/graph/");
    assert_eq!(s.offline_path(), "/apps/graph/offline.html");
    assert_eq!(s.with_base("/index.html"), "/apps/graph/index.html");
    assert_eq!(s.shell_cache(), "graph-sketch-shell-v12");
    assert_eq!(s.runtime_cache(), "graph-sketch-runtime-v12");
    assert!(s
      .precache_paths()
      .contains(&"/apps/graph/health/index.html".to_string()));

    let root = WorkerSettings::new("v1", ORIGIN, "").unwrap();
    assert_eq!(root.with_base("offline.html"), "/offline.html");
    assert!(WorkerSettings::new("v1", "not a url", "/").is_err());
  }

  #[tokio::test]
  async fn test_install_populates_shell_cache() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let worker = active(network).await;
    assert_eq!(worker.caches().len(&s.shell_cache()), 8);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::new());
    // Everything but the icons.
    for path in ["index.html", "offline.html", "manifest.json", "styles.css"] {
      network.serve(url(path).as_str(), path);
    }
    let caches = Arc::new(CacheStorage::new());
    let mut worker = OfflineCacheController::new(s.clone(), Arc::clone(&caches), network);

    let err = worker.install().await.unwrap_err();
    assert!(matches!(err, WorkerError::Precache { .. }));
    assert_eq!(worker.state(), WorkerState::Redundant);
    assert!(!caches.has(&s.shell_cache()));
    assert!(worker.fetch(&Request::navigate(url(""))).await.is_none());
  }

  #[tokio::test]
  async fn test_install_fails_when_offline() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    network.set_online(false);
    let mut worker = OfflineCacheController::new(s, Arc::new(CacheStorage::new()), network);
    assert!(worker.install().await.is_err());
    assert_eq!(worker.state(), WorkerState::Redundant);
  }

  #[tokio::test]
  async fn test_upgrade_purges_old_generation() {
    let caches = Arc::new(CacheStorage::new());
    let old = settings("v11");
    let old_net = Arc::new(MockNetwork::with_shell(&old, "v11"));
    let mut first = OfflineCacheController::new(old.clone(), Arc::clone(&caches), old_net);
    first.install().await.unwrap();
    caches.put(&old.runtime_cache(), "https://sketch.example/x", Response::empty("text/plain"));
    caches.open("someone-elses-cache");

    let new = settings("v12");
    let new_net = Arc::new(MockNetwork::with_shell(&new, "v12"));
    let mut second =
      OfflineCacheController::new(new.clone(), Arc::clone(&caches), new_net).wait_for_clients();
    second.install().await.unwrap();
    assert_eq!(second.state(), WorkerState::Waiting);
    assert_eq!(caches.keys().len(), 4);

    assert!(!second.handle_message(&json!({"type": "PING"})));
    assert!(second.handle_message(&json!({"type": SKIP_WAITING})));
    assert_eq!(second.state(), WorkerState::Active);
    assert_eq!(caches.keys(), vec![new.shell_cache()]);

    let page = second.fetch(&Request::get(url("index.html"))).await.unwrap();
    assert_eq!(page.response.body, b"v12 /apps/graph/index.html");
  }

  #[tokio::test]
  async fn test_waiting_worker_activates_when_clients_close() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let mut worker =
      OfflineCacheController::new(s, Arc::new(CacheStorage::new()), network).wait_for_clients();
    worker.install().await.unwrap();
    assert!(worker.fetch(&Request::navigate(url(""))).await.is_none());
    worker.clients_closed();
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_navigation_is_network_first() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    network.serve(url("sketches").as_str(), "live page");
    let worker = active(Arc::clone(&network)).await;

    let live = worker.fetch(&Request::navigate(url("sketches"))).await.unwrap();
    assert_eq!(live.source, ResponseSource::Network);
    assert_eq!(live.response.body, b"live page");

    network.set_online(false);
    let cached = worker.fetch(&Request::navigate(url("sketches"))).await.unwrap();
    assert_eq!(cached.source, ResponseSource::Cache);
    assert_eq!(cached.response.body, b"live page");
  }

  #[tokio::test]
  async fn test_offline_navigation_fallback_order() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let worker = active(Arc::clone(&network)).await;
    network.set_online(false);

    let health = worker.fetch(&Request::navigate(url("health/"))).await.unwrap();
    assert_eq!(health.source, ResponseSource::HealthPage);
    assert_eq!(health.response.body, b"v12 /apps/graph/health/index.html");

    let shell = worker.fetch(&Request::navigate(url("never/seen"))).await.unwrap();
    assert_eq!(shell.source, ResponseSource::AppShell);

    let index = url("index.html");
    worker.caches().delete(&s.shell_cache());
    worker
      .caches()
      .put(&s.runtime_cache(), url("offline.html").as_str(), Response::empty("text/html"));
    let offline = worker.fetch(&Request::navigate(url("never/seen"))).await.unwrap();
    assert_eq!(offline.source, ResponseSource::OfflinePage);
    assert!(worker.caches().match_any(index.as_str()).is_none());
  }

  #[tokio::test]
  async fn test_precache_and_assets_fall_back_to_offline_page() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    network.serve(url("assets/index-1.js").as_str(), "bundle");
    let worker = active(Arc::clone(&network)).await;

    let styles = worker.fetch(&Request::get(url("styles.css"))).await.unwrap();
    assert_eq!((styles.route, styles.source), (Route::Precache, ResponseSource::Cache));

    let bundle = worker.fetch(&Request::get(url("assets/index-1.js"))).await.unwrap();
    assert_eq!(bundle.source, ResponseSource::Network);
    assert!(worker
      .caches()
      .match_in(&s.runtime_cache(), url("assets/index-1.js").as_str())
      .is_some());

    network.set_online(false);
    let again = worker.fetch(&Request::get(url("assets/index-1.js"))).await.unwrap();
    assert_eq!(again.source, ResponseSource::Cache);

    let missing = worker.fetch(&Request::get(url("assets/index-2.js"))).await.unwrap();
    assert_eq!(missing.source, ResponseSource::OfflinePage);
    assert_eq!(missing.response.body, b"v12 /apps/graph/offline.html");
  }

  #[tokio::test]
  async fn test_fonts_never_fail() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let worker = active(Arc::clone(&network)).await;
    network.set_online(false);

    let css = Request::get(Url::parse("https://fonts.googleapis.com/css2?family=Material").unwrap());
    let result = worker.fetch(&css).await.unwrap();
    assert_eq!(result.source, ResponseSource::EmptyFont);
    assert_eq!(result.response.status, 200);
    assert_eq!(result.response.content_type.as_deref(), Some("text/css"));

    let font = Request::get(Url::parse("https://fonts.gstatic.com/s/a.woff2").unwrap())
      .with_destination(Destination::Font);
    let result = worker.fetch(&font).await.unwrap();
    assert_eq!(
      result.response.content_type.as_deref(),
      Some("application/octet-stream")
    );
  }

  #[tokio::test]
  async fn test_cross_origin_passes_through() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let worker = active(Arc::clone(&network)).await;
    let calls = network.calls();
    let request = Request::get(Url::parse("https://tiles.other.example/1/2/3.png").unwrap());
    assert!(worker.fetch(&request).await.is_none());
    assert_eq!(network.calls(), calls);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_serves_cache_then_refreshes() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    network.serve(url("data/layers.json").as_str(), "first");
    let worker = active(Arc::clone(&network)).await;
    let request = Request::get(url("data/layers.json"));

    let first = worker.fetch(&request).await.unwrap();
    assert_eq!(first.source, ResponseSource::Network);

    network.serve(url("data/layers.json").as_str(), "second");
    let stale = worker.fetch(&request).await.unwrap();
    assert_eq!(stale.source, ResponseSource::Cache);
    assert_eq!(stale.response.body, b"first");
    worker.settle().await;

    network.set_online(false);
    let refreshed = worker.fetch(&request).await.unwrap();
    assert_eq!(refreshed.response.body, b"second");
    worker.settle().await;

    let nothing = worker.fetch(&Request::get(url("data/other.json"))).await.unwrap();
    assert_eq!(nothing.source, ResponseSource::OfflinePage);
  }

  #[tokio::test]
  async fn test_missing_offline_page_still_answers() {
    let s = settings("v12");
    let network = Arc::new(MockNetwork::with_shell(&s, "v12"));
    let worker = active(Arc::clone(&network)).await;
    worker.caches().delete(&s.shell_cache());
    network.set_online(false);

    let result = worker.fetch(&Request::get(url("data/x.json"))).await.unwrap();
    assert_eq!(result.source, ResponseSource::Unavailable);
    assert_eq!(result.response.status, 503);
  }
}
