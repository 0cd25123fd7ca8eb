use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    routes::RouteTable,
    upstream::{fetch_with_timeout, FetchOptions, UpstreamClient, UpstreamError},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTier {
    Green,
    Yellow,
    Red,
    #[serde(other)]
    Unknown,
}

impl StatusTier {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Green => "Green",
            Self::Yellow => "Yellow",
            Self::Red => "Red",
            Self::Unknown => "Unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStatus {
    #[serde(default)]
    pub endpoint: String,
    pub method: String,
    #[serde(rename = "route")]
    pub path: String,
    pub status: StatusTier,
}

impl RouteStatus {
    pub fn new(method: &str, path: &str, status: StatusTier) -> Self {
        Self { endpoint: String::new(), method: method.to_owned(), path: path.to_owned(), status }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub version: String,
    pub fetched_at: DateTime<Utc>,
    pub etag: Option<String>,
    pub entries: Vec<RouteStatus>,
}

impl RouteSnapshot {
    pub fn new(version: &str, etag: Option<String>, entries: Vec<RouteStatus>) -> Self {
        Self { version: version.to_owned(), fetched_at: Utc::now(), etag, entries }
    }

    pub fn with_tier(&self, tier: StatusTier) -> Vec<&RouteStatus> {
        self.entries.iter().filter(|entry| entry.status == tier).collect()
    }

    pub fn count_tier(&self, tier: StatusTier) -> usize {
        self.entries.iter().filter(|entry| entry.status == tier).count()
    }
}

/// Path-level difference between two snapshots of the same version.
///
/// Only `path` is compared, so a method or status change on an existing path is invisible here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl RouteDelta {
    pub fn between(old: &RouteSnapshot, new: &RouteSnapshot) -> Self {
        let old_paths = old.entries.iter().map(|entry| entry.path.as_str()).collect::<BTreeSet<_>>();
        let new_paths = new.entries.iter().map(|entry| entry.path.as_str()).collect::<BTreeSet<_>>();

        Self {
            added: new_paths.difference(&old_paths).map(|path| (*path).to_owned()).collect(),
            removed: old_paths.difference(&new_paths).map(|path| (*path).to_owned()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.added
            .iter()
            .map(|path| format!("+ {path}"))
            .chain(self.removed.iter().map(|path| format!("- {path}")))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("route status payload for version `{version}` could not be parsed: {message}")]
    Parse { version: String, message: String },
    #[error("upstream reported no change for version `{0}` but nothing is cached")]
    MissingSnapshot(String),
}

#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    pub snapshot: Arc<RouteSnapshot>,
    pub previous: Option<Arc<RouteSnapshot>>,
    pub changed: bool,
}

impl RefreshOutcome {
    /// `None` unless the refresh replaced an existing snapshot.
    pub fn delta(&self) -> Option<RouteDelta> {
        if !self.changed {
            return None;
        }
        self.previous.as_ref().map(|previous| RouteDelta::between(previous, &self.snapshot))
    }
}

struct TrackedTable {
    table: Arc<RouteTable>,
    version: String,
}

/// Versioned, ETag-aware cache of upstream route health.
pub struct StatusCache {
    client: Arc<dyn UpstreamClient>,
    timeout: Duration,
    snapshots: ArcSwap<HashMap<String, Arc<RouteSnapshot>>>,
    checked_at: ArcSwap<HashMap<String, Instant>>,
    max_age: Option<Duration>,
    tracked: Option<TrackedTable>,
    refresh_lock: Mutex<()>,
}

impl StatusCache {
    pub fn new(client: Arc<dyn UpstreamClient>, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            snapshots: ArcSwap::from_pointee(HashMap::new()),
            checked_at: ArcSwap::from_pointee(HashMap::new()),
            max_age: None,
            tracked: None,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Rebuilds `table` every time a new snapshot for `version` is stored.
    pub fn with_route_table(mut self, table: Arc<RouteTable>, version: impl Into<String>) -> Self {
        self.tracked = Some(TrackedTable { table, version: version.into() });
        self
    }

    /// Snapshots last confirmed longer than `max_age` ago are revalidated by `get_or_refresh`.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn get(&self, version: &str) -> Option<Arc<RouteSnapshot>> {
        self.snapshots.load().get(version).cloned()
    }

    /// True once `version` has gone unconfirmed by the upstream for longer than the max age.
    pub fn is_stale(&self, version: &str) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        match self.checked_at.load().get(version) {
            Some(checked) => checked.elapsed() >= max_age,
            None => true,
        }
    }

    pub fn insert(&self, snapshot: RouteSnapshot) -> Arc<RouteSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.store(Arc::clone(&snapshot));
        snapshot
    }

    /// Serves the cached snapshot while fresh and revalidates it once stale.
    ///
    /// A failed revalidation falls back to the stale snapshot; only a cold miss surfaces the error.
    pub async fn get_or_refresh(&self, version: &str) -> Result<Arc<RouteSnapshot>, StatusError> {
        let cached = self.get(version);
        if let Some(snapshot) = &cached {
            if !self.is_stale(version) {
                return Ok(Arc::clone(snapshot));
            }
        }

        match (self.refresh(version).await, cached) {
            (Ok(outcome), _) => Ok(outcome.snapshot),
            (Err(error), Some(stale)) => {
                warn!(
                    event_name = "upstream.status.serving_stale",
                    version,
                    fetched_at = %stale.fetched_at.to_rfc3339(),
                    error = %error,
                    "route status revalidation failed; serving cached snapshot"
                );
                Ok(stale)
            }
            (Err(error), None) => Err(error),
        }
    }

    /// Conditionally refetches `version`. Failures leave the cached snapshot untouched.
    pub async fn refresh(&self, version: &str) -> Result<RefreshOutcome, StatusError> {
        let _guard = self.refresh_lock.lock().await;

        let previous = self.get(version);
        let known_etag = previous.as_ref().and_then(|snapshot| snapshot.etag.clone());
        let path = status_path(version);

        debug!(
            event_name = "upstream.status.refresh_requested",
            version,
            if_none_match = known_etag.as_deref().unwrap_or("none"),
            "refreshing route status"
        );

        let response = match fetch_with_timeout(
            self.client.as_ref(),
            &path,
            FetchOptions::conditional(known_etag.as_deref()),
            self.timeout,
        )
        .await
        {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    event_name = "upstream.status.refresh_failed",
                    version,
                    error = %error,
                    "route status refresh failed; keeping last known snapshot"
                );
                return Err(error.into());
            }
        };

        // the upstream sometimes answers 200 with the same etag instead of 304
        let same_etag = matches!(
            (&known_etag, &response.etag),
            (Some(known), Some(received)) if known == received
        );
        if response.is_not_modified() || same_etag {
            let Some(snapshot) = previous else {
                return Err(StatusError::MissingSnapshot(version.to_owned()));
            };
            debug!(
                event_name = "upstream.status.not_modified",
                version,
                status = response.status,
                "route status unchanged"
            );
            self.mark_checked(version);
            return Ok(RefreshOutcome {
                snapshot: Arc::clone(&snapshot),
                previous: Some(snapshot),
                changed: false,
            });
        }

        let entries = serde_json::from_slice::<Vec<RouteStatus>>(&response.body).map_err(
            |error| StatusError::Parse { version: version.to_owned(), message: error.to_string() },
        )?;
        let snapshot = Arc::new(RouteSnapshot::new(version, response.etag, entries));
        self.store(Arc::clone(&snapshot));

        info!(
            event_name = "upstream.status.snapshot_stored",
            version,
            routes = snapshot.entries.len(),
            etag = snapshot.etag.as_deref().unwrap_or("none"),
            "stored new route status snapshot"
        );

        Ok(RefreshOutcome { snapshot, previous, changed: true })
    }

    fn store(&self, snapshot: Arc<RouteSnapshot>) {
        let version = snapshot.version.clone();
        self.snapshots.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(version.clone(), Arc::clone(&snapshot));
            next
        });
        self.mark_checked(&version);

        if let Some(tracked) = &self.tracked {
            if tracked.version == version {
                let templates = tracked.table.rebuild(&snapshot);
                debug!(
                    event_name = "routes.table.rebuilt",
                    version = %version,
                    templates,
                    "route table rebuilt from snapshot"
                );
            }
        }
    }

    fn mark_checked(&self, version: &str) {
        let now = Instant::now();
        self.checked_at.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(version.to_owned(), now);
            next
        });
    }
}

fn status_path(version: &str) -> String {
    format!("/status.json?version={version}")
}
