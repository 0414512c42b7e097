use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{NaiveDateTime, TimeDelta};
use schema::SearchHit;
use serde_json::Value;
use tracing::debug;
use views::{ViewClient, ViewError, ViewQuery};

use crate::{
    aggregate::{Source, query_source},
    error::FlowcellError,
};

pub const ID_VIEW: &str = "info/id";
pub const DEFAULT_SEARCH_CACHE_TTL: Duration = Duration::from_secs(180);

/// Identifier keys of both databases, newest first, as of `fetched_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIdentifiers {
    pub legacy: Vec<Value>,
    pub current: Vec<Value>,
    pub fetched_at: NaiveDateTime,
}

/// Identifier lists shared by every search request.
///
/// Readers clone an `Arc` to a complete snapshot; a refresh builds the new
/// snapshot off-lock and swaps it in, so a half-filled list is never seen.
/// Concurrent requests that see a stale snapshot may each refresh.
#[derive(Debug)]
pub struct SearchCache {
    ttl: TimeDelta,
    snapshot: RwLock<Option<Arc<CachedIdentifiers>>>,
    refresh_total: AtomicU64,
    hit_total: AtomicU64,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_CACHE_TTL)
    }
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            snapshot: RwLock::new(None),
            refresh_total: AtomicU64::new(0),
            hit_total: AtomicU64::new(0),
        }
    }

    pub fn refresh_total(&self) -> u64 {
        self.refresh_total.load(Ordering::Relaxed)
    }

    pub fn hit_total(&self) -> u64 {
        self.hit_total.load(Ordering::Relaxed)
    }

    /// Returns the cached identifiers, refetching both lists first when the
    /// cache is empty or older than the ttl.
    pub fn identifiers(
        &self,
        views: &dyn ViewClient,
        now: NaiveDateTime,
    ) -> Result<Arc<CachedIdentifiers>, ViewError> {
        if let Some(fresh) = self.fresh_snapshot(now) {
            self.hit_total.fetch_add(1, Ordering::Relaxed);
            return Ok(fresh);
        }

        let refreshed = Arc::new(fetch_identifiers(views, now)?);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = Some(Arc::clone(&refreshed)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::clone(&refreshed)),
        }
        self.refresh_total.fetch_add(1, Ordering::Relaxed);
        debug!(
            legacy = refreshed.legacy.len(),
            current = refreshed.current.len(),
            "flowcell search cache refreshed"
        );
        Ok(refreshed)
    }

    fn fresh_snapshot(&self, now: NaiveDateTime) -> Option<Arc<CachedIdentifiers>> {
        let guard = self.snapshot.read().ok()?;
        let cached = guard.as_ref()?;
        if now.signed_duration_since(cached.fetched_at) > self.ttl {
            return None;
        }
        Some(Arc::clone(cached))
    }
}

fn fetch_identifiers(
    views: &dyn ViewClient,
    now: NaiveDateTime,
) -> Result<CachedIdentifiers, ViewError> {
    let keys = |source| -> Result<Vec<Value>, ViewError> {
        Ok(query_source(views, source, ID_VIEW, &ViewQuery::new().descending())?
            .into_iter()
            .map(|row| row.key)
            .collect())
    };
    Ok(CachedIdentifiers {
        legacy: keys(Source::Legacy)?,
        current: keys(Source::Current)?,
        fetched_at: now,
    })
}

/// Case-insensitive substring search over cached identifiers. Current
/// database hits come before legacy hits.
pub fn search_flowcells(
    cache: &SearchCache,
    views: &dyn ViewClient,
    query: &str,
    now: NaiveDateTime,
) -> Result<Vec<SearchHit>, FlowcellError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let identifiers = cache.identifiers(views, now)?;
    let needle = query.to_lowercase();

    let mut hits = Vec::new();
    for key in identifiers.current.iter().chain(identifiers.legacy.iter()) {
        let Some(identifier) = key.as_str() else {
            debug!(%key, "skipping non-string flowcell identifier");
            continue;
        };
        if !identifier.to_lowercase().contains(&needle) {
            continue;
        }
        hits.push(search_hit(identifier));
    }
    Ok(hits)
}

/// Links `DATE_..._POSITIONFLOWCELL` to `/flowcells/DATE_POSITIONFLOWCELL`.
/// An identifier without `_` is both its first and last segment.
pub fn search_hit(identifier: &str) -> SearchHit {
    let first = identifier.split('_').next().unwrap_or(identifier);
    let last = identifier.rsplit('_').next().unwrap_or(identifier);
    SearchHit {
        url: format!("/flowcells/{first}_{last}"),
        name: identifier.to_string(),
    }
}
