//! Cache-aware batched fetching.
//!
//! A page usually needs many resources of one kind (media items, authors).
//! [`BatchOperationExecutor::execute`] serves what it can from the cache and
//! fetches the rest with a single upstream call, caching what comes back.

use futures::future::{BoxFuture, FutureExt};
use resilience::telemetry::{category, TelemetryCollector};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::store::CacheManager;

/// Ids mapped to their item; `None` when neither cached nor fetched.
pub type BatchResult<Id, Item> = HashMap<Id, Option<Item>>;

pub type CacheKeyFn<Id> = dyn Fn(&Id) -> String + Send + Sync;

type FetchFn<Id, Item, E> =
    Box<dyn FnOnce(Vec<Id>, Option<CancellationToken>) -> BoxFuture<'static, Result<Vec<Item>, E>> + Send>;
type ExtractIdFn<Id, Item> = Box<dyn Fn(&Item) -> Id + Send + Sync>;
type OnSuccessFn<Id, Item> = Box<
    dyn Fn(&Item, &mut BatchResult<Id, Item>, &CacheManager, &CacheKeyFn<Id>, Duration) + Send + Sync,
>;
type OnErrorFn<Id, E> = Box<dyn FnOnce(&E, &[Id]) + Send>;

/// One batched lookup, assembled with a builder.
pub struct BatchOperation<Id, Item, E> {
    ids: Vec<Id>,
    cache_key: Box<CacheKeyFn<Id>>,
    cache_ttl: Duration,
    fetch: FetchFn<Id, Item, E>,
    extract_id: ExtractIdFn<Id, Item>,
    skip_zero: bool,
    on_success: Option<OnSuccessFn<Id, Item>>,
    on_error: Option<OnErrorFn<Id, E>>,
    signal: Option<CancellationToken>,
}

impl<Id, Item, E> BatchOperation<Id, Item, E>
where
    Id: Eq + Hash + Clone + Default + Send + Sync + 'static,
    Item: Clone + Send + Sync + 'static,
    E: Display + Send + 'static,
{
    /// `fetch` receives the ids that missed the cache, and the signal set
    /// with [`signal`](Self::signal). It is called at most once.
    pub fn new<K, F, Fut, X>(
        ids: impl IntoIterator<Item = Id>,
        cache_key: K,
        cache_ttl: Duration,
        fetch: F,
        extract_id: X,
    ) -> Self
    where
        K: Fn(&Id) -> String + Send + Sync + 'static,
        F: FnOnce(Vec<Id>, Option<CancellationToken>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Item>, E>> + Send + 'static,
        X: Fn(&Item) -> Id + Send + Sync + 'static,
    {
        Self {
            ids: ids.into_iter().collect(),
            cache_key: Box::new(cache_key),
            cache_ttl,
            fetch: Box::new(move |ids, signal| fetch(ids, signal).boxed()),
            extract_id: Box::new(extract_id),
            skip_zero: false,
            on_success: None,
            on_error: None,
            signal: None,
        }
    }

    /// Drop ids equal to `Id::default()` from input and output.
    pub fn skip_zero(mut self, skip: bool) -> Self {
        self.skip_zero = skip;
        self
    }

    /// Called once per fetched item, after it has been cached and recorded in
    /// the results. Edits the hook makes to the results are kept.
    pub fn on_success<S>(mut self, hook: S) -> Self
    where
        S: Fn(&Item, &mut BatchResult<Id, Item>, &CacheManager, &CacheKeyFn<Id>, Duration)
            + Send
            + Sync
            + 'static,
    {
        self.on_success = Some(Box::new(hook));
        self
    }

    /// Contain fetch failures: the hook sees the error and the missed ids,
    /// and every missed id resolves to `None`.
    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&E, &[Id]) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub fn signal(mut self, token: CancellationToken) -> Self {
        self.signal = Some(token);
        self
    }
}

/// Runs [`BatchOperation`]s against a shared cache.
#[derive(Debug, Clone)]
pub struct BatchOperationExecutor {
    cache: Arc<CacheManager>,
    telemetry: Option<Arc<TelemetryCollector>>,
}

impl BatchOperationExecutor {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self {
            cache,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryCollector>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub async fn execute<Id, Item, E>(
        &self,
        op: BatchOperation<Id, Item, E>,
    ) -> Result<BatchResult<Id, Item>, E>
    where
        Id: Eq + Hash + Clone + Default + Send + Sync + 'static,
        Item: Clone + Send + Sync + 'static,
        E: Display + Send + 'static,
    {
        let BatchOperation {
            ids,
            cache_key,
            cache_ttl,
            fetch,
            extract_id,
            skip_zero,
            on_success,
            on_error,
            signal,
        } = op;

        let zero = Id::default();
        let mut seen = HashSet::new();
        let unique: Vec<Id> = ids
            .into_iter()
            .filter(|id| !(skip_zero && *id == zero))
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let mut results: BatchResult<Id, Item> = HashMap::with_capacity(unique.len());
        let mut misses = Vec::new();
        for id in unique {
            match self.cache.get::<Item>(&cache_key(&id)) {
                Some(item) => {
                    results.insert(id, Some(item));
                }
                None => {
                    results.insert(id.clone(), None);
                    misses.push(id);
                }
            }
        }
        let hits = results.len() - misses.len();

        if misses.is_empty() {
            tracing::debug!(cache_hits = hits, "batch served from cache");
            self.record("batch_completed", hits, 0, 0);
            return Ok(results);
        }

        let miss_count = misses.len();
        match fetch(misses.clone(), signal).await {
            Ok(items) => {
                let requested: HashSet<&Id> = misses.iter().collect();
                let mut fetched = 0;
                for item in items {
                    let id = extract_id(&item);
                    if !requested.contains(&id) {
                        tracing::debug!("batch fetch returned an id that was not requested");
                        continue;
                    }
                    self.cache
                        .set(&cache_key(&id), item.clone(), cache_ttl, std::iter::empty::<&str>());
                    results.insert(id, Some(item.clone()));
                    if let Some(hook) = &on_success {
                        hook(&item, &mut results, &self.cache, cache_key.as_ref(), cache_ttl);
                    }
                    fetched += 1;
                }
                tracing::debug!(
                    cache_hits = hits,
                    cache_misses = miss_count,
                    fetched,
                    "batch fetched"
                );
                self.record("batch_completed", hits, miss_count, fetched);
                Ok(results)
            }
            Err(err) => {
                tracing::warn!(error = %err, cache_misses = miss_count, "batch fetch failed");
                self.record("fetch_failed", hits, miss_count, 0);
                match on_error {
                    Some(hook) => {
                        hook(&err, &misses);
                        Ok(results)
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn record(&self, event_type: &str, hits: usize, misses: usize, fetched: usize) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(
                event_type,
                category::BATCH,
                json!({
                    "cache_hits": hits,
                    "cache_misses": misses,
                    "fetched": fetched,
                }),
            );
        }
    }
}
