//! Request deduplication: collapse concurrent identical operations.
//!
//! The first caller for a key starts the operation; every concurrent caller
//! with the same key awaits the same shared future and observes the same
//! resolution or rejection. Once started, the operation runs to completion
//! even if every caller is dropped. Entries are removed a TTL after
//! completion, so a later call re-executes instead of reusing a stale
//! settled result. This bounds duplicate side-effecting calls
//! (double-submits) without caching results indefinitely.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tracing::debug;

use crate::error::{DomainError, ErrorCode, Result};

// Results are type-erased so one pending map serves every response type;
// callers recover the concrete type on the way out.
type Payload = Arc<dyn Any + Send + Sync>;
type SharedCall = Shared<BoxFuture<'static, std::result::Result<Payload, DomainError>>>;

pub struct Deduplicator {
    pending: Arc<DashMap<String, SharedCall>>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Number of keys currently tracked (in flight or within their TTL).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Execute `operation` under `key`, joining an identical in-flight call
    /// if one exists. The entry lingers for `ttl` after completion.
    pub async fn dedupe<T, F, Fut>(&self, key: &str, ttl: Duration, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!(key, "joining in-flight request");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let fut = operation();
                let wrapped: BoxFuture<'static, std::result::Result<Payload, DomainError>> =
                    async move { fut.await.map(|value| Arc::new(value) as Payload) }.boxed();
                let shared = wrapped.shared();
                slot.insert(shared.clone());
                // The cleanup task drives the shared future itself, so the
                // operation settles and the entry expires even if every
                // joiner is dropped mid-flight. The entry stays visible for
                // the TTL so trailing duplicates join the settled result.
                let pending = self.pending.clone();
                let cleanup_key = key.to_string();
                let settle = shared.clone();
                tokio::spawn(async move {
                    let _ = settle.await;
                    tokio::time::sleep(ttl).await;
                    pending.remove(&cleanup_key);
                });
                shared
            }
        };

        let payload = shared.await?;
        payload
            .downcast::<T>()
            .map(|value| (*value).clone())
            .map_err(|_| {
                DomainError::new(
                    ErrorCode::Unknown,
                    format!("deduplicated result for '{key}' resolved to a different type"),
                )
            })
    }
}
