//! Time-bounded cache of product catalogs per (region, architecture).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::types::{Architecture, ProductDescriptor};

type Key = (String, Architecture);

#[derive(Clone)]
pub struct ProductCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<Key, (Instant, Arc<Vec<ProductDescriptor>>)>>>,
}

impl ProductCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Key, (Instant, Arc<Vec<ProductDescriptor>>)>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cached products for the key, loading them when missing or expired.
    ///
    /// Concurrent misses may both load; the last one to finish wins.
    pub async fn get_or_load<F, Fut>(
        &self,
        region: &str,
        architecture: Architecture,
        load: F,
    ) -> Result<Arc<Vec<ProductDescriptor>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ProductDescriptor>>>,
    {
        let key = (region.to_string(), architecture);
        if let Some((loaded_at, products)) = self.entries().get(&key) {
            if loaded_at.elapsed() < self.ttl {
                return Ok(products.clone());
            }
        }

        debug!(region, %architecture, "loading product catalog");
        let products = Arc::new(load().await?);
        self.entries()
            .insert(key, (Instant::now(), products.clone()));
        Ok(products)
    }
}
