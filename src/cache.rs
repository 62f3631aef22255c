use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compiler::CompiledSchema;
use crate::matcher::MatchedOperation;
use crate::wsdl::ServiceModel;
use crate::xml::QName;

/// Cache configuration
///
/// Capacities and expiry are optional: by default both caches are unbounded
/// and entries live until explicitly invalidated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of service models kept
    pub max_service_models: Option<u64>,
    /// Maximum number of compiled schemas kept
    pub max_schemas: Option<u64>,
    /// Time-to-live for both caches in seconds
    pub ttl_seconds: Option<u64>,
}

fn build_cache<K, V>(max_capacity: Option<u64>, ttl_seconds: Option<u64>) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let mut builder = Cache::<K, V>::builder();
    if let Some(max_capacity) = max_capacity {
        builder = builder.max_capacity(max_capacity);
    }
    if let Some(ttl) = ttl_seconds {
        builder = builder.time_to_live(Duration::from_secs(ttl));
    }
    builder.build()
}

/// Compiled schema cache key: one slot per API, service and operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    api_id: String,
    service: QName,
    operation: QName,
}

impl SchemaKey {
    pub fn new(api_id: impl Into<String>, matched: &MatchedOperation) -> Self {
        Self {
            api_id: api_id.into(),
            service: matched.service().name().clone(),
            operation: matched.operation().name().clone(),
        }
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    pub fn service(&self) -> &QName {
        &self.service
    }

    pub fn operation(&self) -> &QName {
        &self.operation
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.api_id, self.service, self.operation)
    }
}

/// Service models keyed by API identifier
///
/// Uses `moka` for concurrent access and thundering-herd protection: a model
/// is built once even when many messages for the same API miss at once.
pub struct ServiceModelCache {
    cache: Cache<String, Arc<ServiceModel>>,
}

impl ServiceModelCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: build_cache(config.max_service_models, config.ttl_seconds),
        }
    }

    /// Get a service model from the cache, or build it if missing.
    ///
    /// The `loader` future only runs for the first caller; concurrent callers
    /// for the same key wait for it and share its result. A failure is not
    /// cached.
    pub async fn get_or_load<F, Fut, E>(&self, api_id: &str, loader: F) -> Result<Arc<ServiceModel>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<ServiceModel>, E>>,
        E: Send + Sync + Clone + 'static,
    {
        self.cache
            .try_get_with(api_id.to_string(), loader())
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn get(&self, api_id: &str) -> Option<Arc<ServiceModel>> {
        self.cache.get(api_id).await
    }

    pub async fn invalidate(&self, api_id: &str) {
        self.cache.invalidate(api_id).await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

/// Compiled schemas keyed by [`SchemaKey`]
pub struct CompiledSchemaCache {
    cache: Cache<SchemaKey, CompiledSchema>,
}

impl CompiledSchemaCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: build_cache(config.max_schemas, config.ttl_seconds),
        }
    }

    /// Get a compiled schema, or compile it exactly once if missing.
    pub async fn get_or_load<F, Fut, E>(&self, key: SchemaKey, loader: F) -> Result<CompiledSchema, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CompiledSchema, E>>,
        E: Send + Sync + Clone + 'static,
    {
        self.cache
            .try_get_with(key, loader())
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn get(&self, key: &SchemaKey) -> Option<CompiledSchema> {
        self.cache.get(key).await
    }

    /// Drop every schema compiled for `api_id`
    pub async fn invalidate_api(&self, api_id: &str) -> usize {
        let stale: Vec<SchemaKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.api_id() == api_id)
            .map(|(key, _)| (*key).clone())
            .collect();

        for key in &stale {
            self.cache.invalidate(key).await;
        }
        stale.len()
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

/// Both resolution caches, created once and shared by every resolver call
pub struct ResolverCache {
    service_models: ServiceModelCache,
    schemas: CompiledSchemaCache,
}

impl ResolverCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            service_models: ServiceModelCache::new(&config),
            schemas: CompiledSchemaCache::new(&config),
        }
    }

    pub fn service_models(&self) -> &ServiceModelCache {
        &self.service_models
    }

    pub fn schemas(&self) -> &CompiledSchemaCache {
        &self.schemas
    }

    /// Forget the service model and all compiled schemas of one API.
    ///
    /// The next message for that API rebuilds both from the registry.
    pub async fn invalidate_api(&self, api_id: &str) {
        self.service_models.invalidate(api_id).await;
        let schemas = self.schemas.invalidate_api(api_id).await;
        debug!(api_id, schemas, "API cache entries invalidated");
    }
}

impl Default for ResolverCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
