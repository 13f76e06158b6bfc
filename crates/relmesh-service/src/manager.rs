use std::sync::Arc;

use relmesh_core::engine::{CheckError, SchemaReader};
use relmesh_core::schema::{EntityDefinition, ParseError, SchemaDefinition, parse_schema};
use relmesh_storage::{SchemaStore, StorageError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaLoadError {
    #[error(transparent)]
    Store(#[from] StorageError),

    // Stored configs were validated on write; failing to parse one back is
    // an invariant violation, not caller error.
    #[error("stored config for entity '{entity}' failed to parse: {source}")]
    Corrupt {
        entity: String,
        #[source]
        source: ParseError,
    },

    #[error("stored config for entity '{entity}' does not define it")]
    Mismatched { entity: String },
}

struct CachedEntity {
    version: u64,
    definition: Arc<EntityDefinition>,
    cost: u32,
}

/// Resolves entity definitions by name through a bounded, cost-weighed cache.
///
/// Each entry is weighed by the serialized size of its stored config, and
/// concurrent misses for the same entity coalesce into a single store fetch
/// and parse. Schema writes invalidate at the granularity of one entity.
pub struct SchemaManager<S: SchemaStore> {
    store: Arc<S>,
    cache: moka::future::Cache<String, Arc<CachedEntity>>,
}

impl<S: SchemaStore + 'static> SchemaManager<S> {
    pub fn new(store: Arc<S>, max_cost_bytes: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_cost_bytes)
            .weigher(|_key: &String, entry: &Arc<CachedEntity>| entry.cost)
            .build();
        Self { store, cache }
    }

    /// Returns the definition of `name`, fetching and parsing on miss.
    pub async fn read(&self, name: &str) -> Result<Arc<EntityDefinition>, SchemaLoadError> {
        let entry = self
            .cache
            .try_get_with(name.to_string(), self.load(name))
            .await
            .map_err(|err: Arc<SchemaLoadError>| (*err).clone())?;
        Ok(Arc::clone(&entry.definition))
    }

    /// The schema version the cached entry for `name` was loaded at, if any.
    pub async fn cached_version(&self, name: &str) -> Option<u64> {
        self.cache.get(name).await.map(|entry| entry.version)
    }

    pub async fn invalidate(&self, name: &str) {
        self.cache.invalidate(name).await;
    }

    pub async fn invalidate_entities<I, N>(&self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        for name in names {
            self.cache.invalidate(name.as_ref()).await;
        }
    }

    async fn load(&self, name: &str) -> Result<Arc<CachedEntity>, SchemaLoadError> {
        let config = self.store.read_entity_config(name).await?;
        let ast = parse_schema(&config.serialized).map_err(|source| SchemaLoadError::Corrupt {
            entity: name.to_string(),
            source,
        })?;
        let definition = SchemaDefinition::from(&ast)
            .get_entity(name)
            .cloned()
            .ok_or_else(|| SchemaLoadError::Mismatched {
                entity: name.to_string(),
            })?;

        tracing::debug!(entity = name, version = config.version, "schema cache miss");
        Ok(Arc::new(CachedEntity {
            version: config.version,
            definition: Arc::new(definition),
            cost: config.serialized.len().max(1) as u32,
        }))
    }
}

impl<S: SchemaStore + 'static> SchemaReader for SchemaManager<S> {
    async fn entity(&self, name: &str) -> Result<Arc<EntityDefinition>, CheckError> {
        self.read(name).await.map_err(|err| match err {
            SchemaLoadError::Store(StorageError::NotFound(_)) => {
                CheckError::UndefinedEntity(name.to_string())
            }
            SchemaLoadError::Store(StorageError::Unavailable(message)) => {
                CheckError::Unavailable(message)
            }
            SchemaLoadError::Store(StorageError::CircuitOpen { retry_after_ms }) => {
                CheckError::Unavailable(format!("circuit open, retry after {retry_after_ms}ms"))
            }
            other => CheckError::Internal(other.to_string()),
        })
    }
}
