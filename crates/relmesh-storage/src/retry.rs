use std::future::Future;
use std::time::Duration;

use rand::Rng;
use relmesh_core::tuple::{ObjectRef, Subject, Tuple, TupleFilter};

use crate::traits::{EntityConfig, SchemaStore, StorageError, TupleStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
        }
    }
}

/// Store decorator that retries transient failures with exponential backoff
/// and jitter. Non-transient errors pass through untouched.
#[derive(Debug)]
pub struct Retry<S> {
    inner: S,
    settings: RetrySettings,
}

impl<S> Retry<S> {
    pub fn new(inner: S, settings: RetrySettings) -> Self {
        Self { inner, settings }
    }

    async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StorageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.settings.max_retries => {
                    let backoff = self
                        .settings
                        .base_delay_ms
                        .saturating_mul(1 << attempt.min(16))
                        .min(self.settings.max_delay_ms);
                    let jitter = rand::rng().random_range(0..=self.settings.base_delay_ms);
                    tracing::debug!(attempt, backoff_ms = backoff + jitter, %err, "retrying store call");
                    tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<S: TupleStore> TupleStore for Retry<S> {
    async fn migrate(&self) -> Result<(), StorageError> {
        self.run(|| TupleStore::migrate(&self.inner)).await
    }

    async fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Tuple>, StorageError> {
        self.run(|| self.inner.query_tuples(object, relation)).await
    }

    async fn reverse_query_tuples(&self, subject: &Subject) -> Result<Vec<Tuple>, StorageError> {
        self.run(|| self.inner.reverse_query_tuples(subject)).await
    }

    async fn read(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, StorageError> {
        self.run(|| self.inner.read(filter)).await
    }

    async fn write(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        self.run(|| self.inner.write(tuples)).await
    }

    async fn delete(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        self.run(|| self.inner.delete(tuples)).await
    }
}

impl<S: SchemaStore> SchemaStore for Retry<S> {
    async fn migrate(&self) -> Result<(), StorageError> {
        self.run(|| SchemaStore::migrate(&self.inner)).await
    }

    async fn write_entity_configs(&self, configs: &[EntityConfig]) -> Result<u64, StorageError> {
        self.run(|| self.inner.write_entity_configs(configs)).await
    }

    async fn read_entity_config(&self, name: &str) -> Result<EntityConfig, StorageError> {
        self.run(|| self.inner.read_entity_config(name)).await
    }

    async fn read_entity_configs(&self) -> Result<Vec<EntityConfig>, StorageError> {
        self.run(|| self.inner.read_entity_configs()).await
    }
}
