use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use relmesh_core::tuple::{ObjectRef, Subject, Tuple, TupleFilter};

use crate::traits::{EntityConfig, SchemaStore, StorageError, TupleStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive transient failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing again.
    pub cooldown_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// Store decorator that converts repeated `Unavailable` failures into
/// fast-fail `CircuitOpen` for a cooldown window.
///
/// `closed -> open` after N consecutive failures, `open -> half_open`
/// after the cooldown, `half_open -> closed` on one success and back to
/// `open` on
/// any failure. The state is shared across both store traits of the wrapped
/// instance and guarded by a single lock.
#[derive(Debug)]
pub struct CircuitBreaker<S> {
    inner: S,
    settings: BreakerSettings,
    state: Mutex<BreakerState>,
}

impl<S> CircuitBreaker<S> {
    pub fn new(inner: S, settings: BreakerSettings) -> Self {
        Self {
            inner,
            settings,
            state: Mutex::new(BreakerState::Closed { failures: 0 }),
        }
    }

    fn admit(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("breaker lock");
        match *state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    *state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(StorageError::CircuitOpen {
                        retry_after_ms: (until - now).as_millis() as u64,
                    })
                }
            }
        }
    }

    fn record(&self, outcome: &Result<(), ()>) {
        let mut state = self.state.lock().expect("breaker lock");
        *state = match (*state, outcome) {
            (BreakerState::HalfOpen, Ok(())) => BreakerState::Closed { failures: 0 },
            (BreakerState::HalfOpen, Err(())) => BreakerState::Open {
                until: Instant::now() + Duration::from_millis(self.settings.cooldown_ms),
            },
            (BreakerState::Closed { .. }, Ok(())) => BreakerState::Closed { failures: 0 },
            (BreakerState::Closed { failures }, Err(())) => {
                let failures = failures + 1;
                if failures >= self.settings.failure_threshold {
                    tracing::warn!(failures, "circuit opened");
                    BreakerState::Open {
                        until: Instant::now() + Duration::from_millis(self.settings.cooldown_ms),
                    }
                } else {
                    BreakerState::Closed { failures }
                }
            }
            (open @ BreakerState::Open { .. }, _) => open,
        };
    }

    async fn guard<T, Fut>(&self, fut: Fut) -> Result<T, StorageError>
    where
        Fut: Future<Output = Result<T, StorageError>>,
    {
        self.admit()?;
        let result = fut.await;
        match &result {
            Ok(_) => self.record(&Ok(())),
            // Only transient faults count against the breaker.
            Err(err) if err.is_transient() => self.record(&Err(())),
            Err(_) => self.record(&Ok(())),
        }
        result
    }
}

impl<S: TupleStore> TupleStore for CircuitBreaker<S> {
    async fn migrate(&self) -> Result<(), StorageError> {
        self.guard(TupleStore::migrate(&self.inner)).await
    }

    async fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Tuple>, StorageError> {
        self.guard(self.inner.query_tuples(object, relation)).await
    }

    async fn reverse_query_tuples(&self, subject: &Subject) -> Result<Vec<Tuple>, StorageError> {
        self.guard(self.inner.reverse_query_tuples(subject)).await
    }

    async fn read(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, StorageError> {
        self.guard(self.inner.read(filter)).await
    }

    async fn write(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        self.guard(self.inner.write(tuples)).await
    }

    async fn delete(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        self.guard(self.inner.delete(tuples)).await
    }
}

impl<S: SchemaStore> SchemaStore for CircuitBreaker<S> {
    async fn migrate(&self) -> Result<(), StorageError> {
        self.guard(SchemaStore::migrate(&self.inner)).await
    }

    async fn write_entity_configs(&self, configs: &[EntityConfig]) -> Result<u64, StorageError> {
        self.guard(self.inner.write_entity_configs(configs)).await
    }

    async fn read_entity_config(&self, name: &str) -> Result<EntityConfig, StorageError> {
        self.guard(self.inner.read_entity_config(name)).await
    }

    async fn read_entity_configs(&self) -> Result<Vec<EntityConfig>, StorageError> {
        self.guard(self.inner.read_entity_configs()).await
    }
}
