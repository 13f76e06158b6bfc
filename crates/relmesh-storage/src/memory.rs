use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use relmesh_core::tuple::{ObjectRef, Subject, Tuple, TupleFilter};

use crate::traits::{EntityConfig, SchemaStore, StorageError, TupleStore};

#[derive(Debug, Default)]
struct InnerState {
    tuples: Vec<Tuple>,
    configs: HashMap<String, EntityConfig>,
    schema_version: u64,
}

/// In-memory store backing both the tuple and the schema collections.
///
/// Cloning shares the underlying state, mirroring a pooled connection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sort_for_query(tuples: &mut [Tuple]) {
    tuples.sort_by(|a, b| {
        (&a.subject.entity, a.subject.relation_key(), &a.subject.object_id).cmp(&(
            &b.subject.entity,
            b.subject.relation_key(),
            &b.subject.object_id,
        ))
    });
}

impl TupleStore for InMemoryStore {
    async fn migrate(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn query_tuples(
        &self,
        object: &ObjectRef,
        relation: &str,
    ) -> Result<Vec<Tuple>, StorageError> {
        let state = self.state.lock().expect("store lock");
        let mut results: Vec<Tuple> = state
            .tuples
            .iter()
            .filter(|t| &t.object == object && t.relation == relation)
            .cloned()
            .collect();
        sort_for_query(&mut results);
        Ok(results)
    }

    async fn reverse_query_tuples(&self, subject: &Subject) -> Result<Vec<Tuple>, StorageError> {
        let state = self.state.lock().expect("store lock");
        let mut results: Vec<Tuple> = state
            .tuples
            .iter()
            .filter(|t| &t.subject == subject)
            .cloned()
            .collect();
        results.sort_by(|a, b| {
            (&a.object.entity, &a.relation, &a.object.object_id).cmp(&(
                &b.object.entity,
                &b.relation,
                &b.object.object_id,
            ))
        });
        Ok(results)
    }

    async fn read(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, StorageError> {
        let state = self.state.lock().expect("store lock");
        let mut results: Vec<Tuple> = state
            .tuples
            .iter()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        sort_for_query(&mut results);
        Ok(results)
    }

    async fn write(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        let mut state = self.state.lock().expect("store lock");

        // All-or-nothing: reject the whole batch before inserting anything.
        for (i, tuple) in tuples.iter().enumerate() {
            if tuples[i + 1..].contains(tuple) {
                return Err(StorageError::UniqueConstraint(tuple.canonical()));
            }
            if state.tuples.contains(tuple) {
                return Err(StorageError::UniqueConstraint(tuple.canonical()));
            }
        }

        state.tuples.extend_from_slice(tuples);
        Ok(tuples.len())
    }

    async fn delete(&self, tuples: &[Tuple]) -> Result<usize, StorageError> {
        let mut state = self.state.lock().expect("store lock");
        let before = state.tuples.len();
        state.tuples.retain(|t| !tuples.contains(t));
        Ok(before - state.tuples.len())
    }
}

impl SchemaStore for InMemoryStore {
    async fn migrate(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn write_entity_configs(&self, configs: &[EntityConfig]) -> Result<u64, StorageError> {
        let mut state = self.state.lock().expect("store lock");
        state.schema_version += 1;
        let version = state.schema_version;
        state.configs = configs
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    EntityConfig {
                        name: c.name.clone(),
                        serialized: c.serialized.clone(),
                        version,
                    },
                )
            })
            .collect();
        Ok(version)
    }

    async fn read_entity_config(&self, name: &str) -> Result<EntityConfig, StorageError> {
        let state = self.state.lock().expect("store lock");
        state
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("entity config '{name}'")))
    }

    async fn read_entity_configs(&self) -> Result<Vec<EntityConfig>, StorageError> {
        let state = self.state.lock().expect("store lock");
        let mut configs: Vec<EntityConfig> = state.configs.values().cloned().collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(configs)
    }
}
