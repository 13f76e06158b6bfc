use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use relmesh_core::engine::{
    CheckEngine, CheckRequest, Decision, EngineConfig, ExpandEngine, ExpandRequest, ExpandTree,
    RequestContext,
};
use relmesh_core::schema::{SchemaDefinition, parse_schema, validate_schema};
use relmesh_core::tuple::{ObjectRef, Subject, Tuple, TupleFilter};
use relmesh_storage::{EntityConfig, SchemaStore, TupleStore};

use crate::adapter::StoreTupleReader;
use crate::audit;
use crate::error::ApiError;
use crate::manager::SchemaManager;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct CheckPermissionInput {
    /// `entity:object_id`, usually a user.
    pub subject: String,
    pub action: String,
    /// `entity:object_id` of the target object.
    pub object: String,
}

#[derive(Debug)]
pub struct CheckPermissionOutput {
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub struct ExpandPermissionInput {
    pub action: String,
    pub object: String,
}

#[derive(Debug)]
pub struct ExpandPermissionOutput {
    pub tree: ExpandTree,
}

#[derive(Debug)]
pub struct WriteRelationshipsOutput {
    pub written: usize,
}

#[derive(Debug)]
pub struct DeleteRelationshipsOutput {
    pub deleted: usize,
}

#[derive(Debug)]
pub struct WriteSchemaOutput {
    pub entities: Vec<String>,
    pub version: u64,
}

#[derive(Debug, Clone)]
pub struct LookupSubjectsInput {
    pub action: String,
    pub object: String,
    /// Only subjects of this entity are reported.
    pub subject_entity: String,
}

#[derive(Debug)]
pub struct LookupSubjectsOutput {
    pub subjects: Vec<ObjectRef>,
}

#[derive(Debug, Clone)]
pub struct LookupResourcesInput {
    pub subject: String,
    pub action: String,
    /// Entity type of the resources to report.
    pub entity: String,
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub struct LookupResourcesOutput {
    pub object_ids: Vec<String>,
}

/// The service façade: validates inputs, binds the engines to the stores and
/// the schema manager, and adds no policy of its own.
pub struct AuthzService<T: TupleStore, S: SchemaStore> {
    tuples: Arc<T>,
    schemas: Arc<S>,
    manager: Arc<SchemaManager<S>>,
    engine_config: EngineConfig,
}

impl<T, S> AuthzService<T, S>
where
    T: TupleStore + 'static,
    S: SchemaStore + 'static,
{
    pub fn new(
        tuples: Arc<T>,
        schemas: Arc<S>,
        engine_config: EngineConfig,
        schema_cache_max_cost_bytes: u64,
    ) -> Self {
        let manager = Arc::new(SchemaManager::new(
            Arc::clone(&schemas),
            schema_cache_max_cost_bytes,
        ));
        Self {
            tuples,
            schemas,
            manager,
            engine_config,
        }
    }

    /// Idempotent bring-up of both backing collections.
    pub async fn migrate(&self) -> Result<(), ApiError> {
        TupleStore::migrate(&*self.tuples).await?;
        SchemaStore::migrate(&*self.schemas).await?;
        Ok(())
    }

    fn check_engine(&self) -> CheckEngine<StoreTupleReader<T>, SchemaManager<S>> {
        CheckEngine::new(
            Arc::new(StoreTupleReader::new(Arc::clone(&self.tuples))),
            Arc::clone(&self.manager),
            self.engine_config.clone(),
        )
    }

    fn expand_engine(&self) -> ExpandEngine<StoreTupleReader<T>, SchemaManager<S>> {
        ExpandEngine::new(
            Arc::new(StoreTupleReader::new(Arc::clone(&self.tuples))),
            Arc::clone(&self.manager),
            self.engine_config.clone(),
        )
    }

    #[tracing::instrument(skip(self, input, ctx), fields(subject = %input.subject, action = %input.action, object = %input.object))]
    pub async fn check_permission(
        &self,
        input: CheckPermissionInput,
        ctx: &RequestContext,
    ) -> Result<CheckPermissionOutput, ApiError> {
        let request = CheckRequest {
            subject: input.subject.parse()?,
            action: required(&input.action, "action")?,
            object: input.object.parse()?,
        };

        let result = self.check_engine().check(&request, ctx).await?;
        Ok(CheckPermissionOutput {
            decision: result.decision,
        })
    }

    #[tracing::instrument(skip(self, input, ctx), fields(action = %input.action, object = %input.object))]
    pub async fn expand_permission(
        &self,
        input: ExpandPermissionInput,
        ctx: &RequestContext,
    ) -> Result<ExpandPermissionOutput, ApiError> {
        let request = ExpandRequest {
            action: required(&input.action, "action")?,
            object: input.object.parse()?,
        };

        let tree = self.expand_engine().expand(&request, ctx).await?;
        Ok(ExpandPermissionOutput { tree })
    }

    #[tracing::instrument(skip_all, fields(count = tuples.len()))]
    pub async fn write_relationships(
        &self,
        tuples: &[Tuple],
    ) -> Result<WriteRelationshipsOutput, ApiError> {
        for tuple in tuples {
            tuple.validate()?;
        }
        let written = self.tuples.write(tuples).await?;
        audit::audit_relationship_write(written);
        Ok(WriteRelationshipsOutput { written })
    }

    #[tracing::instrument(skip_all, fields(count = tuples.len()))]
    pub async fn delete_relationships(
        &self,
        tuples: &[Tuple],
    ) -> Result<DeleteRelationshipsOutput, ApiError> {
        for tuple in tuples {
            tuple.validate()?;
        }
        let deleted = self.tuples.delete(tuples).await?;
        audit::audit_relationship_delete(deleted);
        Ok(DeleteRelationshipsOutput { deleted })
    }

    #[tracing::instrument(skip_all, fields(filter = ?filter))]
    pub async fn read_relationships(&self, filter: &TupleFilter) -> Result<Vec<Tuple>, ApiError> {
        Ok(self.tuples.read(filter).await?)
    }

    /// Parses, validates, persists, then invalidates. A rejected schema
    /// never touches the store or the cache.
    #[tracing::instrument(skip_all)]
    pub async fn write_schema(&self, definition: &str) -> Result<WriteSchemaOutput, ApiError> {
        let ast = parse_schema(definition)?;
        let compiled = SchemaDefinition::from(&ast);
        validate_schema(&compiled).map_err(ApiError::SchemaInvalid)?;

        let configs: Vec<EntityConfig> = ast
            .statements
            .iter()
            .map(|statement| EntityConfig {
                name: statement.name.clone(),
                serialized: statement.to_string(),
                version: 0,
            })
            .collect();

        // Entities removed by this write must fall out of the cache too.
        let stale: Vec<String> = self
            .schemas
            .read_entity_configs()
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let version = self.schemas.write_entity_configs(&configs).await?;

        let entities: Vec<String> = configs.into_iter().map(|c| c.name).collect();
        self.manager.invalidate_entities(&entities).await;
        self.manager.invalidate_entities(&stale).await;

        audit::audit_schema_write(version, entities.len());
        Ok(WriteSchemaOutput { entities, version })
    }

    /// Returns the stored schema as DSL text, optionally one entity only.
    #[tracing::instrument(skip(self))]
    pub async fn read_schema(&self, entity: Option<&str>) -> Result<String, ApiError> {
        match entity {
            Some(name) => Ok(self.schemas.read_entity_config(name).await?.serialized),
            None => {
                let configs = self.schemas.read_entity_configs().await?;
                Ok(configs
                    .iter()
                    .map(|c| c.serialized.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }
    }

    /// Who holds `action` on `object`: the expand tree collapsed to the
    /// concrete subjects of one entity type, with intersection intersecting
    /// and exclusion subtracting.
    #[tracing::instrument(skip(self, input, ctx), fields(action = %input.action, object = %input.object))]
    pub async fn lookup_subjects(
        &self,
        input: LookupSubjectsInput,
        ctx: &RequestContext,
    ) -> Result<LookupSubjectsOutput, ApiError> {
        let object: ObjectRef = input.object.parse()?;
        let action = required(&input.action, "action")?;
        required(&input.subject_entity, "subject_entity")?;

        let tree = self
            .expand_engine()
            .expand(
                &ExpandRequest {
                    action,
                    object,
                },
                ctx,
            )
            .await?;

        let mut expanded = HashSet::new();
        let subjects = self
            .collect_subjects(&tree, &input.subject_entity, ctx, &mut expanded)
            .await?;
        Ok(LookupSubjectsOutput {
            subjects: subjects.into_iter().collect(),
        })
    }

    fn collect_subjects<'a>(
        &'a self,
        tree: &'a ExpandTree,
        subject_entity: &'a str,
        ctx: &'a RequestContext,
        expanded: &'a mut HashSet<(ObjectRef, String)>,
    ) -> BoxFuture<'a, Result<BTreeSet<ObjectRef>, ApiError>> {
        Box::pin(async move {
            match tree {
                ExpandTree::Users { users } => Ok(users
                    .iter()
                    .filter(|u| u.entity == subject_entity)
                    .cloned()
                    .collect()),
                ExpandTree::Reference { object, action } => {
                    let key = (object.clone(), action.clone());
                    if !expanded.insert(key) {
                        return Ok(BTreeSet::new());
                    }
                    let subtree = self
                        .expand_engine()
                        .expand(
                            &ExpandRequest {
                                action: action.clone(),
                                object: object.clone(),
                            },
                            ctx,
                        )
                        .await?;
                    self.collect_subjects(&subtree, subject_entity, ctx, expanded)
                        .await
                }
                ExpandTree::Union { children } => {
                    let mut all = BTreeSet::new();
                    for child in children {
                        let subjects = self
                            .collect_subjects(child, subject_entity, ctx, &mut *expanded)
                            .await?;
                        all.extend(subjects);
                    }
                    Ok(all)
                }
                ExpandTree::Intersection { children } => {
                    let mut iter = children.iter();
                    let Some(first) = iter.next() else {
                        return Ok(BTreeSet::new());
                    };
                    let mut all = self
                        .collect_subjects(first, subject_entity, ctx, &mut *expanded)
                        .await?;
                    for child in iter {
                        let subjects = self
                            .collect_subjects(child, subject_entity, ctx, &mut *expanded)
                            .await?;
                        all.retain(|s| subjects.contains(s));
                    }
                    Ok(all)
                }
                ExpandTree::Exclusion { base, excluded } => {
                    let mut all = self
                        .collect_subjects(base, subject_entity, ctx, &mut *expanded)
                        .await?;
                    let removed = self
                        .collect_subjects(excluded, subject_entity, ctx, expanded)
                        .await?;
                    all.retain(|s| !removed.contains(s));
                    Ok(all)
                }
                ExpandTree::Elided { .. } => Ok(BTreeSet::new()),
            }
        })
    }

    /// Which objects of one entity type the subject can act on. Candidates
    /// come from walking the reverse tuple index through usersets; each is
    /// then confirmed with the check engine.
    #[tracing::instrument(skip(self, input, ctx), fields(subject = %input.subject, action = %input.action, entity = %input.entity))]
    pub async fn lookup_resources(
        &self,
        input: LookupResourcesInput,
        ctx: &RequestContext,
    ) -> Result<LookupResourcesOutput, ApiError> {
        let subject: ObjectRef = input.subject.parse()?;
        let action = required(&input.action, "action")?;
        let entity = required(&input.entity, "entity")?;

        let mut candidates = BTreeSet::new();
        let mut frontier = vec![Subject::user(&subject.entity, &subject.object_id)];
        let mut visited: HashSet<Subject> = frontier.iter().cloned().collect();

        while let Some(current) = frontier.pop() {
            for tuple in self.tuples.reverse_query_tuples(&current).await? {
                if tuple.object.entity == entity {
                    candidates.insert(tuple.object.object_id.clone());
                }
                let next = Subject::userset(
                    &tuple.object.entity,
                    &tuple.object.object_id,
                    &tuple.relation,
                );
                if visited.insert(next.clone()) {
                    frontier.push(next);
                }
            }
        }

        let engine = self.check_engine();
        let limit = input.limit.unwrap_or(usize::MAX);
        let mut object_ids = Vec::new();
        for object_id in candidates {
            if object_ids.len() >= limit {
                break;
            }
            let request = CheckRequest {
                subject: subject.clone(),
                action: action.clone(),
                object: ObjectRef::new(&entity, &object_id),
            };
            if engine.check(&request, ctx).await?.decision.is_allowed() {
                object_ids.push(object_id);
            }
        }

        Ok(LookupResourcesOutput { object_ids })
    }
}

fn required(value: &str, field: &'static str) -> Result<String, ApiError> {
    if value.is_empty() {
        Err(ApiError::InvalidArgument(format!(
            "{field} must not be empty"
        )))
    } else {
        Ok(value.to_string())
    }
}
