use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::schema::{EntityDefinition, Expression, InfixOp};
use crate::tuple::ObjectRef;

use super::{CheckError, EngineConfig, RequestContext, SchemaReader, TupleReader};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub subject: ObjectRef,
    pub action: String,
    pub object: ObjectRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }

    fn inverted(self) -> Decision {
        match self {
            Decision::Allow => Decision::Deny,
            Decision::Deny => Decision::Allow,
        }
    }
}

#[derive(Debug)]
pub struct CheckResult {
    pub decision: Decision,
}

/// Per-query evaluation state.
///
/// Each `(object, name)` frame records whether it is still being evaluated or
/// what it decided. A frame met again while in progress is a cycle and
/// denies; a finished frame replays its decision, which keeps evaluation
/// linear in the reachable tuple graph.
#[derive(Default)]
struct Trace {
    frames: HashMap<(String, String, String), FrameState>,
}

#[derive(Clone, Copy)]
enum FrameState {
    InProgress,
    Done(Decision),
}

pub struct CheckEngine<T: TupleReader, S: SchemaReader> {
    tuples: Arc<T>,
    schema: Arc<S>,
    config: EngineConfig,
}

impl<T: TupleReader, S: SchemaReader> CheckEngine<T, S> {
    pub fn new(tuples: Arc<T>, schema: Arc<S>, config: EngineConfig) -> Self {
        Self {
            tuples,
            schema,
            config,
        }
    }

    /// Decides `(subject, action, object)`.
    ///
    /// Union semantics over tuples: the first match allows, deny only after
    /// everything reachable is exhausted. `and`/`or` short-circuit left to
    /// right; tuple iteration follows the store order, so the decision is
    /// deterministic for a fixed store snapshot.
    pub async fn check(
        &self,
        request: &CheckRequest,
        ctx: &RequestContext,
    ) -> Result<CheckResult, CheckError> {
        ctx.ensure_active()?;
        let mut trace = Trace::default();
        let decision = self
            .check_node(
                &request.subject,
                &request.action,
                &request.object,
                ctx,
                &mut trace,
                0,
            )
            .await?;
        Ok(CheckResult { decision })
    }

    /// Resolves `name` on `object`'s entity as an action or a relation and
    /// evaluates it. This is the recursion point for userset traversal.
    fn check_node<'a>(
        &'a self,
        subject: &'a ObjectRef,
        name: &'a str,
        object: &'a ObjectRef,
        ctx: &'a RequestContext,
        trace: &'a mut Trace,
        depth: usize,
    ) -> BoxFuture<'a, Result<Decision, CheckError>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Err(CheckError::MaxDepthExceeded(depth));
            }

            let key = (
                object.entity.clone(),
                object.object_id.clone(),
                name.to_string(),
            );
            match trace.frames.get(&key) {
                Some(FrameState::InProgress) => {
                    tracing::debug!(object = %object, name, "cycle detected, denying frame");
                    return Ok(Decision::Deny);
                }
                Some(FrameState::Done(decision)) => return Ok(*decision),
                None => {}
            }
            trace.frames.insert(key.clone(), FrameState::InProgress);

            ctx.ensure_active()?;
            let definition = self.schema.entity(&object.entity).await?;

            let decision = if let Some(action) = definition.get_action(name) {
                self.evaluate(
                    &definition,
                    &action.expression,
                    subject,
                    object,
                    ctx,
                    &mut *trace,
                    depth,
                )
                .await?
            } else if definition.get_relation(name).is_some() {
                self.evaluate_relation(name, subject, object, ctx, &mut *trace, depth)
                    .await?
            } else {
                return Err(CheckError::undefined(&object.entity, name));
            };

            trace.frames.insert(key, FrameState::Done(decision));
            Ok(decision)
        })
    }

    fn evaluate<'a>(
        &'a self,
        definition: &'a EntityDefinition,
        expression: &'a Expression,
        subject: &'a ObjectRef,
        object: &'a ObjectRef,
        ctx: &'a RequestContext,
        trace: &'a mut Trace,
        depth: usize,
    ) -> BoxFuture<'a, Result<Decision, CheckError>> {
        Box::pin(async move {
            match expression {
                Expression::Identifier { name } => {
                    self.check_node(subject, name, object, ctx, trace, depth + 1)
                        .await
                }
                Expression::Path { relation, action } => {
                    if definition.get_relation(relation).is_none() {
                        return Err(CheckError::undefined(&definition.name, relation.as_str()));
                    }
                    ctx.ensure_active()?;
                    let tuples = self.tuples.query_tuples(object, relation).await?;
                    for tuple in &tuples {
                        let target = tuple.subject.object();
                        let decision = self
                            .check_node(subject, action, &target, ctx, &mut *trace, depth + 1)
                            .await?;
                        if decision.is_allowed() {
                            return Ok(Decision::Allow);
                        }
                    }
                    Ok(Decision::Deny)
                }
                Expression::Infix { op, left, right } => {
                    let left_decision = self
                        .evaluate(definition, left, subject, object, ctx, &mut *trace, depth)
                        .await?;
                    match (op, left_decision) {
                        (InfixOp::Or, Decision::Allow) => Ok(Decision::Allow),
                        (InfixOp::And, Decision::Deny) => Ok(Decision::Deny),
                        _ => {
                            self.evaluate(
                                definition, right, subject, object, ctx, trace, depth,
                            )
                            .await
                        }
                    }
                }
                Expression::Not { operand } => {
                    let decision = self
                        .evaluate(definition, operand, subject, object, ctx, trace, depth)
                        .await?;
                    Ok(decision.inverted())
                }
            }
        })
    }

    /// Union over the relation's tuples: a direct subject match allows,
    /// a userset recurses into its target relation or action.
    async fn evaluate_relation(
        &self,
        relation: &str,
        subject: &ObjectRef,
        object: &ObjectRef,
        ctx: &RequestContext,
        trace: &mut Trace,
        depth: usize,
    ) -> Result<Decision, CheckError> {
        ctx.ensure_active()?;
        let tuples = self.tuples.query_tuples(object, relation).await?;

        for tuple in &tuples {
            match tuple.subject.relation {
                None => {
                    if tuple.subject.entity == subject.entity
                        && tuple.subject.object_id == subject.object_id
                    {
                        return Ok(Decision::Allow);
                    }
                }
                Some(ref userset_relation) => {
                    let target = tuple.subject.object();
                    let decision = self
                        .check_node(subject, userset_relation, &target, ctx, &mut *trace, depth + 1)
                        .await?;
                    if decision.is_allowed() {
                        return Ok(Decision::Allow);
                    }
                }
            }
        }

        Ok(Decision::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::schema::{SchemaDefinition, parse_schema};
    use crate::tuple::Tuple;

    struct TestStore {
        tuples: Vec<Tuple>,
        queries: AtomicU64,
    }

    impl TestStore {
        fn new(tuples: Vec<&str>) -> Self {
            Self {
                tuples: tuples.into_iter().map(|t| t.parse().unwrap()).collect(),
                queries: AtomicU64::new(0),
            }
        }

        fn query_count(&self) -> u64 {
            self.queries.load(Ordering::SeqCst)
        }
    }

    impl TupleReader for TestStore {
        async fn query_tuples(
            &self,
            object: &ObjectRef,
            relation: &str,
        ) -> Result<Vec<Tuple>, CheckError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            let mut results: Vec<Tuple> = self
                .tuples
                .iter()
                .filter(|t| &t.object == object && t.relation == relation)
                .cloned()
                .collect();
            results.sort_by(|a, b| {
                (&a.subject.entity, a.subject.relation_key())
                    .cmp(&(&b.subject.entity, b.subject.relation_key()))
            });
            Ok(results)
        }
    }

    struct FixedSchema {
        schema: SchemaDefinition,
    }

    impl FixedSchema {
        fn new(input: &str) -> Self {
            Self {
                schema: SchemaDefinition::from(&parse_schema(input).unwrap()),
            }
        }
    }

    impl SchemaReader for FixedSchema {
        async fn entity(&self, name: &str) -> Result<Arc<EntityDefinition>, CheckError> {
            self.schema
                .get_entity(name)
                .map(|e| Arc::new(e.clone()))
                .ok_or_else(|| CheckError::UndefinedEntity(name.to_string()))
        }
    }

    const DOCUMENT_SCHEMA: &str = r#"
        entity user {}
        entity document {
            relation owner @user
            relation editor @user @document#owner
            relation viewer @user @document#editor
            action view   = viewer or editor or owner
            action edit   = editor or owner
            action delete = owner
        }
    "#;

    fn make_engine(
        schema: &str,
        tuples: Vec<&str>,
    ) -> (CheckEngine<TestStore, FixedSchema>, Arc<TestStore>) {
        let store = Arc::new(TestStore::new(tuples));
        let engine = CheckEngine::new(
            Arc::clone(&store),
            Arc::new(FixedSchema::new(schema)),
            EngineConfig::default(),
        );
        (engine, store)
    }

    fn request(subject: &str, action: &str, object: &str) -> CheckRequest {
        CheckRequest {
            subject: subject.parse().unwrap(),
            action: action.to_string(),
            object: object.parse().unwrap(),
        }
    }

    async fn decide(engine: &CheckEngine<TestStore, FixedSchema>, req: CheckRequest) -> Decision {
        engine
            .check(&req, &RequestContext::unbounded())
            .await
            .unwrap()
            .decision
    }

    #[tokio::test]
    async fn direct_grant_allows_owner() {
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, vec!["document:1#owner@user:alice"]);

        let decision = decide(&engine, request("user:alice", "delete", "document:1")).await;

        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn direct_grant_denies_other_subject() {
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, vec!["document:1#owner@user:alice"]);

        let decision = decide(&engine, request("user:bob", "delete", "document:1")).await;

        assert_eq!(decision, Decision::Deny);
    }

    #[tokio::test]
    async fn userset_traversal_grants_edit_to_owner() {
        let (engine, _) = make_engine(
            DOCUMENT_SCHEMA,
            vec![
                "document:1#owner@user:alice",
                "document:1#editor@document:1#owner",
            ],
        );

        let decision = decide(&engine, request("user:alice", "edit", "document:1")).await;

        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn transitive_userset_grants_view_to_owner() {
        let (engine, _) = make_engine(
            DOCUMENT_SCHEMA,
            vec![
                "document:1#owner@user:alice",
                "document:1#editor@document:1#owner",
                "document:1#viewer@document:1#editor",
            ],
        );

        assert_eq!(
            decide(&engine, request("user:alice", "view", "document:1")).await,
            Decision::Allow
        );
        assert_eq!(
            decide(&engine, request("user:bob", "view", "document:1")).await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn check_resolves_bare_relation_names() {
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, vec!["document:1#owner@user:alice"]);

        let decision = decide(&engine, request("user:alice", "owner", "document:1")).await;

        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn unknown_entity_is_schema_undefined() {
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, vec![]);

        let err = engine
            .check(
                &request("user:alice", "view", "folder:1"),
                &RequestContext::unbounded(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::UndefinedEntity("folder".to_string()));
    }

    #[tokio::test]
    async fn unknown_action_is_schema_undefined() {
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, vec![]);

        let err = engine
            .check(
                &request("user:alice", "publish", "document:1"),
                &RequestContext::unbounded(),
            )
            .await
            .unwrap_err();

        assert_eq!(
            err,
            CheckError::undefined("document", "publish")
        );
    }

    #[tokio::test]
    async fn path_traverses_into_parent_entity() {
        let schema = r#"
            entity user {}
            entity folder {
                relation viewer @user
                action view = viewer
            }
            entity document {
                relation parent @folder
                action view = parent.view
            }
        "#;
        let (engine, _) = make_engine(
            schema,
            vec![
                "document:readme#parent@folder:root",
                "folder:root#viewer@user:alice",
            ],
        );

        assert_eq!(
            decide(&engine, request("user:alice", "view", "document:readme")).await,
            Decision::Allow
        );
        assert_eq!(
            decide(&engine, request("user:bob", "view", "document:readme")).await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn and_requires_both_operands() {
        let schema = r#"
            entity user {}
            entity document {
                relation signer @user
                relation approver @user
                action publish = signer and approver
            }
        "#;
        let (engine, _) = make_engine(
            schema,
            vec![
                "document:1#signer@user:alice",
                "document:1#approver@user:alice",
                "document:1#signer@user:bob",
            ],
        );

        assert_eq!(
            decide(&engine, request("user:alice", "publish", "document:1")).await,
            Decision::Allow
        );
        assert_eq!(
            decide(&engine, request("user:bob", "publish", "document:1")).await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn not_excludes_banned_subjects() {
        let schema = r#"
            entity user {}
            entity document {
                relation viewer @user
                relation banned @user
                action view = viewer and not banned
            }
        "#;
        let (engine, _) = make_engine(
            schema,
            vec![
                "document:1#viewer@user:alice",
                "document:1#viewer@user:bob",
                "document:1#banned@user:bob",
            ],
        );

        assert_eq!(
            decide(&engine, request("user:alice", "view", "document:1")).await,
            Decision::Allow
        );
        assert_eq!(
            decide(&engine, request("user:bob", "view", "document:1")).await,
            Decision::Deny
        );
    }

    #[tokio::test]
    async fn cyclic_usersets_terminate_with_deny() {
        let schema = r#"
            entity user {}
            entity group {
                relation member @user @group#member
            }
        "#;
        let (engine, _) = make_engine(
            schema,
            vec![
                "group:a#member@group:b#member",
                "group:b#member@group:a#member",
            ],
        );

        let decision = decide(&engine, request("user:carol", "member", "group:a")).await;

        assert_eq!(decision, Decision::Deny);
    }

    #[tokio::test]
    async fn cyclic_usersets_still_find_real_members() {
        let schema = r#"
            entity user {}
            entity group {
                relation member @user @group#member
            }
        "#;
        let (engine, _) = make_engine(
            schema,
            vec![
                "group:a#member@group:b#member",
                "group:b#member@group:a#member",
                "group:b#member@user:carol",
            ],
        );

        let decision = decide(&engine, request("user:carol", "member", "group:a")).await;

        assert_eq!(decision, Decision::Allow);
    }

    #[tokio::test]
    async fn shared_frame_is_memoized_not_denied() {
        // Both operands of the `and` reach the same owner frame; the second
        // visit must replay its Allow, not treat it as a cycle.
        let schema = r#"
            entity user {}
            entity document {
                relation owner @user
                action a = owner
                action b = owner
                action both = a and b
            }
        "#;
        let (engine, store) = make_engine(schema, vec!["document:1#owner@user:alice"]);

        let decision = decide(&engine, request("user:alice", "both", "document:1")).await;

        assert_eq!(decision, Decision::Allow);
        assert_eq!(store.query_count(), 1, "owner frame should be evaluated once");
    }

    #[tokio::test]
    async fn and_short_circuits_without_querying_right_operand() {
        let schema = r#"
            entity user {}
            entity document {
                relation signer @user
                relation approver @user
                action publish = signer and approver
            }
        "#;
        let (engine, store) = make_engine(schema, vec![]);

        let decision = decide(&engine, request("user:alice", "publish", "document:1")).await;

        assert_eq!(decision, Decision::Deny);
        assert_eq!(
            store.query_count(),
            1,
            "deny on the left must not query the right operand"
        );
    }

    #[tokio::test]
    async fn or_short_circuits_on_first_allow() {
        let (engine, store) = make_engine(DOCUMENT_SCHEMA, vec!["document:1#viewer@user:alice"]);

        let decision = decide(&engine, request("user:alice", "view", "document:1")).await;

        assert_eq!(decision, Decision::Allow);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn check_is_deterministic_across_calls() {
        let (engine, _) = make_engine(
            DOCUMENT_SCHEMA,
            vec![
                "document:1#owner@user:alice",
                "document:1#editor@document:1#owner",
                "document:1#viewer@document:1#editor",
            ],
        );

        for _ in 0..5 {
            let decision = decide(&engine, request("user:alice", "view", "document:1")).await;
            assert_eq!(decision, Decision::Allow);
        }
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_store_io() {
        let (engine, store) = make_engine(DOCUMENT_SCHEMA, vec!["document:1#owner@user:alice"]);
        let ctx = RequestContext::unbounded();
        ctx.cancel.cancel();

        let err = engine
            .check(&request("user:alice", "delete", "document:1"), &ctx)
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::Cancelled);
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn depth_limit_bounds_deep_chains() {
        let schema = r#"
            entity user {}
            entity folder {
                relation parent @folder
                relation viewer @user
                action view = viewer or parent.view
            }
        "#;
        let mut tuples = Vec::new();
        let chain: Vec<String> = (0..40)
            .map(|i| format!("folder:f{}#parent@folder:f{}", i, i + 1))
            .collect();
        for link in &chain {
            tuples.push(link.as_str());
        }
        let (engine, _) = make_engine(schema, tuples);

        let err = engine
            .check(
                &request("user:alice", "view", "folder:f0"),
                &RequestContext::unbounded(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::MaxDepthExceeded(_)));
    }

    #[tokio::test]
    async fn adding_tuples_never_revokes_allow() {
        let base = vec![
            "document:1#owner@user:alice",
            "document:1#editor@document:1#owner",
        ];
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, base.clone());
        assert_eq!(
            decide(&engine, request("user:alice", "edit", "document:1")).await,
            Decision::Allow
        );

        let mut grown = base;
        grown.push("document:1#editor@user:bob");
        grown.push("document:1#viewer@user:carol");
        let (engine, _) = make_engine(DOCUMENT_SCHEMA, grown);
        assert_eq!(
            decide(&engine, request("user:alice", "edit", "document:1")).await,
            Decision::Allow
        );
    }
}
