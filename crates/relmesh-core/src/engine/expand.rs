use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::schema::{EntityDefinition, Expression, InfixOp};
use crate::tuple::ObjectRef;

use super::{CheckError, EngineConfig, RequestContext, SchemaReader, TupleReader};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct ExpandRequest {
    pub action: String,
    pub object: ObjectRef,
}

/// The userset tree under `(action, object)`.
///
/// Interior nodes mirror the expression operators; leaves are concrete user
/// sets, cross-entity action references left unexpanded, or `Elided` markers
/// where a cycle was cut.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandTree {
    Users {
        users: Vec<ObjectRef>,
    },
    Reference {
        object: ObjectRef,
        action: String,
    },
    Union {
        children: Vec<ExpandTree>,
    },
    Intersection {
        children: Vec<ExpandTree>,
    },
    Exclusion {
        base: Box<ExpandTree>,
        excluded: Box<ExpandTree>,
    },
    Elided {
        object: ObjectRef,
        relation: String,
    },
}

pub struct ExpandEngine<T: TupleReader, S: SchemaReader> {
    tuples: Arc<T>,
    schema: Arc<S>,
    config: EngineConfig,
}

/// DFS path state: frames currently being expanded. Meeting one again is a
/// cycle and produces an `Elided` leaf instead of recursing forever.
#[derive(Default)]
struct PathSet {
    frames: HashSet<(String, String, String)>,
}

impl PathSet {
    fn enter(&mut self, object: &ObjectRef, name: &str) -> bool {
        self.frames.insert((
            object.entity.clone(),
            object.object_id.clone(),
            name.to_string(),
        ))
    }

    fn leave(&mut self, object: &ObjectRef, name: &str) {
        self.frames.remove(&(
            object.entity.clone(),
            object.object_id.clone(),
            name.to_string(),
        ));
    }
}

impl<T: TupleReader, S: SchemaReader> ExpandEngine<T, S> {
    pub fn new(tuples: Arc<T>, schema: Arc<S>, config: EngineConfig) -> Self {
        Self {
            tuples,
            schema,
            config,
        }
    }

    pub async fn expand(
        &self,
        request: &ExpandRequest,
        ctx: &RequestContext,
    ) -> Result<ExpandTree, CheckError> {
        ctx.ensure_active()?;
        let definition = self.schema.entity(&request.object.entity).await?;

        let mut path = PathSet::default();
        path.enter(&request.object, &request.action);

        if let Some(action) = definition.get_action(&request.action) {
            self.expand_expression(
                &definition,
                &action.expression,
                &request.object,
                ctx,
                &mut path,
                0,
            )
            .await
        } else if definition.get_relation(&request.action).is_some() {
            self.expand_relation(&request.action, &request.object, ctx, &mut path, 0)
                .await
        } else {
            Err(CheckError::undefined(
                &request.object.entity,
                &request.action,
            ))
        }
    }

    fn expand_expression<'a>(
        &'a self,
        definition: &'a EntityDefinition,
        expression: &'a Expression,
        object: &'a ObjectRef,
        ctx: &'a RequestContext,
        path: &'a mut PathSet,
        depth: usize,
    ) -> BoxFuture<'a, Result<ExpandTree, CheckError>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Err(CheckError::MaxDepthExceeded(depth));
            }

            match expression {
                Expression::Identifier { name } => {
                    self.expand_named(definition, name, object, ctx, path, depth)
                        .await
                }
                Expression::Path { relation, action } => {
                    if definition.get_relation(relation).is_none() {
                        return Err(CheckError::undefined(&definition.name, relation.as_str()));
                    }
                    ctx.ensure_active()?;
                    let tuples = self.tuples.query_tuples(object, relation).await?;
                    // Cross-entity actions stay unexpanded: each target is a
                    // labeled reference leaf.
                    let children = tuples
                        .iter()
                        .map(|t| ExpandTree::Reference {
                            object: t.subject.object(),
                            action: action.clone(),
                        })
                        .collect();
                    Ok(ExpandTree::Union { children })
                }
                Expression::Infix { op: InfixOp::Or, .. } => {
                    let mut children = Vec::new();
                    for term in flatten(expression, InfixOp::Or) {
                        children.push(
                            self.expand_expression(
                                definition, term, object, ctx, &mut *path, depth,
                            )
                            .await?,
                        );
                    }
                    Ok(ExpandTree::Union { children })
                }
                Expression::Infix {
                    op: InfixOp::And, ..
                } => {
                    let mut positive = Vec::new();
                    let mut negated = Vec::new();
                    for term in flatten(expression, InfixOp::And) {
                        match term {
                            Expression::Not { operand } => negated.push(operand.as_ref()),
                            other => positive.push(other),
                        }
                    }

                    let mut base_children = Vec::new();
                    for term in positive {
                        base_children.push(
                            self.expand_expression(
                                definition, term, object, ctx, &mut *path, depth,
                            )
                            .await?,
                        );
                    }
                    let base = match base_children.len() {
                        0 => ExpandTree::Users { users: vec![] },
                        1 => base_children.into_iter().next().expect("one child"),
                        _ => ExpandTree::Intersection {
                            children: base_children,
                        },
                    };

                    if negated.is_empty() {
                        return Ok(base);
                    }

                    let mut excluded_children = Vec::new();
                    for term in negated {
                        excluded_children.push(
                            self.expand_expression(
                                definition, term, object, ctx, &mut *path, depth,
                            )
                            .await?,
                        );
                    }
                    let excluded = match excluded_children.len() {
                        1 => excluded_children.into_iter().next().expect("one child"),
                        _ => ExpandTree::Union {
                            children: excluded_children,
                        },
                    };

                    Ok(ExpandTree::Exclusion {
                        base: Box::new(base),
                        excluded: Box::new(excluded),
                    })
                }
                Expression::Not { operand } => {
                    // A bare `not` has nothing to subtract from.
                    let excluded = self
                        .expand_expression(definition, operand, object, ctx, path, depth)
                        .await?;
                    Ok(ExpandTree::Exclusion {
                        base: Box::new(ExpandTree::Users { users: vec![] }),
                        excluded: Box::new(excluded),
                    })
                }
            }
        })
    }

    /// Resolves a leaf identifier on the current entity.
    async fn expand_named(
        &self,
        definition: &EntityDefinition,
        name: &str,
        object: &ObjectRef,
        ctx: &RequestContext,
        path: &mut PathSet,
        depth: usize,
    ) -> Result<ExpandTree, CheckError> {
        if let Some(action) = definition.get_action(name) {
            if !path.enter(object, name) {
                return Ok(ExpandTree::Elided {
                    object: object.clone(),
                    relation: name.to_string(),
                });
            }
            let tree = self
                .expand_expression(
                    definition,
                    &action.expression,
                    object,
                    ctx,
                    &mut *path,
                    depth + 1,
                )
                .await;
            path.leave(object, name);
            return tree;
        }

        if definition.get_relation(name).is_some() {
            return self.expand_relation(name, object, ctx, path, depth).await;
        }

        Err(CheckError::undefined(&definition.name, name))
    }

    /// Expands a relation's membership: direct subjects become a user leaf,
    /// usersets recurse into their target relation, and usersets naming an
    /// action on the target entity stay as reference leaves.
    fn expand_relation<'a>(
        &'a self,
        relation: &'a str,
        object: &'a ObjectRef,
        ctx: &'a RequestContext,
        path: &'a mut PathSet,
        depth: usize,
    ) -> BoxFuture<'a, Result<ExpandTree, CheckError>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Err(CheckError::MaxDepthExceeded(depth));
            }

            ctx.ensure_active()?;
            let tuples = self.tuples.query_tuples(object, relation).await?;

            let mut users = Vec::new();
            let mut children = Vec::new();
            for tuple in &tuples {
                let Some(ref userset_relation) = tuple.subject.relation else {
                    users.push(tuple.subject.object());
                    continue;
                };

                let target = tuple.subject.object();
                if !path.enter(&target, userset_relation) {
                    children.push(ExpandTree::Elided {
                        object: target,
                        relation: userset_relation.clone(),
                    });
                    continue;
                }

                let target_def = self.schema.entity(&target.entity).await?;
                let subtree = if target_def.get_action(userset_relation).is_some() {
                    Ok(ExpandTree::Reference {
                        object: target.clone(),
                        action: userset_relation.clone(),
                    })
                } else if target_def.get_relation(userset_relation).is_some() {
                    self.expand_relation(userset_relation, &target, ctx, &mut *path, depth + 1)
                        .await
                } else {
                    Err(CheckError::undefined(&target.entity, userset_relation))
                };
                path.leave(&target, userset_relation);
                children.push(subtree?);
            }

            if children.is_empty() {
                return Ok(ExpandTree::Users { users });
            }
            if !users.is_empty() {
                children.insert(0, ExpandTree::Users { users });
            }
            Ok(ExpandTree::Union { children })
        })
    }
}

/// Flattens a left-associative chain of one infix operator into its terms.
fn flatten(expression: &Expression, op: InfixOp) -> Vec<&Expression> {
    match expression {
        Expression::Infix {
            op: found,
            left,
            right,
        } if *found == op => {
            let mut terms = flatten(left, op);
            terms.extend(flatten(right, op));
            terms
        }
        other => vec![other],
    }
}
