use std::collections::HashSet;

use super::ast::Expression;
use super::types::{EntityDefinition, SchemaDefinition};
use crate::tuple::USER_ENTITY;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema must define an entity named '{USER_ENTITY}'")]
    UserEntityRequired,

    #[error("duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("duplicate relation '{relation}' in entity '{entity}'")]
    DuplicateRelation { entity: String, relation: String },

    #[error("duplicate action '{action}' in entity '{entity}'")]
    DuplicateAction { entity: String, action: String },

    #[error("relation '{relation}' of entity '{entity}' references unknown entity '{target}'")]
    UnknownEntity {
        entity: String,
        relation: String,
        target: String,
    },

    #[error(
        "relation '{relation}' of entity '{entity}' references unknown relation '{target}#{target_relation}'"
    )]
    UnknownTargetRelation {
        entity: String,
        relation: String,
        target: String,
        target_relation: String,
    },

    #[error("action '{action}' of entity '{entity}' references unknown name '{name}'")]
    UnresolvedIdentifier {
        entity: String,
        action: String,
        name: String,
    },

    #[error("action '{action}' of entity '{entity}' traverses unknown relation '{relation}'")]
    UnknownPathRelation {
        entity: String,
        action: String,
        relation: String,
    },

    #[error(
        "action '{action}' of entity '{entity}' traverses '{relation}' into '{target}', which does not define '{target_action}'"
    )]
    UnknownPathAction {
        entity: String,
        action: String,
        relation: String,
        target: String,
        target_action: String,
    },
}

/// Checks a compiled schema for well-formedness:
///
/// 1. exactly one entity named `user` exists;
/// 2. every relation type resolves to an existing entity and, if qualified,
///    an existing relation on that entity;
/// 3. every name in an action expression resolves to a relation or action of
///    the same entity, and every `rel.action` path traverses a declared
///    relation into entities that define the action.
///
/// All problems are collected rather than stopping at the first.
pub fn validate_schema(schema: &SchemaDefinition) -> Result<(), Vec<SchemaError>> {
    let mut errors = Vec::new();

    if schema.get_entity(USER_ENTITY).is_none() {
        errors.push(SchemaError::UserEntityRequired);
    }

    let mut seen_entities = HashSet::new();
    for entity in &schema.entities {
        if !seen_entities.insert(entity.name.as_str()) {
            errors.push(SchemaError::DuplicateEntity(entity.name.clone()));
        }
    }

    for entity in &schema.entities {
        validate_entity(schema, entity, &mut errors);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn validate_entity(
    schema: &SchemaDefinition,
    entity: &EntityDefinition,
    errors: &mut Vec<SchemaError>,
) {
    let mut seen_relations = HashSet::new();
    for relation in &entity.relations {
        if !seen_relations.insert(relation.name.as_str()) {
            errors.push(SchemaError::DuplicateRelation {
                entity: entity.name.clone(),
                relation: relation.name.clone(),
            });
        }

        for rel_type in &relation.types {
            let Some(target) = schema.get_entity(&rel_type.entity) else {
                errors.push(SchemaError::UnknownEntity {
                    entity: entity.name.clone(),
                    relation: relation.name.clone(),
                    target: rel_type.entity.clone(),
                });
                continue;
            };
            if let Some(ref target_relation) = rel_type.relation
                && target.get_relation(target_relation).is_none()
            {
                errors.push(SchemaError::UnknownTargetRelation {
                    entity: entity.name.clone(),
                    relation: relation.name.clone(),
                    target: rel_type.entity.clone(),
                    target_relation: target_relation.clone(),
                });
            }
        }
    }

    let mut seen_actions = HashSet::new();
    for action in &entity.actions {
        if !seen_actions.insert(action.name.as_str()) {
            errors.push(SchemaError::DuplicateAction {
                entity: entity.name.clone(),
                action: action.name.clone(),
            });
        }
        validate_expression(schema, entity, &action.name, &action.expression, errors);
    }
}

fn validate_expression(
    schema: &SchemaDefinition,
    entity: &EntityDefinition,
    action: &str,
    expression: &Expression,
    errors: &mut Vec<SchemaError>,
) {
    match expression {
        Expression::Identifier { name } => {
            if entity.get_relation(name).is_none() && entity.get_action(name).is_none() {
                errors.push(SchemaError::UnresolvedIdentifier {
                    entity: entity.name.clone(),
                    action: action.to_string(),
                    name: name.clone(),
                });
            }
        }
        Expression::Path {
            relation,
            action: target_action,
        } => {
            let Some(relation_def) = entity.get_relation(relation) else {
                errors.push(SchemaError::UnknownPathRelation {
                    entity: entity.name.clone(),
                    action: action.to_string(),
                    relation: relation.clone(),
                });
                return;
            };
            // Every entity the relation can point at (the user entity aside)
            // must be able to answer the traversed action, as an action or a
            // relation, so evaluation never dead-ends mid-path.
            let mut checked = HashSet::new();
            for rel_type in &relation_def.types {
                if rel_type.entity == USER_ENTITY || !checked.insert(rel_type.entity.as_str()) {
                    continue;
                }
                let Some(target) = schema.get_entity(&rel_type.entity) else {
                    // Reported by the relation-type pass already.
                    continue;
                };
                if target.get_action(target_action).is_none()
                    && target.get_relation(target_action).is_none()
                {
                    errors.push(SchemaError::UnknownPathAction {
                        entity: entity.name.clone(),
                        action: action.to_string(),
                        relation: relation.clone(),
                        target: rel_type.entity.clone(),
                        target_action: target_action.clone(),
                    });
                }
            }
        }
        Expression::Infix { left, right, .. } => {
            validate_expression(schema, entity, action, left, errors);
            validate_expression(schema, entity, action, right, errors);
        }
        Expression::Not { operand } => {
            validate_expression(schema, entity, action, operand, errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::parse_schema;

    fn validate(input: &str) -> Result<(), Vec<SchemaError>> {
        validate_schema(&SchemaDefinition::from(&parse_schema(input).unwrap()))
    }

    #[test]
    fn accepts_well_formed_schema() {
        let result = validate(
            r#"
            entity user {}
            entity document {
                relation owner @user
                relation editor @user @document#owner
                relation viewer @user @document#editor
                action view   = viewer or editor or owner
                action edit   = editor or owner
                action delete = owner
            }
            "#,
        );

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn rejects_schema_without_user_entity() {
        let errors = validate("entity document { relation owner @document }").unwrap_err();

        assert!(errors.contains(&SchemaError::UserEntityRequired));
    }

    #[test]
    fn rejects_duplicate_entity() {
        let errors = validate("entity user {} entity user {}").unwrap_err();

        assert!(errors.contains(&SchemaError::DuplicateEntity("user".to_string())));
    }

    #[test]
    fn rejects_duplicate_relation() {
        let errors =
            validate("entity user {} entity doc { relation owner @user relation owner @user }")
                .unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::DuplicateRelation {
                entity: "doc".to_string(),
                relation: "owner".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_duplicate_action() {
        let errors = validate(
            "entity user {} entity doc { relation owner @user action a = owner action a = owner }",
        )
        .unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::DuplicateAction {
                entity: "doc".to_string(),
                action: "a".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_relation_type_to_unknown_entity() {
        let errors = validate("entity user {} entity doc { relation parent @folder }").unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::UnknownEntity {
                entity: "doc".to_string(),
                relation: "parent".to_string(),
                target: "folder".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_relation_type_to_unknown_relation() {
        let errors =
            validate("entity user {} entity doc { relation editor @doc#owner }").unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::UnknownTargetRelation {
                entity: "doc".to_string(),
                relation: "editor".to_string(),
                target: "doc".to_string(),
                target_relation: "owner".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_action_with_unresolved_identifier() {
        let errors = validate("entity user {} entity doc { action view = viewer }").unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::UnresolvedIdentifier {
                entity: "doc".to_string(),
                action: "view".to_string(),
                name: "viewer".to_string(),
            }]
        );
    }

    #[test]
    fn accepts_action_referencing_other_action() {
        let result = validate(
            "entity user {} entity doc { relation owner @user action edit = owner action view = edit }",
        );

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn accepts_path_into_entity_defining_the_action() {
        let result = validate(
            r#"
            entity user {}
            entity folder {
                relation viewer @user
                action view = viewer
            }
            entity doc {
                relation parent @folder
                action view = parent.view
            }
            "#,
        );

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn rejects_path_over_unknown_relation() {
        let errors =
            validate("entity user {} entity doc { action view = parent.view }").unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::UnknownPathRelation {
                entity: "doc".to_string(),
                action: "view".to_string(),
                relation: "parent".to_string(),
            }]
        );
    }

    #[test]
    fn rejects_path_into_entity_missing_the_action() {
        let errors = validate(
            r#"
            entity user {}
            entity folder {
                relation viewer @user
            }
            entity doc {
                relation parent @folder
                action view = parent.view
            }
            "#,
        )
        .unwrap_err();

        assert_eq!(
            errors,
            vec![SchemaError::UnknownPathAction {
                entity: "doc".to_string(),
                action: "view".to_string(),
                relation: "parent".to_string(),
                target: "folder".to_string(),
                target_action: "view".to_string(),
            }]
        );
    }

    #[test]
    fn path_targets_may_resolve_as_relations() {
        let result = validate(
            r#"
            entity user {}
            entity group {
                relation member @user
            }
            entity doc {
                relation team @group
                action view = team.member
            }
            "#,
        );

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn collects_multiple_errors() {
        let errors = validate(
            "entity doc { relation parent @folder action view = viewer }",
        )
        .unwrap_err();

        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&SchemaError::UserEntityRequired));
    }
}
