use serde::{Deserialize, Serialize};

use super::ast::{EntityStatement, Expression, RelationTypeStatement, SchemaAst};

/// A fully compiled schema: the ordered entity definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub entities: Vec<EntityDefinition>,
}

impl SchemaDefinition {
    pub fn get_entity(&self, name: &str) -> Option<&EntityDefinition> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// One entity's compiled definition: relations and actions in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
    pub actions: Vec<ActionDefinition>,
}

impl EntityDefinition {
    pub fn get_relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn get_action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub types: Vec<RelationTypeStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub expression: Expression,
}

impl From<&EntityStatement> for EntityDefinition {
    fn from(statement: &EntityStatement) -> Self {
        Self {
            name: statement.name.clone(),
            relations: statement
                .relations
                .iter()
                .map(|r| RelationDefinition {
                    name: r.name.clone(),
                    types: r.types.clone(),
                })
                .collect(),
            actions: statement
                .actions
                .iter()
                .map(|a| ActionDefinition {
                    name: a.name.clone(),
                    expression: a.expression.clone(),
                })
                .collect(),
        }
    }
}

impl From<&SchemaAst> for SchemaDefinition {
    fn from(ast: &SchemaAst) -> Self {
        Self {
            entities: ast.statements.iter().map(EntityDefinition::from).collect(),
        }
    }
}
