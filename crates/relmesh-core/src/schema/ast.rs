use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tuple::USER_ENTITY;

/// A parsed schema: an ordered list of entity statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaAst {
    pub statements: Vec<EntityStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AstError {
    #[error("schema must define an entity named '{USER_ENTITY}'")]
    UserEntityRequired,
}

impl SchemaAst {
    /// Structural check: every schema must declare the reserved `user` entity.
    pub fn validate(&self) -> Result<(), AstError> {
        if self.statements.iter().any(|s| s.name == USER_ENTITY) {
            Ok(())
        } else {
            Err(AstError::UserEntityRequired)
        }
    }

    pub fn get_entity(&self, name: &str) -> Option<&EntityStatement> {
        self.statements.iter().find(|s| s.name == name)
    }
}

impl fmt::Display for SchemaAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for statement in &self.statements {
            writeln!(f, "{statement}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStatement {
    pub name: String,
    pub relations: Vec<RelationStatement>,
    pub actions: Vec<ActionStatement>,
    pub option: Option<String>,
}

impl fmt::Display for EntityStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity {} {{", self.name)?;
        if !self.relations.is_empty() || !self.actions.is_empty() {
            writeln!(f)?;
            for relation in &self.relations {
                writeln!(f, "{relation}")?;
            }
            for action in &self.actions {
                writeln!(f, "{action}")?;
            }
        }
        write!(f, "}}")?;
        if let Some(ref option) = self.option {
            write!(f, " `{option}`")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationStatement {
    pub name: String,
    pub types: Vec<RelationTypeStatement>,
    pub option: Option<String>,
}

impl fmt::Display for RelationStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    relation {}", self.name)?;
        for rel_type in &self.types {
            write!(f, " {rel_type}")?;
        }
        if let Some(ref option) = self.option {
            write!(f, " `{option}`")?;
        }
        Ok(())
    }
}

/// A relation type reference: `entity`, `@entity`, or `@entity#relation`.
/// The leading `@` marks that the relation accepts subjects of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTypeStatement {
    pub signed: bool,
    pub entity: String,
    pub relation: Option<String>,
}

impl fmt::Display for RelationTypeStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.signed {
            write!(f, "@")?;
        }
        write!(f, "{}", self.entity)?;
        if let Some(ref relation) = self.relation {
            write!(f, "#{relation}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionStatement {
    pub name: String,
    pub expression: Expression,
}

impl fmt::Display for ActionStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    action {} = {}", self.name, self.expression)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfixOp {
    And,
    Or,
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfixOp::And => write!(f, "and"),
            InfixOp::Or => write!(f, "or"),
        }
    }
}

/// A boolean action expression over relations and actions.
///
/// Leaves reference relations or actions by name; the evaluator binds them
/// against the current entity's definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    Identifier {
        name: String,
    },
    /// `relation.action`: follow the relation's tuples into another entity
    /// and evaluate the named action there.
    Path {
        relation: String,
        action: String,
    },
    Infix {
        op: InfixOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not {
        operand: Box<Expression>,
    },
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Identifier { name } => write!(f, "{name}"),
            Expression::Path { relation, action } => write!(f, "{relation}.{action}"),
            Expression::Infix { op, left, right } => write!(f, "({left} {op} {right})"),
            Expression::Not { operand } => write!(f, "not {operand}"),
        }
    }
}

impl Expression {
    pub fn ident(name: impl Into<String>) -> Self {
        Expression::Identifier { name: name.into() }
    }

    pub fn path(relation: impl Into<String>, action: impl Into<String>) -> Self {
        Expression::Path {
            relation: relation.into(),
            action: action.into(),
        }
    }

    pub fn infix(op: InfixOp, left: Expression, right: Expression) -> Self {
        Expression::Infix {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expression) -> Self {
        Expression::Not {
            operand: Box::new(operand),
        }
    }
}
