use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reserved entity name for concrete subjects.
pub const USER_ENTITY: &str = "user";

/// Relation sentinel accepted on the userset side of a serialized tuple to
/// mean "a concrete user rather than a userset".
pub const DIRECT_SENTINEL: &str = "...";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleError {
    #[error("malformed reference '{0}': expected entity:object_id")]
    MalformedRef(String),
    #[error("tuple field must not be empty: {0}")]
    EmptyField(&'static str),
    #[error("malformed tuple '{0}': expected entity:object_id#relation@subject")]
    MalformedTuple(String),
}

/// A concrete entity instance, e.g. `document:1` or `user:alice`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub entity: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(entity: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            object_id: object_id.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, TupleError> {
        match s.split_once(':') {
            Some((entity, object_id)) if !entity.is_empty() && !object_id.is_empty() => {
                Ok(Self::new(entity, object_id))
            }
            _ => Err(TupleError::MalformedRef(s.to_string())),
        }
    }
}

/// The userset side of a tuple: either a concrete user (`user:alice`) or a
/// reference to another relation (`document:1#owner`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub entity: String,
    pub object_id: String,
    pub relation: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleKind {
    User,
    Userset,
}

impl Subject {
    pub fn user(entity: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            object_id: object_id.into(),
            relation: None,
        }
    }

    pub fn userset(
        entity: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            object_id: object_id.into(),
            relation: Some(relation.into()),
        }
    }

    pub fn kind(&self) -> TupleKind {
        match self.relation {
            None => TupleKind::User,
            Some(_) => TupleKind::Userset,
        }
    }

    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(&self.entity, &self.object_id)
    }

    /// Relation component used for store ordering: direct users sort before
    /// any userset on the same entity.
    pub fn relation_key(&self) -> &str {
        self.relation.as_deref().unwrap_or("")
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity, self.object_id)?;
        if let Some(ref rel) = self.relation {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

impl FromStr for Subject {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, TupleError> {
        let (object, relation) = match s.split_once('#') {
            Some((object, rel)) if rel.is_empty() || rel == DIRECT_SENTINEL => (object, None),
            Some((object, rel)) => (object, Some(rel.to_string())),
            None => (s, None),
        };
        let object: ObjectRef = object.parse()?;
        Ok(Self {
            entity: object.entity,
            object_id: object.object_id,
            relation,
        })
    }
}

/// An immutable relation fact: `entity:object_id#relation@subject`.
///
/// The `Display` form is the canonical string used for uniqueness; the
/// userset relation is omitted when the subject is a concrete user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: Subject,
}

impl Tuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }

    pub fn canonical(&self) -> String {
        self.to_string()
    }

    pub fn validate(&self) -> Result<(), TupleError> {
        if self.object.entity.is_empty() {
            return Err(TupleError::EmptyField("entity"));
        }
        if self.object.object_id.is_empty() {
            return Err(TupleError::EmptyField("object_id"));
        }
        if self.relation.is_empty() {
            return Err(TupleError::EmptyField("relation"));
        }
        if self.subject.entity.is_empty() {
            return Err(TupleError::EmptyField("userset_entity"));
        }
        if self.subject.object_id.is_empty() {
            return Err(TupleError::EmptyField("userset_object_id"));
        }
        if let Some(ref rel) = self.subject.relation
            && rel.is_empty()
        {
            return Err(TupleError::EmptyField("userset_relation"));
        }
        Ok(())
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

impl FromStr for Tuple {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, TupleError> {
        let (left, subject) = s
            .split_once('@')
            .ok_or_else(|| TupleError::MalformedTuple(s.to_string()))?;
        let (object, relation) = left
            .split_once('#')
            .ok_or_else(|| TupleError::MalformedTuple(s.to_string()))?;
        let tuple = Self {
            object: object.parse()?,
            relation: relation.to_string(),
            subject: subject.parse()?,
        };
        tuple.validate()?;
        Ok(tuple)
    }
}

/// Field-wise tuple filter used by relationship reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub entity: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_entity: Option<String>,
    pub subject_object_id: Option<String>,
    pub subject_relation: Option<Option<String>>,
}

impl TupleFilter {
    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(ref e) = self.entity
            && e != &tuple.object.entity
        {
            return false;
        }
        if let Some(ref oi) = self.object_id
            && oi != &tuple.object.object_id
        {
            return false;
        }
        if let Some(ref r) = self.relation
            && r != &tuple.relation
        {
            return false;
        }
        if let Some(ref se) = self.subject_entity
            && se != &tuple.subject.entity
        {
            return false;
        }
        if let Some(ref si) = self.subject_object_id
            && si != &tuple.subject.object_id
        {
            return false;
        }
        if let Some(ref sr) = self.subject_relation
            && sr != &tuple.subject.relation
        {
            return false;
        }
        true
    }
}
