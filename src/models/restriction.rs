//! Restriction trees used to filter queries and views.

use crate::models::value::SqlValue;
use serde::{Deserialize, Serialize};

/// Criteria operators. Every dialect registers one policy per operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Between,
    NotBetween,
    /// IN
    Amongst,
    /// NOT IN
    NotAmongst,
    Like,
    NotLike,
    BeginsWith,
    NotBeginsWith,
    EndsWith,
    NotEndsWith,
    IsNull,
    IsNotNull,
    And,
    Or,
    Not,
}

impl Operator {
    pub const ALL: [Operator; 21] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::Less,
        Operator::LessOrEqual,
        Operator::Greater,
        Operator::GreaterOrEqual,
        Operator::Between,
        Operator::NotBetween,
        Operator::Amongst,
        Operator::NotAmongst,
        Operator::Like,
        Operator::NotLike,
        Operator::BeginsWith,
        Operator::NotBeginsWith,
        Operator::EndsWith,
        Operator::NotEndsWith,
        Operator::IsNull,
        Operator::IsNotNull,
        Operator::And,
        Operator::Or,
        Operator::Not,
    ];
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Right-hand side of a comparison: a bound value or another field.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(SqlValue),
    Field(String),
}

impl Operand {
    pub fn value(value: impl Into<SqlValue>) -> Self {
        Operand::Value(value.into())
    }
}

/// A restriction tree.
///
/// Field names may carry a table alias prefix (`T2.name`); without one the
/// first table of the translation context is assumed.
#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    Single {
        op: Operator,
        field: String,
    },
    Binary {
        op: Operator,
        field: String,
        operand: Operand,
    },
    Range {
        op: Operator,
        field: String,
        lower: Operand,
        upper: Operand,
    },
    Multiple {
        op: Operator,
        field: String,
        values: Vec<SqlValue>,
    },
    Compound {
        op: Operator,
        children: Vec<Restriction>,
    },
    Not(Box<Restriction>),
}

impl Restriction {
    pub fn binary(op: Operator, field: impl Into<String>, operand: Operand) -> Self {
        Restriction::Binary {
            op,
            field: field.into(),
            operand,
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::Equals, field, Operand::value(value))
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::NotEquals, field, Operand::value(value))
    }

    pub fn less(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::Less, field, Operand::value(value))
    }

    pub fn less_or_equal(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::LessOrEqual, field, Operand::value(value))
    }

    pub fn greater(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::Greater, field, Operand::value(value))
    }

    pub fn greater_or_equal(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::GreaterOrEqual, field, Operand::value(value))
    }

    /// Compare against another field rather than a value.
    pub fn equals_field(field: impl Into<String>, other: impl Into<String>) -> Self {
        Self::binary(Operator::Equals, field, Operand::Field(other.into()))
    }

    pub fn like(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::Like, field, Operand::value(value))
    }

    pub fn not_like(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::NotLike, field, Operand::value(value))
    }

    pub fn begins_with(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::BeginsWith, field, Operand::value(value))
    }

    pub fn not_begins_with(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::NotBeginsWith, field, Operand::value(value))
    }

    pub fn ends_with(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::EndsWith, field, Operand::value(value))
    }

    pub fn not_ends_with(field: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::binary(Operator::NotEndsWith, field, Operand::value(value))
    }

    pub fn between(
        field: impl Into<String>,
        lower: impl Into<SqlValue>,
        upper: impl Into<SqlValue>,
    ) -> Self {
        Restriction::Range {
            op: Operator::Between,
            field: field.into(),
            lower: Operand::value(lower),
            upper: Operand::value(upper),
        }
    }

    pub fn not_between(
        field: impl Into<String>,
        lower: impl Into<SqlValue>,
        upper: impl Into<SqlValue>,
    ) -> Self {
        Restriction::Range {
            op: Operator::NotBetween,
            field: field.into(),
            lower: Operand::value(lower),
            upper: Operand::value(upper),
        }
    }

    pub fn amongst<V: Into<SqlValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Restriction::Multiple {
            op: Operator::Amongst,
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn not_amongst<V: Into<SqlValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Restriction::Multiple {
            op: Operator::NotAmongst,
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Restriction::Single {
            op: Operator::IsNull,
            field: field.into(),
        }
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Restriction::Single {
            op: Operator::IsNotNull,
            field: field.into(),
        }
    }

    pub fn and(children: Vec<Restriction>) -> Self {
        Restriction::Compound {
            op: Operator::And,
            children,
        }
    }

    pub fn or(children: Vec<Restriction>) -> Self {
        Restriction::Compound {
            op: Operator::Or,
            children,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(restriction: Restriction) -> Self {
        Restriction::Not(Box::new(restriction))
    }

    /// The operator at the root of this tree.
    pub fn operator(&self) -> Operator {
        match self {
            Restriction::Single { op, .. }
            | Restriction::Binary { op, .. }
            | Restriction::Range { op, .. }
            | Restriction::Multiple { op, .. }
            | Restriction::Compound { op, .. } => *op,
            Restriction::Not(_) => Operator::Not,
        }
    }
}
