//! Criteria policies: the SQL shape of each restriction operator.

use crate::models::Operator;

/// Where the wildcard goes for pattern operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikePattern {
    /// `%v%`
    Contains,
    /// `v%`
    BeginsWith,
    /// `%v`
    EndsWith,
}

impl LikePattern {
    pub fn apply(&self, value: &str) -> String {
        match self {
            Self::Contains => format!("%{}%", value),
            Self::BeginsWith => format!("{}%", value),
            Self::EndsWith => format!("%{}", value),
        }
    }
}

/// Rendering shape of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriteriaShape {
    /// `field IS NULL`
    Single(&'static str),
    /// `field = ?`
    Comparison(&'static str),
    /// `field BETWEEN ? AND ?`
    Range(&'static str),
    /// `field IN (?, ?)` groups joined by `join`
    Membership {
        keyword: &'static str,
        join: &'static str,
    },
    /// `field LIKE ?` with the wildcard applied to the operand
    Pattern {
        keyword: &'static str,
        pattern: LikePattern,
    },
    /// Children joined by ` AND ` / ` OR `
    Compound(&'static str),
    /// `NOT (..)`
    Negation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriteriaPolicy {
    operator: Operator,
    shape: CriteriaShape,
}

impl CriteriaPolicy {
    pub fn new(operator: Operator, shape: CriteriaShape) -> Self {
        Self { operator, shape }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn shape(&self) -> CriteriaShape {
        self.shape
    }

    /// Policies shared by every supported dialect.
    pub fn standard_set() -> Vec<CriteriaPolicy> {
        use CriteriaShape::*;
        use Operator::*;

        vec![
            Self::new(Equals, Comparison("=")),
            Self::new(NotEquals, Comparison("<>")),
            Self::new(Less, Comparison("<")),
            Self::new(LessOrEqual, Comparison("<=")),
            Self::new(Greater, Comparison(">")),
            Self::new(GreaterOrEqual, Comparison(">=")),
            Self::new(Between, Range("BETWEEN")),
            Self::new(NotBetween, Range("NOT BETWEEN")),
            Self::new(
                Amongst,
                Membership {
                    keyword: "IN",
                    join: " OR ",
                },
            ),
            Self::new(
                NotAmongst,
                Membership {
                    keyword: "NOT IN",
                    join: " AND ",
                },
            ),
            Self::new(
                Like,
                Pattern {
                    keyword: "LIKE",
                    pattern: LikePattern::Contains,
                },
            ),
            Self::new(
                NotLike,
                Pattern {
                    keyword: "NOT LIKE",
                    pattern: LikePattern::Contains,
                },
            ),
            Self::new(
                BeginsWith,
                Pattern {
                    keyword: "LIKE",
                    pattern: LikePattern::BeginsWith,
                },
            ),
            Self::new(
                NotBeginsWith,
                Pattern {
                    keyword: "NOT LIKE",
                    pattern: LikePattern::BeginsWith,
                },
            ),
            Self::new(
                EndsWith,
                Pattern {
                    keyword: "LIKE",
                    pattern: LikePattern::EndsWith,
                },
            ),
            Self::new(
                NotEndsWith,
                Pattern {
                    keyword: "NOT LIKE",
                    pattern: LikePattern::EndsWith,
                },
            ),
            Self::new(IsNull, Single("IS NULL")),
            Self::new(IsNotNull, Single("IS NOT NULL")),
            Self::new(And, Compound(" AND ")),
            Self::new(Or, Compound(" OR ")),
            Self::new(Not, Negation),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_covers_every_operator() {
        let set = CriteriaPolicy::standard_set();
        for op in Operator::ALL {
            assert!(set.iter().any(|p| p.operator() == op), "missing {}", op);
        }
    }

    #[test]
    fn test_like_patterns() {
        assert_eq!(LikePattern::BeginsWith.apply("ab"), "ab%");
        assert_eq!(LikePattern::EndsWith.apply("ab"), "%ab");
        assert_eq!(LikePattern::Contains.apply("ab"), "%ab%");
    }
}
