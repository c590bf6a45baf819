//! Criteria translator.
//!
//! Turns a [`Restriction`] tree into a SQL condition. Prepared mode emits
//! placeholders and appends the bound parameters in order; native mode inlines
//! literals and is used for view definitions and native queries.

use crate::dialect::{CriteriaShape, Dialect};
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnType, EntitySchemaDescriptor, Operand, Restriction, SqlParameter, SqlValue,
};

/// Tables a restriction may refer to, each under an alias.
///
/// Without tables, field names are emitted as written.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext<'a> {
    tables: Vec<(String, &'a EntitySchemaDescriptor)>,
}

impl<'a> TranslationContext<'a> {
    pub fn none() -> Self {
        Self::default()
    }

    /// Context of a single entity under its own alias.
    pub fn entity(entity: &'a EntitySchemaDescriptor) -> Self {
        Self::default().with_table(entity.alias.clone(), entity)
    }

    pub fn with_table(mut self, alias: impl Into<String>, entity: &'a EntitySchemaDescriptor) -> Self {
        self.tables.push((alias.into(), entity));
        self
    }

    /// Resolve a field reference to its SQL expression and, when known, its column type.
    fn resolve(&self, field: &str) -> DbResult<(String, Option<ColumnType>)> {
        let (alias, name) = match field.split_once('.') {
            Some((alias, name)) => (Some(alias), name),
            None => (None, field),
        };

        if self.tables.is_empty() {
            return Ok((field.to_string(), None));
        }

        let (alias, entity) = match alias {
            Some(alias) => self
                .tables
                .iter()
                .find(|(a, _)| a.eq_ignore_ascii_case(alias))
                .ok_or_else(|| DbError::unknown_reference("table alias", alias))?,
            None => &self.tables[0],
        };

        let descriptor = entity.require_field(name)?;
        Ok((
            format!("{}.{}", alias, descriptor.column),
            Some(descriptor.column_type),
        ))
    }
}

enum Mode<'p> {
    Prepared(&'p mut Vec<SqlParameter>),
    Native,
}

/// Renders restriction trees for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaTranslator<'d> {
    dialect: &'d Dialect,
}

impl<'d> CriteriaTranslator<'d> {
    pub fn new(dialect: &'d Dialect) -> Self {
        Self { dialect }
    }

    /// Render with placeholders, appending parameters to `params` in placeholder order.
    ///
    /// Placeholder numbering continues from the parameters already in `params`.
    pub fn translate(
        &self,
        restriction: &Restriction,
        ctx: &TranslationContext<'_>,
        out: &mut String,
        params: &mut Vec<SqlParameter>,
    ) -> DbResult<()> {
        self.render(restriction, ctx, out, &mut Mode::Prepared(params))
    }

    /// Render with inline literals.
    pub fn translate_native(
        &self,
        restriction: &Restriction,
        ctx: &TranslationContext<'_>,
        out: &mut String,
    ) -> DbResult<()> {
        self.render(restriction, ctx, out, &mut Mode::Native)
    }

    fn render(
        &self,
        restriction: &Restriction,
        ctx: &TranslationContext<'_>,
        out: &mut String,
        mode: &mut Mode<'_>,
    ) -> DbResult<()> {
        let policy = self.dialect.criteria_policy(restriction.operator())?;

        match (restriction, policy.shape()) {
            (Restriction::Single { field, .. }, CriteriaShape::Single(keyword)) => {
                let (column, _) = ctx.resolve(field)?;
                out.push_str(&format!("{} {}", column, keyword));
            }
            (Restriction::Binary { field, operand, .. }, CriteriaShape::Comparison(symbol)) => {
                let (column, column_type) = ctx.resolve(field)?;
                let rhs = self.operand_sql(operand, column_type, ctx, mode)?;
                out.push_str(&format!("{} {} {}", column, symbol, rhs));
            }
            (
                Restriction::Binary { field, operand, .. },
                CriteriaShape::Pattern { keyword, pattern },
            ) => {
                let (column, _) = ctx.resolve(field)?;
                let rhs = match operand {
                    Operand::Value(value) => {
                        let text = value.as_text().ok_or_else(|| {
                            DbError::invalid_input(format!(
                                "Pattern operand for '{}' must be text",
                                field
                            ))
                        })?;
                        self.value_sql(&SqlValue::Text(pattern.apply(&text)), ColumnType::String, mode)?
                    }
                    Operand::Field(other) => {
                        let (other, _) = ctx.resolve(other)?;
                        self.dialect.like_expression(pattern, &other)
                    }
                };
                out.push_str(&format!("{} {} {}", column, keyword, rhs));
            }
            (
                Restriction::Range {
                    field,
                    lower,
                    upper,
                    ..
                },
                CriteriaShape::Range(keyword),
            ) => {
                let (column, column_type) = ctx.resolve(field)?;
                let lower = self.operand_sql(lower, column_type, ctx, mode)?;
                let upper = self.operand_sql(upper, column_type, ctx, mode)?;
                out.push_str(&format!("{} {} {} AND {}", column, keyword, lower, upper));
            }
            (
                Restriction::Multiple { field, values, .. },
                CriteriaShape::Membership { keyword, join },
            ) => {
                if values.is_empty() {
                    return Err(DbError::invalid_input(format!(
                        "{} on '{}' needs at least one value",
                        keyword, field
                    )));
                }
                let (column, column_type) = ctx.resolve(field)?;
                let chunk = match self.dialect.max_clause_values() {
                    0 => values.len(),
                    max => max,
                };
                let mut groups = Vec::with_capacity(values.len().div_ceil(chunk));
                for group in values.chunks(chunk) {
                    let mut items = Vec::with_capacity(group.len());
                    for value in group {
                        let column_type = column_type.unwrap_or_else(|| infer_type(value));
                        items.push(self.value_sql(value, column_type, mode)?);
                    }
                    groups.push(format!("{} {} ({})", column, keyword, items.join(", ")));
                }
                if groups.len() == 1 {
                    out.push_str(&groups[0]);
                } else {
                    out.push_str(&format!("({})", groups.join(join)));
                }
            }
            (Restriction::Compound { children, op }, CriteriaShape::Compound(join)) => {
                if children.is_empty() {
                    return Err(DbError::invalid_input(format!(
                        "{} restriction needs at least one child",
                        op
                    )));
                }
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    let mut part = String::new();
                    self.render(child, ctx, &mut part, mode)?;
                    parts.push(part);
                }
                if parts.len() == 1 {
                    out.push_str(&parts[0]);
                } else {
                    out.push_str(&format!("({})", parts.join(join)));
                }
            }
            (Restriction::Not(inner), CriteriaShape::Negation) => {
                let mut part = String::new();
                self.render(inner, ctx, &mut part, mode)?;
                out.push_str(&format!("NOT ({})", part));
            }
            (other, _) => {
                return Err(DbError::invalid_input(format!(
                    "Operator {} does not apply to {:?}",
                    other.operator(),
                    other
                )));
            }
        }
        Ok(())
    }

    fn operand_sql(
        &self,
        operand: &Operand,
        column_type: Option<ColumnType>,
        ctx: &TranslationContext<'_>,
        mode: &mut Mode<'_>,
    ) -> DbResult<String> {
        match operand {
            Operand::Field(other) => Ok(ctx.resolve(other)?.0),
            Operand::Value(value) => {
                let column_type = column_type.unwrap_or_else(|| infer_type(value));
                self.value_sql(value, column_type, mode)
            }
        }
    }

    fn value_sql(
        &self,
        value: &SqlValue,
        column_type: ColumnType,
        mode: &mut Mode<'_>,
    ) -> DbResult<String> {
        let param = self.dialect.type_policy(column_type)?.to_param(value)?;
        match mode {
            Mode::Prepared(params) => {
                params.push(param);
                Ok(self.dialect.placeholder(params.len()))
            }
            Mode::Native => Ok(self.dialect.literal(&param.value)),
        }
    }
}

/// Column type implied by a value when no field descriptor is available.
pub fn infer_type(value: &SqlValue) -> ColumnType {
    match value {
        SqlValue::Null | SqlValue::Text(_) => ColumnType::String,
        SqlValue::Bool(_) => ColumnType::Boolean,
        SqlValue::Short(_) => ColumnType::Short,
        SqlValue::Int(_) => ColumnType::Integer,
        SqlValue::Long(_) => ColumnType::Long,
        SqlValue::Float(_) => ColumnType::Float,
        SqlValue::Double(_) => ColumnType::Double,
        SqlValue::Decimal(_) => ColumnType::Decimal,
        SqlValue::Char(_) => ColumnType::Character,
        SqlValue::Bytes(_) => ColumnType::Blob,
        SqlValue::Date(_) => ColumnType::Date,
        SqlValue::Timestamp(_) => ColumnType::Timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldSchemaDescriptor;

    fn orders() -> EntitySchemaDescriptor {
        EntitySchemaDescriptor::new("order", "ORDERS")
            .with_field(
                FieldSchemaDescriptor::new("id", ColumnType::Long, 1)
                    .with_column("ID")
                    .primary_key(),
            )
            .with_field(
                FieldSchemaDescriptor::new("status", ColumnType::String, 2).with_column("STATUS"),
            )
            .with_field(
                FieldSchemaDescriptor::new("paid", ColumnType::Boolean, 3).with_column("PAID"),
            )
    }

    fn prepared(dialect: &Dialect, r: &Restriction, entity: &EntitySchemaDescriptor) -> (String, Vec<SqlParameter>) {
        let mut out = String::new();
        let mut params = Vec::new();
        CriteriaTranslator::new(dialect)
            .translate(r, &TranslationContext::entity(entity), &mut out, &mut params)
            .unwrap();
        (out, params)
    }

    #[test]
    fn test_equals_resolves_alias_and_column() {
        let (sql, params) = prepared(Dialect::postgres(), &Restriction::equals("status", "open"), &orders());
        assert_eq!(sql, "T1.STATUS = $1");
        assert_eq!(params, vec![SqlParameter::new(ColumnType::String, "open")]);
    }

    #[test]
    fn test_boolean_operand_is_coerced() {
        let (_, params) = prepared(Dialect::mysql(), &Restriction::equals("paid", true), &orders());
        assert_eq!(params[0].value, SqlValue::Text("Y".into()));
    }

    #[test]
    fn test_compound_wraps_multiple_children() {
        let r = Restriction::and(vec![
            Restriction::equals("status", "open"),
            Restriction::or(vec![
                Restriction::is_null("paid"),
                Restriction::equals("paid", false),
            ]),
        ]);
        let (sql, params) = prepared(Dialect::postgres(), &r, &orders());
        assert_eq!(
            sql,
            "(T1.STATUS = $1 AND (T1.PAID IS NULL OR T1.PAID = $2))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_single_child_compound_is_not_wrapped() {
        let r = Restriction::and(vec![Restriction::is_not_null("status")]);
        let (sql, _) = prepared(Dialect::sqlite(), &r, &orders());
        assert_eq!(sql, "T1.STATUS IS NOT NULL");
    }

    #[test]
    fn test_not_wraps_child() {
        let r = Restriction::not(Restriction::equals("status", "closed"));
        let (sql, _) = prepared(Dialect::sqlite(), &r, &orders());
        assert_eq!(sql, "NOT (T1.STATUS = ?)");
    }

    #[test]
    fn test_membership_chunks_by_dialect_limit() {
        let ids: Vec<i64> = (1..=2000).collect();
        let r = Restriction::amongst("id", ids);
        let (sql, params) = prepared(Dialect::sqlite(), &r, &orders());
        assert_eq!(params.len(), 2000);
        assert_eq!(sql.matches("T1.ID IN (").count(), 3);
        assert!(sql.starts_with("(T1.ID IN ("));
        assert_eq!(sql.matches(") OR T1.ID IN (").count(), 2);
        assert_eq!(params[0].value, SqlValue::Long(1));
        assert_eq!(params[1999].value, SqlValue::Long(2000));
    }

    #[test]
    fn test_membership_unlimited_single_group() {
        let r = Restriction::amongst("id", [1i64, 2, 3]);
        let (sql, _) = prepared(Dialect::postgres(), &r, &orders());
        assert_eq!(sql, "T1.ID IN ($1, $2, $3)");
    }

    #[test]
    fn test_not_amongst_groups_join_with_and() {
        let ids: Vec<i64> = (1..=1000).collect();
        let (sql, _) = prepared(Dialect::sqlite(), &Restriction::not_amongst("id", ids), &orders());
        assert!(sql.contains(") AND T1.ID NOT IN ("));
    }

    #[test]
    fn test_membership_empty_is_invalid() {
        let r = Restriction::amongst::<i64>("id", []);
        let mut out = String::new();
        let mut params = Vec::new();
        let orders = orders();
        let err = CriteriaTranslator::new(Dialect::postgres())
            .translate(&r, &TranslationContext::entity(&orders), &mut out, &mut params)
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[test]
    fn test_pattern_operand_gets_wildcards() {
        let (sql, params) = prepared(Dialect::postgres(), &Restriction::begins_with("status", "op"), &orders());
        assert_eq!(sql, "T1.STATUS LIKE $1");
        assert_eq!(params[0].value, SqlValue::Text("op%".into()));
    }

    #[test]
    fn test_unknown_field_is_reported() {
        let orders = orders();
        let mut out = String::new();
        let mut params = Vec::new();
        let err = CriteriaTranslator::new(Dialect::postgres())
            .translate(
                &Restriction::equals("missing", 1i64),
                &TranslationContext::entity(&orders),
                &mut out,
                &mut params,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownReference { .. }));
    }

    #[test]
    fn test_native_mode_inlines_literals() {
        let r = Restriction::and(vec![
            Restriction::equals("T1.STATUS", "it's"),
            Restriction::between("T1.ID", 1i64, 10i64),
        ]);
        let mut out = String::new();
        CriteriaTranslator::new(Dialect::mysql())
            .translate_native(&r, &TranslationContext::none(), &mut out)
            .unwrap();
        assert_eq!(out, "(T1.STATUS = 'it''s' AND T1.ID BETWEEN 1 AND 10)");
    }

    #[test]
    fn test_field_operand_comparison() {
        let region = EntitySchemaDescriptor::new("region", "REGION").with_field(
            FieldSchemaDescriptor::new("id", ColumnType::Long, 1)
                .with_column("ID")
                .primary_key(),
        );
        let orders = orders();
        let ctx = TranslationContext::entity(&orders).with_table("T2", &region);
        let mut out = String::new();
        CriteriaTranslator::new(Dialect::postgres())
            .translate_native(&Restriction::equals_field("T1.id", "T2.id"), &ctx, &mut out)
            .unwrap();
        assert_eq!(out, "T1.ID = T2.ID");
    }

    #[test]
    fn test_placeholder_numbering_continues() {
        let orders = orders();
        let mut out = String::new();
        let mut params = vec![SqlParameter::new(ColumnType::Long, 5i64)];
        CriteriaTranslator::new(Dialect::postgres())
            .translate(
                &Restriction::equals("status", "x"),
                &TranslationContext::entity(&orders),
                &mut out,
                &mut params,
            )
            .unwrap();
        assert_eq!(out, "T1.STATUS = $2");
    }
}
