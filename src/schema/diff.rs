//! Comparison of declared entity shapes against the live catalog.

use crate::dialect::{DataTypePolicy, Dialect};
use crate::error::DbResult;
use crate::models::{
    ColumnInfo, EntitySchemaDescriptor, FieldSchemaDescriptor, ForeignKeyDescriptor,
    ForeignKeyInfo, IndexInfo, SchemaChangeSet, ViewDescriptor,
};
use tracing::debug;

/// Column-level differences of one table.
#[derive(Debug, Default)]
pub struct TableDiff<'e, 'l> {
    /// Declared fields with no live column
    pub missing: Vec<&'e FieldSchemaDescriptor>,
    pub altered: Vec<(&'e FieldSchemaDescriptor, SchemaChangeSet)>,
    /// Live columns no field maps to
    pub abandoned: Vec<&'l ColumnInfo>,
}

impl TableDiff<'_, '_> {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.altered.is_empty() && self.abandoned.is_empty()
    }

    pub fn has_data_change(&self) -> bool {
        self.altered.iter().any(|(_, changes)| changes.is_data_change())
    }
}

/// Diff every declared field of an entity against the live columns of its table.
pub fn table_diff<'e, 'l>(
    dialect: &Dialect,
    entity: &'e EntitySchemaDescriptor,
    live: &'l [ColumnInfo],
) -> DbResult<TableDiff<'e, 'l>> {
    let mut diff = TableDiff::default();
    for field in &entity.fields {
        match find_column(live, &field.column) {
            Some(column) => {
                let changes = column_changes(dialect, field, column)?;
                if changes.is_altered() {
                    debug!(
                        table = %entity.table,
                        column = %field.column,
                        ?changes,
                        live_type = %column.declared_type,
                        "Column differs from declaration"
                    );
                    diff.altered.push((field, changes));
                }
            }
            None => diff.missing.push(field),
        }
    }
    diff.abandoned = live
        .iter()
        .filter(|column| entity.field_by_column(&column.name).is_none())
        .collect();
    Ok(diff)
}

pub fn find_column<'l>(live: &'l [ColumnInfo], name: &str) -> Option<&'l ColumnInfo> {
    live.iter().find(|c| c.name.eq_ignore_ascii_case(name))
}

/// Changes needed to bring one live column in line with its field.
pub fn column_changes(
    dialect: &Dialect,
    field: &FieldSchemaDescriptor,
    live: &ColumnInfo,
) -> DbResult<SchemaChangeSet> {
    let policy = dialect.type_policy(field.column_type)?;
    let type_change = !policy.matches_native(&live.type_name);
    Ok(SchemaChangeSet {
        type_change,
        length_change: !type_change && length_differs(policy, field, live),
        nullable_change: !field.primary_key && field.nullable != live.nullable,
        default_change: !field.primary_key
            && !defaults_match(policy, field.declared_default(), live.default_value.as_deref()),
    })
}

fn length_differs(policy: &DataTypePolicy, field: &FieldSchemaDescriptor, live: &ColumnInfo) -> bool {
    if policy.is_fixed_length() {
        return false;
    }
    let (size, digits) = policy.effective_size(field.length, field.precision, field.scale);
    if size == 0 {
        return false;
    }
    let size_differs = live.size.is_some_and(|live_size| live_size != size);
    let digits_differ =
        policy.has_precision() && live.decimal_digits.is_some_and(|live_digits| live_digits != digits);
    size_differs || digits_differ
}

/// Whether a live default stands for the declared one.
///
/// With nothing declared, a blank live default or one equal to the type's
/// alternate default is accepted.
pub fn defaults_match(policy: &DataTypePolicy, declared: Option<&str>, live: Option<&str>) -> bool {
    let live = live.map(normalize_default).filter(|v| !v.is_empty());
    match declared {
        Some(declared) => match live {
            Some(live) => same_default(&normalize_default(declared), &live),
            None => normalize_default(declared).is_empty(),
        },
        None => match (live, policy.alt_default()) {
            (None, _) => true,
            (Some(live), Some(alt)) => same_default(&normalize_default(alt), &live),
            (Some(_), None) => false,
        },
    }
}

fn same_default(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Reduce a default expression to a comparable form.
///
/// Strips `::type` casts, wrapping parentheses and quotes, and folds case.
pub fn normalize_default(value: &str) -> String {
    let mut text = value.trim().to_string();
    loop {
        let before = text.len();
        if let Some(cast) = cast_start(&text) {
            text.truncate(cast);
        }
        let trimmed = text.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('(') && trimmed.ends_with(')') {
            text = trimmed[1..trimmed.len() - 1].trim().to_string();
        } else {
            text = trimmed.to_string();
        }
        if text.len() == before {
            break;
        }
    }
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        text = text[1..text.len() - 1].to_string();
    }
    let lower = text.to_lowercase();
    match lower.as_str() {
        "now()" | "current_timestamp()" | "current_timestamp(0)" => "current_timestamp".to_string(),
        "curdate()" | "current_date()" => "current_date".to_string(),
        _ => lower,
    }
}

/// Byte offset of a trailing `::type` cast outside quotes.
fn cast_start(text: &str) -> Option<usize> {
    let mut quoted = false;
    let bytes = text.as_bytes();
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => quoted = !quoted,
            b':' if !quoted && bytes.get(i + 1) == Some(&b':') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Column names of the given fields, in order.
pub fn field_columns(entity: &EntitySchemaDescriptor, fields: &[String]) -> DbResult<Vec<String>> {
    fields
        .iter()
        .map(|name| entity.require_field(name).map(|f| f.column.clone()))
        .collect()
}

/// Whether a live index has the shape of a declared constraint or index.
///
/// Names are not compared: any live index over the same columns with the
/// same uniqueness satisfies the declaration.
pub fn index_matches(live: &IndexInfo, columns: &[String], unique: bool) -> bool {
    !live.primary && live.unique == unique && live.covers(columns)
}

/// Whether a live foreign key stands for a declared one.
///
/// Names are compared when the catalog reports them; otherwise the column and
/// referenced table decide, ignoring any schema prefix.
pub fn foreign_key_matches(
    live: &ForeignKeyInfo,
    declared: &ForeignKeyDescriptor,
    column: &str,
    target_table: &str,
) -> bool {
    if live
        .name
        .as_deref()
        .is_some_and(|name| name.eq_ignore_ascii_case(&declared.name))
    {
        return true;
    }
    live.columns.len() == 1
        && live.columns[0].eq_ignore_ascii_case(column)
        && unqualified(&live.referenced_table).eq_ignore_ascii_case(unqualified(target_table))
}

pub fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Whether a live view exposes exactly the declared columns, in order.
pub fn view_columns_match(view: &ViewDescriptor, live: &[ColumnInfo]) -> bool {
    view.columns.len() == live.len()
        && view
            .columns
            .iter()
            .zip(live)
            .all(|(declared, live)| declared.name.eq_ignore_ascii_case(&live.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ColumnType;

    fn sqlite() -> &'static Dialect {
        Dialect::sqlite()
    }

    #[test]
    fn test_normalize_default_strips_decoration() {
        assert_eq!(normalize_default("'N'::bpchar"), "n");
        assert_eq!(normalize_default("('active')"), "active");
        assert_eq!(normalize_default("''::character varying"), "");
        assert_eq!(normalize_default(" CURRENT_TIMESTAMP "), "current_timestamp");
        assert_eq!(normalize_default("now()"), "current_timestamp");
        assert_eq!(normalize_default("'a::b'"), "a::b");
    }

    #[test]
    fn test_numeric_defaults_compare_by_value() {
        let policy = sqlite().type_policy(ColumnType::Decimal).unwrap();
        assert!(defaults_match(policy, Some("0"), Some("0.0000")));
        assert!(defaults_match(policy, None, Some("0.00")));
        assert!(!defaults_match(policy, Some("1"), Some("0")));
    }

    #[test]
    fn test_undeclared_default_accepts_alternate() {
        let policy = sqlite().type_policy(ColumnType::Boolean).unwrap();
        assert!(defaults_match(policy, None, Some("'N'")));
        assert!(defaults_match(policy, None, None));
        assert!(!defaults_match(policy, None, Some("'Y'")));

        let enum_policy = sqlite().type_policy(ColumnType::EnumConst).unwrap();
        assert!(!defaults_match(enum_policy, None, Some("'A'")));
    }

    #[test]
    fn test_declared_default_must_be_present() {
        let policy = sqlite().type_policy(ColumnType::String).unwrap();
        assert!(defaults_match(policy, Some("active"), Some("'active'")));
        assert!(!defaults_match(policy, Some("active"), None));
    }

    #[test]
    fn test_column_changes_detects_length_and_nullability() {
        let field = FieldSchemaDescriptor::new("name", ColumnType::String, 2).with_length(64);
        let live = ColumnInfo::new("name", "VARCHAR(32)", true).with_default(Some("''".into()));
        let changes = column_changes(sqlite(), &field, &live).unwrap();
        assert!(changes.length_change);
        assert!(changes.nullable_change);
        assert!(!changes.type_change);
        assert!(!changes.default_change);
    }

    #[test]
    fn test_column_changes_detects_type() {
        let field = FieldSchemaDescriptor::new("amount", ColumnType::Long, 2);
        let live = ColumnInfo::new("amount", "VARCHAR(20)", false).with_default(Some("0".into()));
        let changes = column_changes(sqlite(), &field, &live).unwrap();
        assert!(changes.type_change);
        assert!(!changes.length_change);
        assert!(changes.is_data_change());
    }

    #[test]
    fn test_created_column_shows_no_changes() {
        let field = FieldSchemaDescriptor::new("price", ColumnType::Decimal, 3).with_precision(12, 2);
        let live = ColumnInfo::new("PRICE", "NUMERIC(12,2)", false).with_default(Some("0".into()));
        assert!(!column_changes(sqlite(), &field, &live).unwrap().is_altered());
    }

    #[test]
    fn test_table_diff_partitions_columns() {
        let entity = EntitySchemaDescriptor::new("customer", "CUSTOMER")
            .with_field(FieldSchemaDescriptor::new("id", ColumnType::Long, 1).primary_key())
            .with_field(FieldSchemaDescriptor::new("name", ColumnType::String, 2).nullable())
            .with_field(FieldSchemaDescriptor::new("email", ColumnType::String, 3).nullable());
        let live = vec![
            ColumnInfo::new("id", "BIGINT", false).with_primary_key(true),
            ColumnInfo::new("name", "VARCHAR(255)", true),
            ColumnInfo::new("legacy", "TEXT", false),
        ];
        let diff = table_diff(sqlite(), &entity, &live).unwrap();
        assert_eq!(diff.missing.len(), 1);
        assert_eq!(diff.missing[0].name, "email");
        assert!(diff.altered.is_empty());
        assert_eq!(diff.abandoned.len(), 1);
        assert_eq!(diff.abandoned[0].name, "legacy");
    }

    #[test]
    fn test_foreign_key_match_ignores_schema_prefix() {
        let declared = ForeignKeyDescriptor {
            name: "ORDERS_FK01".to_string(),
            field: "customerId".to_string(),
            target_entity: "customer".to_string(),
            target_field: "id".to_string(),
        };
        let live = ForeignKeyInfo {
            name: None,
            columns: vec!["CUSTOMER_ID".to_string()],
            referenced_table: "CUSTOMER".to_string(),
            referenced_columns: vec!["ID".to_string()],
        };
        assert!(foreign_key_matches(&live, &declared, "customer_id", "main.customer"));
        assert!(!foreign_key_matches(&live, &declared, "other_id", "customer"));
    }

    #[test]
    fn test_index_match_by_shape() {
        let columns = vec!["code".to_string()];
        let live = IndexInfo::new("orders_uc01", vec!["CODE".to_string()]).unique(true);
        assert!(index_matches(&live, &columns, true));
        assert!(!index_matches(&live, &columns, false));
        assert!(!index_matches(&live, &["code".to_string(), "id".to_string()], true));
        assert!(!index_matches(&live.clone().primary(true), &columns, true));
    }
}
