//! Data-type policies: how one logical column type is declared, defaulted,
//! bound and read on a particular dialect.

use crate::db::row::{ColumnRef, DbRow};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnType, SqlParameter, SqlValue};
use chrono::{NaiveDate, NaiveDateTime};

/// How a native type declaration is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeSyntax {
    /// A bare type name such as `BIGINT`
    Plain(&'static str),
    /// `NAME(length)`, falling back to `default_length` when no length is declared
    Length {
        name: &'static str,
        default_length: u32,
    },
    /// `NAME(precision,scale)` with defaults for undeclared values
    Precision {
        name: &'static str,
        default_precision: u32,
        default_scale: u32,
    },
}

/// SQL keywords that are never quoted in a default clause.
const DEFAULT_KEYWORDS: &[&str] = &[
    "NULL",
    "CURRENT_TIMESTAMP",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "LOCALTIMESTAMP",
    "NOW()",
    "TRUE",
    "FALSE",
];

/// Keywords whose value is taken at insert time.
const CLOCK_KEYWORDS: &[&str] = &[
    "CURRENT_TIMESTAMP",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "LOCALTIMESTAMP",
    "NOW()",
];

/// Whether a rendered default is a constant: a literal, `NULL`, `TRUE` or `FALSE`.
///
/// Clock keywords and parenthesized or function expressions are not.
pub fn is_constant_default(rendered: &str) -> bool {
    let value = rendered.trim();
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return true;
    }
    !CLOCK_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(value)) && !value.contains('(')
}

/// Type names that stand for each other in catalog comparisons.
const SWAPPABLE: &[&str] = &["decimal", "numeric"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTypePolicy {
    column_type: ColumnType,
    syntax: TypeSyntax,
    native_names: &'static [&'static str],
    fixed_length: bool,
    quoted: bool,
    alt_default: Option<&'static str>,
}

impl DataTypePolicy {
    pub fn new(
        column_type: ColumnType,
        syntax: TypeSyntax,
        native_names: &'static [&'static str],
    ) -> Self {
        let fixed_length = matches!(syntax, TypeSyntax::Plain(_));
        Self {
            column_type,
            syntax,
            native_names,
            fixed_length,
            quoted: false,
            alt_default: None,
        }
    }

    /// Values of this type are quoted in default clauses and literals.
    pub fn quoted(mut self) -> Self {
        self.quoted = true;
        self
    }

    /// Treat the declared length as fixed so length changes are never detected.
    pub fn fixed(mut self) -> Self {
        self.fixed_length = true;
        self
    }

    /// Default used for NOT NULL columns that declare none.
    pub fn with_alt_default(mut self, value: &'static str) -> Self {
        self.alt_default = Some(value);
        self
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_fixed_length(&self) -> bool {
        self.fixed_length
    }

    pub fn is_quoted(&self) -> bool {
        self.quoted
    }

    pub fn alt_default(&self) -> Option<&'static str> {
        self.alt_default
    }

    pub fn native_names(&self) -> &'static [&'static str] {
        self.native_names
    }

    pub fn has_precision(&self) -> bool {
        matches!(self.syntax, TypeSyntax::Precision { .. })
    }

    /// Render the native type declaration. Zero values fall back to the policy default.
    pub fn type_sql(&self, length: u32, precision: u32, scale: u32) -> String {
        match self.syntax {
            TypeSyntax::Plain(name) => name.to_string(),
            TypeSyntax::Length {
                name,
                default_length,
            } => {
                let length = if length == 0 { default_length } else { length };
                format!("{}({})", name, length)
            }
            TypeSyntax::Precision { name, .. } => {
                let (precision, scale) = self.effective_size(length, precision, scale);
                format!("{}({},{})", name, precision, scale)
            }
        }
    }

    /// Effective length and scale, after defaults, for catalog comparison.
    pub fn effective_size(&self, length: u32, precision: u32, scale: u32) -> (u32, u32) {
        match self.syntax {
            TypeSyntax::Plain(_) => (0, 0),
            TypeSyntax::Length { default_length, .. } => {
                (if length == 0 { default_length } else { length }, 0)
            }
            TypeSyntax::Precision {
                default_precision,
                default_scale,
                ..
            } => {
                if precision == 0 {
                    (default_precision, if scale == 0 { default_scale } else { scale })
                } else {
                    (precision, scale)
                }
            }
        }
    }

    /// Render a default value as it appears after `DEFAULT`.
    ///
    /// Uses the alternate default when nothing is declared. Returns `None` when
    /// neither exists.
    pub fn default_value(&self, declared: Option<&str>) -> Option<String> {
        let value = declared
            .filter(|v| !v.trim().is_empty())
            .or(self.alt_default)?;
        Some(self.quote_default(value.trim()))
    }

    /// Render ` DEFAULT <value>` or an empty string.
    pub fn default_sql(&self, declared: Option<&str>) -> String {
        self.default_value(declared)
            .map(|v| format!(" DEFAULT {}", v))
            .unwrap_or_default()
    }

    fn quote_default(&self, value: &str) -> String {
        let is_keyword = DEFAULT_KEYWORDS
            .iter()
            .any(|k| k.eq_ignore_ascii_case(value));
        let is_expression = value.starts_with('(');
        let already_quoted = value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'');
        if !self.quoted || is_keyword || is_expression || already_quoted {
            value.to_string()
        } else {
            format!("'{}'", value.replace('\'', "''"))
        }
    }

    /// Whether a catalog type name belongs to this policy. DECIMAL and NUMERIC are swappable.
    pub fn matches_native(&self, type_name: &str) -> bool {
        let lower = type_name.trim().to_lowercase();
        self.native_names.iter().any(|name| {
            *name == lower || (SWAPPABLE.contains(name) && SWAPPABLE.contains(&lower.as_str()))
        })
    }

    /// Coerce a value into the representation bound for this type.
    pub fn to_param(&self, value: &SqlValue) -> DbResult<SqlParameter> {
        let coerced = self.coerce(value)?;
        Ok(SqlParameter::new(self.column_type, coerced))
    }

    fn coerce(&self, value: &SqlValue) -> DbResult<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let mismatch = || {
            DbError::invalid_input(format!(
                "Value {:?} cannot be bound as {}",
                value, self.column_type
            ))
        };
        Ok(match self.column_type {
            ColumnType::Boolean => {
                let flag = match value {
                    SqlValue::Bool(b) => *b,
                    SqlValue::Char(c) => matches!(c.to_ascii_uppercase(), 'Y' | 'T' | '1'),
                    SqlValue::Text(t) => matches!(
                        t.trim().to_ascii_uppercase().as_str(),
                        "Y" | "T" | "1" | "TRUE" | "YES"
                    ),
                    other => other.as_i64().map(|v| v != 0).ok_or_else(mismatch)?,
                };
                SqlValue::Text(if flag { "Y" } else { "N" }.to_string())
            }
            ColumnType::Short => {
                let v = value.as_i64().ok_or_else(mismatch)?;
                SqlValue::Short(i16::try_from(v).map_err(|_| mismatch())?)
            }
            ColumnType::Integer => {
                let v = value.as_i64().ok_or_else(mismatch)?;
                SqlValue::Int(i32::try_from(v).map_err(|_| mismatch())?)
            }
            ColumnType::Long => SqlValue::Long(value.as_i64().ok_or_else(mismatch)?),
            ColumnType::Float => SqlValue::Float(value.as_f64().ok_or_else(mismatch)? as f32),
            ColumnType::Double => SqlValue::Double(value.as_f64().ok_or_else(mismatch)?),
            ColumnType::Decimal => match value {
                SqlValue::Decimal(d) => SqlValue::Decimal(d.clone()),
                other => {
                    let text = other.as_text().ok_or_else(mismatch)?;
                    text.trim().parse::<f64>().map_err(|_| mismatch())?;
                    SqlValue::Decimal(text.trim().to_string())
                }
            },
            ColumnType::Character => {
                let text = value.as_text().ok_or_else(mismatch)?;
                text.chars().next().map_or(SqlValue::Null, |c| SqlValue::Text(c.to_string()))
            }
            ColumnType::String | ColumnType::Clob | ColumnType::EnumConst => {
                SqlValue::Text(value.as_text().ok_or_else(mismatch)?)
            }
            ColumnType::Blob => match value {
                SqlValue::Bytes(b) => SqlValue::Bytes(b.clone()),
                SqlValue::Text(t) => SqlValue::Bytes(t.as_bytes().to_vec()),
                _ => return Err(mismatch()),
            },
            ColumnType::Date => match value {
                SqlValue::Date(d) => SqlValue::Date(*d),
                SqlValue::Timestamp(ts) => SqlValue::Date(ts.date()),
                SqlValue::Text(t) => SqlValue::Date(
                    NaiveDate::parse_from_str(t.trim(), "%Y-%m-%d").map_err(|_| mismatch())?,
                ),
                _ => return Err(mismatch()),
            },
            ColumnType::Timestamp => match value {
                SqlValue::Timestamp(ts) => SqlValue::Timestamp(*ts),
                SqlValue::Date(d) => SqlValue::Timestamp(d.and_hms_opt(0, 0, 0).ok_or_else(mismatch)?),
                SqlValue::Text(t) => SqlValue::Timestamp(
                    NaiveDateTime::parse_from_str(t.trim(), "%Y-%m-%d %H:%M:%S")
                        .map_err(|_| mismatch())?,
                ),
                _ => return Err(mismatch()),
            },
        })
    }

    /// Read a typed value from a result row, by name or by ordinal.
    pub fn extract<'a>(&self, row: &DbRow, at: impl Into<ColumnRef<'a>>) -> DbResult<SqlValue> {
        row.decode(at.into(), self.column_type)
    }

    /// Parameter registered for an output slot: a typed NULL.
    pub fn output_param(&self) -> SqlParameter {
        SqlParameter::new(self.column_type, SqlValue::Null)
    }

    /// Read an output value from the row returned by a call.
    pub fn read_output(&self, row: &DbRow, index: usize) -> DbResult<SqlValue> {
        row.decode(ColumnRef::Index(index), self.column_type)
    }
}
