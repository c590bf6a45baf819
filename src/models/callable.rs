//! Stored-procedure descriptors.

use crate::models::value::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    pub fn is_input(&self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

/// One procedure parameter bound from, or written back to, a procedure object field.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableParam {
    pub field: String,
    pub column_type: ColumnType,
    pub direction: ParameterDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAddressing {
    ByIndex,
    ByName,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultField {
    pub field: String,
    pub column: String,
    pub column_type: ColumnType,
}

/// Shape of a result set returned by a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultDescriptor {
    pub result_type: String,
    pub addressing: ResultAddressing,
    pub fields: Vec<ResultField>,
}

impl ResultDescriptor {
    pub fn new(result_type: impl Into<String>, addressing: ResultAddressing) -> Self {
        Self {
            result_type: result_type.into(),
            addressing,
            fields: Vec::new(),
        }
    }

    pub fn with_field(
        mut self,
        field: impl Into<String>,
        column: impl Into<String>,
        column_type: ColumnType,
    ) -> Self {
        self.fields.push(ResultField {
            field: field.into(),
            column: column.into(),
            column_type,
        });
        self
    }
}

/// Description of a stored procedure call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableDescriptor {
    /// Logical name used to look the procedure up
    pub name: String,
    pub procedure: String,
    pub schema: Option<String>,
    pub params: Vec<CallableParam>,
    pub results: Vec<ResultDescriptor>,
    /// Field receiving the return value, with its type
    pub return_value: Option<(String, ColumnType)>,
}

impl CallableDescriptor {
    pub fn new(name: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            procedure: procedure.into(),
            schema: None,
            params: Vec::new(),
            results: Vec::new(),
            return_value: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_param(
        mut self,
        field: impl Into<String>,
        column_type: ColumnType,
        direction: ParameterDirection,
    ) -> Self {
        self.params.push(CallableParam {
            field: field.into(),
            column_type,
            direction,
        });
        self
    }

    pub fn with_result(mut self, result: ResultDescriptor) -> Self {
        self.results.push(result);
        self
    }

    pub fn with_return(mut self, field: impl Into<String>, column_type: ColumnType) -> Self {
        self.return_value = Some((field.into(), column_type));
        self
    }

    pub fn result(&self, result_type: &str) -> Option<&ResultDescriptor> {
        self.results.iter().find(|r| r.result_type == result_type)
    }

    pub fn qualified_procedure(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.procedure),
            _ => self.procedure.clone(),
        }
    }

    /// Output parameters with their 1-based position in the call.
    pub fn outputs(&self) -> impl Iterator<Item = (usize, &CallableParam)> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction.is_output())
            .map(|(i, p)| (i + 1, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outputs_keep_call_positions() {
        let callable = CallableDescriptor::new("totals", "calc_totals")
            .with_schema("billing")
            .with_param("customerId", ColumnType::Long, ParameterDirection::In)
            .with_param("total", ColumnType::Decimal, ParameterDirection::Out)
            .with_param("count", ColumnType::Integer, ParameterDirection::InOut);

        let outputs: Vec<usize> = callable.outputs().map(|(i, _)| i).collect();
        assert_eq!(outputs, vec![2, 3]);
        assert_eq!(callable.qualified_procedure(), "billing.calc_totals");
    }

    #[test]
    fn test_result_lookup_by_type() {
        let callable = CallableDescriptor::new("list", "list_orders").with_result(
            ResultDescriptor::new("order", ResultAddressing::ByName)
                .with_field("id", "ID", ColumnType::Long),
        );
        assert!(callable.result("order").is_some());
        assert!(callable.result("invoice").is_none());
    }
}
