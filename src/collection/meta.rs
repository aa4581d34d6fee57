//! Metadata column types

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{LayerStoreError, Result};
use crate::query::SqlParam;

/// Type of a metadata column on a collection or layer table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaType {
    Int,
    BigInt,
    Float,
    Str,
    Datetime,
}

impl MetaType {
    /// Column type used in DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            MetaType::Int => "integer",
            MetaType::BigInt => "bigint",
            MetaType::Float => "double precision",
            MetaType::Str => "text",
            MetaType::Datetime => "timestamp",
        }
    }

    /// Map an `information_schema.columns.data_type` value
    pub fn from_information_schema(data_type: &str) -> Option<Self> {
        match data_type {
            "integer" | "smallint" => Some(MetaType::Int),
            "bigint" => Some(MetaType::BigInt),
            "double precision" | "real" | "numeric" => Some(MetaType::Float),
            "text" | "character varying" | "character" => Some(MetaType::Str),
            "timestamp without time zone" | "timestamp with time zone" | "date" => Some(MetaType::Datetime),
            _ => None,
        }
    }

    /// Convert a JSON value into a bind parameter for this column
    pub fn to_param(&self, column: &str, value: &Value) -> Result<SqlParam> {
        let mismatch = || {
            LayerStoreError::InvalidArgument(format!(
                "value {} does not fit meta column {:?} of type {}",
                value, column, self
            ))
        };
        match (self, value) {
            (_, Value::Null) => Ok(SqlParam::Null),
            (MetaType::Int | MetaType::BigInt, Value::Number(n)) => n.as_i64().map(SqlParam::Int).ok_or_else(mismatch),
            (MetaType::Float, Value::Number(n)) => n.as_f64().map(SqlParam::Float).ok_or_else(mismatch),
            (MetaType::Str, Value::String(s)) => Ok(SqlParam::Text(s.clone())),
            (MetaType::Datetime, Value::String(s)) => Ok(SqlParam::Timestamp(s.clone())),
            _ => Err(mismatch()),
        }
    }
}

impl FromStr for MetaType {
    type Err = LayerStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(MetaType::Int),
            "bigint" => Ok(MetaType::BigInt),
            "float" => Ok(MetaType::Float),
            "str" => Ok(MetaType::Str),
            "datetime" => Ok(MetaType::Datetime),
            other => Err(LayerStoreError::InvalidArgument(format!(
                "unknown meta type {:?} (expected int, bigint, float, str or datetime)",
                other
            ))),
        }
    }
}

impl fmt::Display for MetaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetaType::Int => "int",
            MetaType::BigInt => "bigint",
            MetaType::Float => "float",
            MetaType::Str => "str",
            MetaType::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// Ordered metadata column definitions
pub type MetaColumns = Vec<(String, MetaType)>;
