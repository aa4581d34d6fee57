//! Parameterized SQL fragments
//!
//! Fragments are written with `$?` placeholders and carry their bind
//! parameters alongside. Placeholders are numbered `$1..$n` only when the
//! final statement is rendered, so fragments can be nested and combined in
//! any order.
//!
//! ```text
//! Sql { text: "c.\"id\" % $?::bigint = $?::bigint", params: [Int(4), Int(1)] }
//!                    │ render
//!                    ▼
//! "c.\"id\" % $1::bigint = $2::bigint"
//! ```
//!
//! Every parameter placeholder carries an explicit cast, so the server never
//! has to guess a parameter type.

use std::error::Error;

use bytes::BytesMut;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};

const PLACEHOLDER: &str = "$?";

// =============================================================================
// Parameters
// =============================================================================

/// A bind parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Serialized JSON, sent as text and cast to jsonb
    Json(String),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
    /// Timestamp literal, sent as text and cast to timestamp
    Timestamp(String),
    Null,
}

impl SqlParam {
    /// Cast appended to the placeholder
    pub fn cast(&self) -> &'static str {
        match self {
            SqlParam::Text(_) => "::text",
            SqlParam::Int(_) => "::bigint",
            SqlParam::Float(_) => "::float8",
            SqlParam::Bool(_) => "::boolean",
            SqlParam::Json(_) => "::text::jsonb",
            SqlParam::IntArray(_) => "::bigint[]",
            SqlParam::TextArray(_) => "::text[]",
            SqlParam::Timestamp(_) => "::text::timestamp",
            SqlParam::Null => "",
        }
    }

    /// Rough length of the value once sent, used for buffer budgeting
    pub fn estimated_len(&self) -> usize {
        match self {
            SqlParam::Text(s) | SqlParam::Json(s) | SqlParam::Timestamp(s) => s.len() + 2,
            SqlParam::Int(_) => 20,
            SqlParam::Float(_) => 24,
            SqlParam::Bool(_) => 5,
            SqlParam::IntArray(v) => 2 + v.len() * 21,
            SqlParam::TextArray(v) => 2 + v.iter().map(|s| s.len() + 3).sum::<usize>(),
            SqlParam::Null => 4,
        }
    }
}

impl ToSql for SqlParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            SqlParam::Text(v) | SqlParam::Json(v) | SqlParam::Timestamp(v) => v.to_sql(ty, out),
            SqlParam::Int(v) => v.to_sql(ty, out),
            SqlParam::Float(v) => v.to_sql(ty, out),
            SqlParam::Bool(v) => v.to_sql(ty, out),
            SqlParam::IntArray(v) => v.to_sql(ty, out),
            SqlParam::TextArray(v) => v.to_sql(ty, out),
            SqlParam::Null => Ok(IsNull::Yes),
        }
    }

    // placeholders are always cast, so the inferred type matches the variant
    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

// =============================================================================
// Fragments
// =============================================================================

/// SQL text with `$?` placeholders and the matching parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sql {
    text: String,
    params: Vec<SqlParam>,
}

impl Sql {
    /// Fragment without parameters (trusted text only)
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    /// A single cast placeholder
    pub fn param(param: SqlParam) -> Self {
        let mut sql = Sql::default();
        sql.push_param(param);
        sql
    }

    pub fn push_str(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    /// Append a placeholder; `Null` is written as a literal
    pub fn push_param(&mut self, param: SqlParam) -> &mut Self {
        if param == SqlParam::Null {
            self.text.push_str("NULL");
            return self;
        }
        self.text.push_str(PLACEHOLDER);
        self.text.push_str(param.cast());
        self.params.push(param);
        self
    }

    pub fn push_sql(&mut self, other: &Sql) -> &mut Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params.iter().cloned());
        self
    }

    /// Join fragments with a separator
    pub fn join<I>(parts: I, separator: &str) -> Sql
    where
        I: IntoIterator<Item = Sql>,
    {
        let mut joined = Sql::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                joined.text.push_str(separator);
            }
            joined.text.push_str(&part.text);
            joined.params.extend(part.params);
        }
        joined
    }

    /// Surround with a prefix and a suffix
    pub fn wrap(self, prefix: &str, suffix: &str) -> Sql {
        let mut wrapped = Sql::raw(prefix);
        wrapped.text.push_str(&self.text);
        wrapped.text.push_str(suffix);
        wrapped.params = self.params;
        wrapped
    }

    /// Text with unnumbered `$?` placeholders
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Final statement text with numbered placeholders
    pub fn render(&self) -> String {
        let mut rendered = String::with_capacity(self.text.len() + self.params.len() * 2);
        let mut rest = self.text.as_str();
        let mut n = 0;
        while let Some(position) = rest.find(PLACEHOLDER) {
            n += 1;
            rendered.push_str(&rest[..position]);
            rendered.push('$');
            rendered.push_str(&n.to_string());
            rest = &rest[position + PLACEHOLDER.len()..];
        }
        rendered.push_str(rest);
        rendered
    }

    /// Parameters in the form the driver expects
    pub fn bind_params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
    }

    /// Rough length of the statement once sent
    pub fn estimated_len(&self) -> usize {
        self.text.len() + self.params.iter().map(SqlParam::estimated_len).sum::<usize>()
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Quote a string literal (trusted DDL text only, such as table comments)
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape `%`, `_` and `\` for use inside a LIKE pattern
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
