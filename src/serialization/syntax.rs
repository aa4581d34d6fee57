//! `syntax_v0` serialization module
//!
//! Same span layout as `default`; the `id` and `head` attributes of
//! dependency layers are stored as integers and coerced back on decode
//! (older writers stored them as strings).

use serde_json::Value;

use crate::error::{LayerStoreError, Result};
use crate::model::{Document, Layer};

use super::default::{decode_default, encode_default};
use super::SerializationModule;

#[derive(Debug, Default, Clone, Copy)]
pub struct SyntaxModule;

impl SerializationModule for SyntaxModule {
    fn encode(&self, layer: &Layer) -> Result<Value> {
        Ok(encode_default(layer))
    }

    fn decode(&self, payload: &Value, _document: &Document) -> Result<Layer> {
        decode_default(payload, |attribute, value| match attribute {
            "id" | "head" => coerce_integer(attribute, value),
            _ => Ok(value),
        })
    }

    fn has_default_span_layout(&self) -> bool {
        true
    }
}

fn coerce_integer(attribute: &str, value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| LayerStoreError::Serialization(format!("{} value {:?} is not an integer", attribute, s))),
        other => Err(LayerStoreError::Serialization(format!(
            "{} value {} is not an integer",
            attribute, other
        ))),
    }
}
