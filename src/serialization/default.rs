//! `default` serialization module (current span layout)

use serde_json::{json, Map, Value};

use crate::error::{LayerStoreError, Result};
use crate::model::{Annotation, BaseSpan, Document, Layer, Span};

use super::{as_object, attribute_names, optional_str, required_str, SerializationModule};

/// Current layout: `{base_span, annotations: [{attr: value}]}` per span
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModule;

impl SerializationModule for DefaultModule {
    fn encode(&self, layer: &Layer) -> Result<Value> {
        Ok(encode_default(layer))
    }

    fn decode(&self, payload: &Value, _document: &Document) -> Result<Layer> {
        decode_default(payload, |_, value| Ok(value))
    }

    fn has_default_span_layout(&self) -> bool {
        true
    }
}

pub(crate) fn encode_default(layer: &Layer) -> Value {
    let spans: Vec<Value> = layer
        .spans()
        .iter()
        .map(|span| {
            let annotations: Vec<Value> = span
                .annotations
                .iter()
                .map(|a| Value::Object(a.to_map(&layer.attributes)))
                .collect();
            json!({
                "base_span": base_span_to_json(&span.base_span),
                "annotations": annotations,
            })
        })
        .collect();

    json!({
        "name": layer.name,
        "attributes": layer.attributes,
        "parent": layer.parent,
        "enveloping": layer.enveloping,
        "ambiguous": layer.ambiguous,
        "serialisation_module": layer.serialisation_module,
        "meta": Value::Object(layer.meta.clone()),
        "spans": spans,
    })
}

/// Decode the default layout; `convert` may rewrite each attribute value
pub(crate) fn decode_default<F>(payload: &Value, convert: F) -> Result<Layer>
where
    F: Fn(&str, Value) -> Result<Value>,
{
    let object = as_object(payload)?;
    let mut layer = layer_header(object)?;

    let spans = match object.get("spans") {
        Some(Value::Array(spans)) => spans.as_slice(),
        Some(Value::Null) | None => &[],
        Some(other) => {
            return Err(LayerStoreError::Serialization(format!(
                "spans is not a list: {}",
                other
            )))
        }
    };

    for span in spans {
        let span = as_object(span)?;
        let base_span = base_span_from_json(
            span.get("base_span")
                .ok_or_else(|| LayerStoreError::Serialization("span has no base_span".into()))?,
        )?;
        let mut annotations = Vec::new();
        if let Some(Value::Array(items)) = span.get("annotations") {
            for item in items {
                let item = as_object(item)?;
                let mut values = Vec::with_capacity(layer.attributes.len());
                for attribute in &layer.attributes {
                    let value = item.get(attribute).cloned().unwrap_or(Value::Null);
                    values.push(convert(attribute, value)?);
                }
                annotations.push(Annotation::from_values(&layer.attributes, values)?);
            }
        }
        layer.push_span_unchecked(Span {
            base_span,
            annotations,
        });
    }
    Ok(layer)
}

/// Name, schema and relations of a layer payload
pub(crate) fn layer_header(object: &Map<String, Value>) -> Result<Layer> {
    let mut layer = Layer::new(required_str(object, "name")?, attribute_names(object)?);
    layer.parent = optional_str(object, "parent");
    layer.enveloping = optional_str(object, "enveloping");
    layer.ambiguous = object.get("ambiguous").and_then(Value::as_bool).unwrap_or(false);
    layer.serialisation_module = optional_str(object, "serialisation_module");
    if let Some(Value::Object(meta)) = object.get("meta") {
        layer.meta = meta.clone();
    }
    Ok(layer)
}

pub(crate) fn base_span_to_json(base_span: &BaseSpan) -> Value {
    match base_span {
        BaseSpan::Plain { start, end } => json!([start, end]),
        BaseSpan::Enveloping(spans) => Value::Array(spans.iter().map(base_span_to_json).collect()),
    }
}

/// `[s, e]` is a plain span, a list of lists is an enveloping span
pub(crate) fn base_span_from_json(value: &Value) -> Result<BaseSpan> {
    let items = value
        .as_array()
        .ok_or_else(|| LayerStoreError::Serialization(format!("invalid base span: {}", value)))?;
    match items.as_slice() {
        [Value::Number(start), Value::Number(end)] => {
            let start = offset(start.as_u64(), value)?;
            let end = offset(end.as_u64(), value)?;
            Ok(BaseSpan::plain(start, end))
        }
        _ if !items.is_empty() && items.iter().all(Value::is_array) => Ok(BaseSpan::Enveloping(
            items.iter().map(base_span_from_json).collect::<Result<Vec<_>>>()?,
        )),
        _ => Err(LayerStoreError::Serialization(format!("invalid base span: {}", value))),
    }
}

fn offset(n: Option<u64>, value: &Value) -> Result<usize> {
    n.map(|n| n as usize)
        .ok_or_else(|| LayerStoreError::Serialization(format!("invalid span offset in {}", value)))
}
