//! `legacy_v0` serialization module
//!
//! Layout used by collections whose structure predates per-layer tags:
//! a span is a flat `{start, end, attr: value, ..}` dict, an ambiguous span
//! is a list of such dicts (one per annotation). Enveloping spans carry
//! either `_base_` (nested offsets) or `_index_` (positions in the enveloped
//! layer of the owning document).
//!
//! The payload does not carry the tag, so a decoded layer always has
//! `serialisation_module == Some("legacy_v0")`. A layer encoded here with no
//! tag (collections of structure 0.0 and 1.0 force this module) does not
//! compare equal to its decoded copy.

use serde_json::{json, Map, Value};

use crate::error::{LayerStoreError, Result};
use crate::model::{Annotation, BaseSpan, Document, Layer, Span};

use super::default::{base_span_from_json, base_span_to_json, layer_header};
use super::{as_object, SerializationModule};

const START: &str = "start";
const END: &str = "end";
const BASE: &str = "_base_";
const INDEX: &str = "_index_";

#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyModule;

impl SerializationModule for LegacyModule {
    fn encode(&self, layer: &Layer) -> Result<Value> {
        let spans = layer
            .spans()
            .iter()
            .map(|span| encode_span(layer, span))
            .collect::<Result<Vec<_>>>()?;

        Ok(json!({
            "name": layer.name,
            "attributes": layer.attributes,
            "parent": layer.parent,
            "enveloping": layer.enveloping,
            "ambiguous": layer.ambiguous,
            "meta": Value::Object(layer.meta.clone()),
            "spans": spans,
        }))
    }

    fn decode(&self, payload: &Value, document: &Document) -> Result<Layer> {
        let object = as_object(payload)?;
        let mut layer = layer_header(object)?;
        // the tag is not part of the legacy payload
        layer.serialisation_module = Some(super::LEGACY_TAG.to_string());

        let enveloped = match &layer.enveloping {
            Some(name) => document.layer(name),
            None => None,
        };

        let spans = object.get("spans").and_then(Value::as_array).cloned().unwrap_or_default();
        for span in &spans {
            let records: Vec<&Map<String, Value>> = match span {
                Value::Array(items) => items.iter().map(as_object).collect::<Result<_>>()?,
                Value::Object(record) => vec![record],
                other => {
                    return Err(LayerStoreError::Serialization(format!(
                        "invalid legacy span: {}",
                        other
                    )))
                }
            };
            let first = records
                .first()
                .ok_or_else(|| LayerStoreError::Serialization("empty ambiguous span".into()))?;
            let base_span = decode_base_span(first, enveloped)?;

            let annotations = records
                .iter()
                .map(|record| {
                    let values = layer
                        .attributes
                        .iter()
                        .map(|a| record.get(a).cloned().unwrap_or(Value::Null))
                        .collect();
                    Annotation::from_values(&layer.attributes, values)
                })
                .collect::<Result<Vec<_>>>()?;

            layer.push_span_unchecked(Span {
                base_span,
                annotations,
            });
        }
        Ok(layer)
    }
}

fn encode_span(layer: &Layer, span: &Span) -> Result<Value> {
    let records: Vec<Value> = span
        .annotations
        .iter()
        .map(|annotation| {
            let mut record = Map::new();
            match &span.base_span {
                BaseSpan::Plain { start, end } => {
                    record.insert(START.into(), json!(start));
                    record.insert(END.into(), json!(end));
                }
                enveloping @ BaseSpan::Enveloping(_) => {
                    record.insert(BASE.into(), base_span_to_json(enveloping));
                }
            }
            for (attribute, value) in layer.attributes.iter().zip(annotation.values()) {
                record.insert(attribute.clone(), value.clone());
            }
            Value::Object(record)
        })
        .collect();

    if layer.ambiguous {
        return Ok(Value::Array(records));
    }
    match <[Value; 1]>::try_from(records) {
        Ok([record]) => Ok(record),
        Err(records) => Err(LayerStoreError::Serialization(format!(
            "non-ambiguous layer {:?} has a span with {} annotations",
            layer.name,
            records.len()
        ))),
    }
}

fn decode_base_span(record: &Map<String, Value>, enveloped: Option<&Layer>) -> Result<BaseSpan> {
    if let Some(base) = record.get(BASE) {
        return base_span_from_json(base);
    }
    if let Some(Value::Array(indexes)) = record.get(INDEX) {
        let enveloped = enveloped.ok_or_else(|| {
            LayerStoreError::Serialization("`_index_` span without an enveloped layer in the document".into())
        })?;
        let spans = indexes
            .iter()
            .map(|i| {
                i.as_u64()
                    .and_then(|i| enveloped.spans().get(i as usize))
                    .map(|s| s.base_span.clone())
                    .ok_or_else(|| {
                        LayerStoreError::Serialization(format!(
                            "span index {} out of range in layer {:?}",
                            i, enveloped.name
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(BaseSpan::Enveloping(spans));
    }
    match (
        record.get(START).and_then(Value::as_u64),
        record.get(END).and_then(Value::as_u64),
    ) {
        (Some(start), Some(end)) => Ok(BaseSpan::plain(start as usize, end as usize)),
        _ => Err(LayerStoreError::Serialization(format!(
            "legacy span has no position: {:?}",
            record
        ))),
    }
}
