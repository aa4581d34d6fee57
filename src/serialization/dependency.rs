//! Dependency navigation rebuilt from `id`/`head` attributes
//!
//! ```text
//! id:    1  2  3 | 1  2
//! head:  2  0  2 | 0  1
//!        └──sentence 0──┘ └sentence 1┘
//! ```
//!
//! A new sentence starts whenever `id == 1`; `head == 0` marks the root.
//! Only the first annotation of each span is considered.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{LayerStoreError, Result};
use crate::model::{DependencyNode, DependencyTree, Layer};

pub fn build_dependency_tree(layer: &Layer) -> Result<DependencyTree> {
    let id_index = layer
        .attribute_index("id")
        .ok_or_else(|| LayerStoreError::InvalidArgument(format!("layer {:?} has no id attribute", layer.name)))?;
    let head_index = layer
        .attribute_index("head")
        .ok_or_else(|| LayerStoreError::InvalidArgument(format!("layer {:?} has no head attribute", layer.name)))?;

    let mut nodes: Vec<DependencyNode> = Vec::with_capacity(layer.len());
    let mut heads: Vec<Option<i64>> = Vec::with_capacity(layer.len());
    // sentence -> (id -> span index)
    let mut sentences: Vec<HashMap<i64, usize>> = Vec::new();

    for (index, span) in layer.spans().iter().enumerate() {
        let annotation = span.annotations.first();
        let id = annotation.and_then(|a| a.value(id_index)).and_then(as_int);
        let head = annotation.and_then(|a| a.value(head_index)).and_then(as_int);

        if id == Some(1) || sentences.is_empty() {
            sentences.push(HashMap::new());
        }
        let sentence = sentences.len() - 1;
        if let Some(id) = id {
            sentences[sentence].insert(id, index);
        }
        nodes.push(DependencyNode {
            parent: None,
            children: Vec::new(),
            sentence,
        });
        heads.push(head);
    }

    for index in 0..nodes.len() {
        let head = match heads[index] {
            Some(head) if head != 0 => head,
            _ => continue,
        };
        let sentence = nodes[index].sentence;
        if let Some(&parent) = sentences[sentence].get(&head) {
            nodes[index].parent = Some(parent);
            nodes[parent].children.push(index);
        }
    }

    Ok(DependencyTree { nodes })
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
