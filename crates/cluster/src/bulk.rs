//! Bulk request assembly and bulk response inspection.

use esbridge_core::{Doc, Operation, VersionFamily};
use serde_json::{json, Value};

/// Append one action to a newline-delimited bulk body.
///
/// `create` maps to an `index` action so re-running a sync overwrites rather
/// than conflicts. Update bodies differ by family: `{"doc": source}` on
/// typeless clusters, `{<type>: source}` on typed ones.
pub fn append_bulk_line(family: VersionFamily, index: &str, doc: &Doc, buf: &mut String) {
    let (action, body) = match doc.op {
        Operation::Create => ("index", Some(doc.source.clone())),
        Operation::Update => {
            let key = if family.needs_type() { doc.type_or_default() } else { "doc" };
            ("update", Some(json!({ key: doc.source })))
        }
        Operation::Delete => ("delete", None),
    };

    let mut meta = json!({ "_index": index, "_id": doc.id });
    if family.needs_type() {
        meta["_type"] = Value::String(doc.type_or_default().to_string());
    }

    buf.push_str(&json!({ action: meta }).to_string());
    buf.push('\n');
    if let Some(body) = body {
        buf.push_str(&body.to_string());
        buf.push('\n');
    }
}

/// One failed item from a bulk response.
#[derive(Debug, Clone)]
pub struct BulkFailure {
    pub id: String,
    pub action: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of one bulk request. The HTTP status said 2xx; individual items
/// may still have failed.
#[derive(Debug, Clone, Default)]
pub struct BulkReport {
    pub items: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkReport {
    /// Parse the bulk response body. A response with `errors: false` is
    /// summarized without walking every item.
    pub fn from_response(body: &Value) -> Self {
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .map(|a| a.len())
            .unwrap_or(0);
        if !body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            return Self { items, failures: Vec::new() };
        }

        let mut failures = Vec::new();
        for item in body.get("items").and_then(Value::as_array).into_iter().flatten() {
            let Some((action, detail)) = item.as_object().and_then(|o| o.iter().next()) else {
                continue;
            };
            let status = detail.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
            if status < 300 {
                continue;
            }
            let reason = detail
                .get("error")
                .map(|e| {
                    e.get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                })
                .unwrap_or_else(|| format!("status {status}"));
            failures.push(BulkFailure {
                id: detail.get("_id").and_then(Value::as_str).unwrap_or_default().to_string(),
                action: action.clone(),
                status,
                reason,
            });
        }
        Self { items, failures }
    }
}
