//! Order-insensitive deep equality over decoded JSON values.
//!
//! Source servers reorder object keys and reshape number formats between
//! versions, so equality must be computed over the value tree, never over a
//! serialized form.

use serde_json::Value;

/// Deep equality: object key order irrelevant, array order significant,
/// numbers equal when they denote the same value regardless of int/float
/// representation, strings/bools/null strict.
pub fn same_json(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(ao), Value::Object(bo)) => {
            ao.len() == bo.len()
                && ao.iter().all(|(k, av)| bo.get(k).is_some_and(|bv| same_json(av, bv)))
        }
        (Value::Array(aa), Value::Array(ba)) => {
            aa.len() == ba.len() && aa.iter().zip(ba.iter()).all(|(av, bv)| same_json(av, bv))
        }
        (Value::Number(an), Value::Number(bn)) => {
            if let (Some(ai), Some(bi)) = (an.as_i64(), bn.as_i64()) {
                return ai == bi;
            }
            if let (Some(au), Some(bu)) = (an.as_u64(), bn.as_u64()) {
                return au == bu;
            }
            // Mixed int/float: 1 and 1.0 denote the same document value.
            match (an.as_f64(), bn.as_f64()) {
                (Some(af), Some(bf)) => af == bf,
                _ => false,
            }
        }
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => false,
    }
}
