//! JSON-Schema rewriting for cross-backend tool portability.
//!
//! Two transforms over plain `serde_json::Value` schema trees. [`filter_constraints`]
//! strips the validation keywords that strict backends reject, folding each removed
//! constraint into the node's `description` so the model still sees the guidance.
//! [`inject_strict`] rewrites a schema into the fully-strict form the responses
//! protocol requires: `additionalProperties: false` and an exhaustive `required`
//! list at every object level.
//!
//! Both transforms recurse through the same points: `properties.*`, `items` (single
//! schema or positional list), `$defs.*`, and the branches of `anyOf` / `oneOf` /
//! `allOf`. Every other key is left untouched, so constraint-shaped values nested
//! under `default` or `examples` survive unchanged. Both are idempotent.

use serde_json::{Map, Value};

/// Constraint keywords removed unconditionally, in the order their description
/// clauses are appended.
const STRIP_KEYS: &[&str] = &[
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "maxItems",
];

/// Strip unsupported constraint keywords from a schema tree, preserving their
/// intent as prose in each node's `description`.
///
/// `minItems` is special-cased: values of exactly 0 or 1 encode non-empty
/// semantics the strict backends still accept, so those stay; anything larger is
/// stripped like the rest.
pub fn filter_constraints(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    let mut clauses = Vec::new();
    for key in STRIP_KEYS {
        if let Some(value) = obj.remove(*key) {
            clauses.push(constraint_clause(key, &value));
        }
    }
    let keep_min_items = obj
        .get("minItems")
        .is_some_and(|v| matches!(v.as_u64(), Some(0) | Some(1)));
    if !keep_min_items {
        if let Some(value) = obj.remove("minItems") {
            clauses.push(constraint_clause("minItems", &value));
        }
    }
    if !clauses.is_empty() {
        append_description(obj, &clauses);
    }

    walk_children(obj, filter_constraints);
}

/// Rewrite a schema into strict mode: every object node gets
/// `additionalProperties: false` and a `required` list naming all declared
/// properties, overriding whatever was there before.
pub fn inject_strict(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    let is_object = obj.get("type").and_then(Value::as_str) == Some("object")
        || obj.contains_key("properties");
    if is_object {
        let names: Vec<Value> = obj
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().map(Value::String).collect())
            .unwrap_or_default();
        obj.insert("additionalProperties".to_string(), Value::Bool(false));
        obj.insert("required".to_string(), Value::Array(names));
    }

    walk_children(obj, inject_strict);
}

/// Recurse into the schema positions that hold sub-schemas, and nothing else.
fn walk_children(obj: &mut Map<String, Value>, visit: fn(&mut Value)) {
    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        for (_name, sub) in props.iter_mut() {
            visit(sub);
        }
    }
    match obj.get_mut("items") {
        Some(Value::Array(items)) => {
            for item in items {
                visit(item);
            }
        }
        Some(item) => visit(item),
        None => {}
    }
    if let Some(defs) = obj.get_mut("$defs").and_then(Value::as_object_mut) {
        for (_name, sub) in defs.iter_mut() {
            visit(sub);
        }
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(branches) = obj.get_mut(key).and_then(Value::as_array_mut) {
            for branch in branches {
                visit(branch);
            }
        }
    }
}

fn constraint_clause(key: &str, value: &Value) -> String {
    match key {
        "minimum" => format!("Minimum value: {value}"),
        "maximum" => format!("Maximum value: {value}"),
        "exclusiveMinimum" => format!("Exclusive minimum value: {value}"),
        "exclusiveMaximum" => format!("Exclusive maximum value: {value}"),
        "multipleOf" => format!("Must be a multiple of {value}"),
        "minLength" => format!("Minimum length: {value}"),
        "maxLength" => format!("Maximum length: {value}"),
        "minItems" => format!("Minimum items: {value}"),
        "maxItems" => format!("Maximum items: {value}"),
        _ => format!("{key}: {value}"),
    }
}

fn append_description(obj: &mut Map<String, Value>, clauses: &[String]) {
    let note = clauses.join(". ");
    let existing = obj
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    let merged = if existing.is_empty() {
        note
    } else if existing.ends_with('.') {
        format!("{existing} {note}")
    } else {
        format!("{existing}. {note}")
    };
    obj.insert("description".to_string(), Value::String(merged));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
