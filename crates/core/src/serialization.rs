//! Conversion between JSON and the driver's tagged value encoding.
//!
//! | JavaScript value | Encoding |
//! |------------------|----------|
//! | string | `{"s": "value"}` |
//! | number | `{"n": 1.5}` |
//! | boolean | `{"b": true}` |
//! | null / undefined / NaN / ±Infinity / -0 | `{"v": "null"}` ... |
//! | array | `{"a": [...], "id": n}` |
//! | object | `{"o": [{"k": "key", "v": ...}], "id": n}` |
//! | Date / URL / BigInt | `{"d": ...}` / `{"u": ...}` / `{"bi": ...}` |
//! | back-reference | `{"ref": n}` |
//! | handle | `{"h": index}` |

use std::collections::HashMap;

use pwire_runtime::{Error, Result};
use serde_json::{Map, Value, json};

const MAX_DEPTH: usize = 100;

/// Encodes `arg` as the `arg` param of `evaluateExpression`.
///
/// `None` is sent as `undefined`. `handles` lists guids referenced by `{"h": i}`.
pub fn serialize_argument(arg: Option<&Value>, handles: &[&str]) -> Result<Value> {
	let value = match arg {
		Some(value) => serialize_value(value, 0)?,
		None => json!({ "v": "undefined" }),
	};
	let handles: Vec<Value> = handles.iter().map(|guid| json!({ "guid": guid })).collect();
	Ok(json!({ "value": value, "handles": handles }))
}

fn serialize_value(value: &Value, depth: usize) -> Result<Value> {
	if depth > MAX_DEPTH {
		return Err(Error::InvalidArgument("Maximum argument depth exceeded".to_string()));
	}
	Ok(match value {
		Value::Null => json!({ "v": "null" }),
		Value::Bool(b) => json!({ "b": b }),
		Value::Number(n) => json!({ "n": n }),
		Value::String(s) => json!({ "s": s }),
		Value::Array(items) => {
			let items = items.iter().map(|item| serialize_value(item, depth + 1)).collect::<Result<Vec<_>>>()?;
			json!({ "a": items })
		}
		Value::Object(map) => {
			let mut entries = Vec::with_capacity(map.len());
			for (key, item) in map {
				entries.push(json!({ "k": key, "v": serialize_value(item, depth + 1)? }));
			}
			json!({ "o": entries })
		}
	})
}

/// Decodes an evaluation result into plain JSON.
///
/// Values with no JSON counterpart degrade: NaN and infinities become `null`,
/// dates, URLs and bigints become strings, errors become `{name, message, stack}`.
///
/// # Errors
///
/// Returns [`Error::ProtocolError`] for handle references and unknown tags.
pub fn parse_value(value: &Value) -> Result<Value> {
	parse_inner(value, &mut HashMap::new())
}

fn parse_inner(value: &Value, refs: &mut HashMap<u64, Value>) -> Result<Value> {
	let Value::Object(map) = value else {
		return Ok(value.clone());
	};

	if let Some(n) = map.get("n") {
		return Ok(n.clone());
	}
	if let Some(s) = map.get("s") {
		return Ok(s.clone());
	}
	if let Some(b) = map.get("b") {
		return Ok(b.clone());
	}
	if let Some(v) = map.get("v").and_then(Value::as_str) {
		return Ok(match v {
			"-0" => json!(0),
			_ => Value::Null,
		});
	}
	for tag in ["d", "u", "bi"] {
		if let Some(s) = map.get(tag) {
			return Ok(s.clone());
		}
	}
	if let Some(id) = map.get("ref").and_then(Value::as_u64) {
		return Ok(refs.get(&id).cloned().unwrap_or(Value::Null));
	}
	let id = map.get("id").and_then(Value::as_u64);
	if let Some(items) = map.get("a").and_then(Value::as_array) {
		let parsed = Value::Array(items.iter().map(|item| parse_inner(item, refs)).collect::<Result<_>>()?);
		if let Some(id) = id {
			refs.insert(id, parsed.clone());
		}
		return Ok(parsed);
	}
	if let Some(entries) = map.get("o").and_then(Value::as_array) {
		let mut out = Map::new();
		for entry in entries {
			if let (Some(key), Some(item)) = (entry.get("k").and_then(Value::as_str), entry.get("v")) {
				out.insert(key.to_string(), parse_inner(item, refs)?);
			}
		}
		let parsed = Value::Object(out);
		if let Some(id) = id {
			refs.insert(id, parsed.clone());
		}
		return Ok(parsed);
	}
	if let Some(error) = map.get("e") {
		return Ok(json!({
			"name": error.get("n").cloned().unwrap_or(Value::Null),
			"message": error.get("m").cloned().unwrap_or(Value::Null),
			"stack": error.get("s").cloned().unwrap_or(Value::Null),
		}));
	}
	if map.contains_key("h") {
		return Err(Error::ProtocolError("Cannot convert a handle reference to JSON".to_string()));
	}
	Err(Error::ProtocolError(format!("Unexpected serialized value: {value}")))
}
