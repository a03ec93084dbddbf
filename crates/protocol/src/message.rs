//! Framed records exchanged with the driver.
//!
//! Every frame is one of three shapes: a [`Request`] issued by the client, a
//! [`Response`] correlated to it by `id`, or an [`Event`] pushed by the driver
//! for a target `guid`. Lifecycle events (`__create__`, `__dispose__`,
//! `__adopt__`) are ordinary events whose method names are recognised by
//! [`Lifecycle::from_method`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to every outbound call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	#[serde(rename = "wallTime")]
	pub wall_time: i64,
	/// Public API name the call was issued for
	#[serde(rename = "apiName", skip_serializing_if = "Option::is_none")]
	pub api_name: Option<String>,
	/// Whether this is an internal call (not user-facing API)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub internal: Option<bool>,
	/// Source location where the API was called
	#[serde(skip_serializing_if = "Option::is_none")]
	pub location: Option<Location>,
}

/// Source code location for a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
	pub file: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub line: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub column: Option<u32>,
}

impl Metadata {
	/// Minimal metadata stamped with the current wall clock.
	pub fn now() -> Self {
		let wall_time = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.map(|elapsed| elapsed.as_millis() as i64)
			.unwrap_or_default();
		Self {
			wall_time,
			api_name: None,
			internal: Some(false),
			location: None,
		}
	}

	/// Marks the call as internal bookkeeping rather than a user-facing API.
	pub fn internal(mut self) -> Self {
		self.internal = Some(true);
		self
	}
}

/// Call frame sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, unique while the call is outstanding
	pub id: u32,
	/// Target object (`""` addresses the root)
	#[serde(serialize_with = "serialize_arc_str", deserialize_with = "deserialize_arc_str")]
	pub guid: Arc<str>,
	pub method: String,
	pub params: Value,
	pub metadata: Metadata,
}

pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s.as_str()))
}

/// Reply frame correlated to a [`Request`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

/// Wrapper the driver puts around error payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorWrapper {
	pub error: ErrorPayload,
}

/// Driver-reported failure: the `{name, message, stack}` triple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(default)]
	pub message: String,
	/// Error class on the driver side (`TimeoutError`, `TargetClosedError`, ...)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Push notification for a target object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	#[serde(serialize_with = "serialize_arc_str", deserialize_with = "deserialize_arc_str")]
	pub guid: Arc<str>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

/// Any inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Has an `id` field
	Response(Response),
	/// Has `guid` and `method` but no `id`
	Event(Event),
	/// Well-formed JSON of an unrecognised shape
	Unknown(Value),
}

/// Object lifecycle sentinels carried as event methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
	Create,
	Dispose,
	Adopt,
}

impl Lifecycle {
	pub fn from_method(method: &str) -> Option<Self> {
		match method {
			"__create__" => Some(Self::Create),
			"__dispose__" => Some(Self::Dispose),
			"__adopt__" => Some(Self::Adopt),
			_ => None,
		}
	}

	pub fn as_method(self) -> &'static str {
		match self {
			Self::Create => "__create__",
			Self::Dispose => "__dispose__",
			Self::Adopt => "__adopt__",
		}
	}
}

/// Params of `__create__`. The event's own guid names the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
	#[serde(rename = "type")]
	pub type_name: String,
	pub guid: String,
	#[serde(default)]
	pub initializer: Value,
}

/// Params of `__dispose__`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisposeParams {
	/// `"gc"` when the driver collected the object to bound its heap
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl DisposeParams {
	pub fn is_gc(&self) -> bool {
		self.reason.as_deref() == Some("gc")
	}
}

/// Params of `__adopt__`. The event's own guid names the new parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptParams {
	pub guid: String,
}

/// Extracts `value[key].guid`, the shape the driver uses for object references.
pub fn guid_ref<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
	value.get(key)?.get("guid")?.as_str()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn response_frames_deserialize_before_events() {
		let frame = json!({"id": 7, "result": {"value": 1}});
		match serde_json::from_value::<Message>(frame).unwrap() {
			Message::Response(response) => {
				assert_eq!(response.id, 7);
				assert_eq!(response.result, Some(json!({"value": 1})));
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn event_without_params_defaults_to_null() {
		let frame = json!({"guid": "page@1", "method": "close"});
		match serde_json::from_value::<Message>(frame).unwrap() {
			Message::Event(event) => {
				assert_eq!(&*event.guid, "page@1");
				assert!(event.params.is_null());
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn unknown_shapes_are_kept() {
		let frame = json!({"hello": "world"});
		assert!(matches!(serde_json::from_value::<Message>(frame).unwrap(), Message::Unknown(_)));
	}

	#[test]
	fn lifecycle_methods_round_trip() {
		for lifecycle in [Lifecycle::Create, Lifecycle::Dispose, Lifecycle::Adopt] {
			assert_eq!(Lifecycle::from_method(lifecycle.as_method()), Some(lifecycle));
		}
		assert_eq!(Lifecycle::from_method("close"), None);
	}

	#[test]
	fn request_serializes_camel_case_metadata() {
		let request = Request {
			id: 3,
			guid: Arc::from("page@abc"),
			method: "goto".into(),
			params: json!({"url": "https://example.com"}),
			metadata: Metadata::now(),
		};
		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(value["guid"], "page@abc");
		assert!(value["metadata"]["wallTime"].as_i64().unwrap() > 0);
		assert!(value["metadata"].get("apiName").is_none());
	}

	#[test]
	fn dispose_reason_gc() {
		let params: DisposeParams = serde_json::from_value(json!({"reason": "gc"})).unwrap();
		assert!(params.is_gc());
		let params: DisposeParams = serde_json::from_value(json!({})).unwrap();
		assert!(!params.is_gc());
	}

	#[test]
	fn guid_ref_reads_nested_reference() {
		let value = json!({"browser": {"guid": "browser@1"}});
		assert_eq!(guid_ref(&value, "browser"), Some("browser@1"));
		assert_eq!(guid_ref(&value, "page"), None);
	}
}
