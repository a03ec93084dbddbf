//! Maps driver type tags to typed proxy constructors.
//!
//! The tag set is closed: every tag without a typed proxy becomes a
//! [`GenericObject`], which still takes part in lifecycle handling and raw calls.

use std::sync::Arc;

use pwire_protocol::guid_ref;
use pwire_runtime::{ChannelOwner, ChannelOwnerImpl, Error, ObjectFactory, ParentOrConnection, Result};
use serde_json::Value;

use crate::{
	BindingCall, Browser, BrowserContext, BrowserType, CdpSession, Dialog, Frame, GenericObject, JsHandle, Page, Playwright, Request,
	Response, Route, WebSocket, WebSocketRoute, Worker,
};

/// Driver type tags with a typed proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
	Playwright,
	BrowserType,
	Browser,
	BrowserContext,
	Page,
	Frame,
	Worker,
	Request,
	Response,
	Route,
	WebSocket,
	WebSocketRoute,
	CdpSession,
	JsHandle,
	ElementHandle,
	Dialog,
	BindingCall,
	/// Any other tag.
	Generic,
}

impl ObjectType {
	pub fn from_tag(tag: &str) -> Self {
		match tag {
			"Playwright" => Self::Playwright,
			"BrowserType" => Self::BrowserType,
			"Browser" => Self::Browser,
			"BrowserContext" => Self::BrowserContext,
			"Page" => Self::Page,
			"Frame" => Self::Frame,
			"Worker" => Self::Worker,
			"Request" => Self::Request,
			"Response" => Self::Response,
			"Route" => Self::Route,
			"WebSocket" => Self::WebSocket,
			"WebSocketRoute" => Self::WebSocketRoute,
			"CDPSession" => Self::CdpSession,
			"JSHandle" => Self::JsHandle,
			"ElementHandle" => Self::ElementHandle,
			"Dialog" => Self::Dialog,
			"BindingCall" => Self::BindingCall,
			_ => Self::Generic,
		}
	}
}

/// The [`ObjectFactory`] installed on every connection opened by this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TypedObjectFactory;

impl ObjectFactory for TypedObjectFactory {
	fn create_object(&self, parent: ParentOrConnection, type_name: String, guid: Arc<str>, initializer: Value) -> Result<Arc<dyn ChannelOwner>> {
		let kind = ObjectType::from_tag(&type_name);
		if kind == ObjectType::Generic {
			return Ok(Arc::new(GenericObject::new(parent, type_name, guid, initializer)));
		}

		let parent = match parent {
			ParentOrConnection::Parent(parent) => parent,
			ParentOrConnection::Connection(_) => {
				return Err(Error::ProtocolError(format!("{type_name} must be created under a parent object")));
			}
		};

		let object: Arc<dyn ChannelOwner> = match kind {
			ObjectType::Playwright => Arc::new(Playwright::new(parent, type_name, guid, initializer)?),
			ObjectType::BrowserType => Arc::new(BrowserType::new(parent, type_name, guid, initializer)?),
			ObjectType::Browser => Arc::new(Browser::new(parent, type_name, guid, initializer)),
			ObjectType::BrowserContext => Arc::new(BrowserContext::new(parent, type_name, guid, initializer)),
			ObjectType::Page => Arc::new(Page::new(parent, type_name, guid, initializer)?),
			ObjectType::Frame => Arc::new(Frame::new(parent, type_name, guid, initializer)),
			ObjectType::Worker => Arc::new(Worker::new(parent, type_name, guid, initializer)),
			ObjectType::Request => Arc::new(Request::new(parent, type_name, guid, initializer)?),
			ObjectType::Response => Arc::new(Response::new(parent, type_name, guid, initializer)?),
			ObjectType::Route => Arc::new(Route::new(parent, type_name, guid, initializer)?),
			ObjectType::WebSocket => Arc::new(WebSocket::new(parent, type_name, guid, initializer)),
			ObjectType::WebSocketRoute => Arc::new(WebSocketRoute::new(parent, type_name, guid, initializer)),
			ObjectType::CdpSession => Arc::new(CdpSession::new(parent, type_name, guid, initializer)),
			ObjectType::JsHandle | ObjectType::ElementHandle => Arc::new(JsHandle::new(parent, type_name, guid, initializer)),
			ObjectType::Dialog => Arc::new(Dialog::new(parent, type_name, guid, initializer)),
			ObjectType::BindingCall => Arc::new(BindingCall::new(parent, type_name, guid, initializer)),
			ObjectType::Generic => unreachable!("handled above"),
		};
		Ok(object)
	}
}

/// Resolves the object a reply names as `{key: {guid}}`.
///
/// Waits briefly in case the reply overtook the object's `__create__`.
pub(crate) async fn reply_object<T: ChannelOwner + Clone>(base: &ChannelOwnerImpl, reply: &Value, key: &str, expected: &'static str) -> Result<T> {
	let guid = guid_ref(reply, key).ok_or_else(|| Error::ProtocolError(format!("Reply is missing {key}.guid")))?;
	let connection = base.connection();
	let object = connection.wait_for_object(guid, connection.config().default_timeout).await?;
	object.downcast_ref::<T>().cloned().ok_or_else(|| Error::ObjectNotFound {
		guid: guid.to_string(),
		expected: Some(expected),
	})
}

/// Like [`reply_object`] for optional references.
pub(crate) async fn optional_reply_object<T: ChannelOwner + Clone>(
	base: &ChannelOwnerImpl,
	reply: &Value,
	key: &str,
	expected: &'static str,
) -> Result<Option<T>> {
	match guid_ref(reply, key) {
		Some(_) => reply_object(base, reply, key, expected).await.map(Some),
		None => Ok(None),
	}
}

/// Looks up the registered object an event names as `{key: {guid}}`.
pub(crate) fn event_owner(base: &ChannelOwnerImpl, params: &Value, key: &str) -> Option<Arc<dyn ChannelOwner>> {
	base.connection().try_get_object(guid_ref(params, key)?)
}

/// Typed form of [`event_owner`].
pub(crate) fn event_object<T: ChannelOwner + Clone>(base: &ChannelOwnerImpl, params: &Value, key: &str) -> Option<T> {
	event_owner(base, params, key)?.downcast_ref::<T>().cloned()
}

/// The registered trait object behind `base`, for attaching to event payloads.
pub(crate) fn registered(base: &ChannelOwnerImpl) -> Option<Arc<dyn ChannelOwner>> {
	base.connection().try_get_object(base.guid())
}
