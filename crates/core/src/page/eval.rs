//! JavaScript evaluation methods for [`Page`].

use pwire_runtime::Result;
use serde_json::Value;

use super::Page;

impl Page {
	/// Evaluates JavaScript in the main frame and returns the result as JSON.
	///
	/// `arg` is serialized the way the driver expects and passed to the
	/// expression when it is a function.
	///
	/// See <https://playwright.dev/docs/api/class-page#page-evaluate>
	pub async fn evaluate(&self, expression: &str, arg: Option<Value>) -> Result<Value> {
		self.main_frame()?.evaluate(expression, arg).await
	}

	/// Evaluates JavaScript and deserializes the result to type `T`.
	///
	/// # Errors
	///
	/// Returns an error if the expression throws or the result cannot be
	/// deserialized to `T`.
	pub async fn evaluate_typed<T: serde::de::DeserializeOwned>(&self, expression: &str, arg: Option<Value>) -> Result<T> {
		self.main_frame()?.evaluate_typed(expression, arg).await
	}
}
