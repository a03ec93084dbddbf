//! [`Locator`]: a lazily resolved element selector bound to a page.

use pwire_runtime::Result;

use crate::{ClickOptions, Page};

/// Finds elements by selector each time an action runs.
///
/// Locators hold no driver-side state. They are also what locator handlers
/// receive, so a handler can act on the overlay it was registered for.
///
/// See <https://playwright.dev/docs/api/class-locator>
#[derive(Clone, Debug)]
pub struct Locator {
	page: Page,
	selector: String,
}

impl Locator {
	pub(crate) fn new(page: Page, selector: String) -> Self {
		Self { page, selector }
	}

	pub fn selector(&self) -> &str {
		&self.selector
	}

	pub fn page(&self) -> &Page {
		&self.page
	}

	/// Narrows to elements matching `selector` inside this locator's matches.
	pub fn locator(&self, selector: &str) -> Locator {
		Locator::new(self.page.clone(), format!("{} >> {}", self.selector, selector))
	}

	/// Clicks the single element this locator resolves to.
	///
	/// Fails if the selector matches more than one element.
	pub async fn click(&self, options: ClickOptions) -> Result<()> {
		self.page.main_frame()?.click(&self.selector, options).await
	}
}
