//! Document interaction capability used to drive the portal login form

use async_trait::async_trait;

/// Reference to an element found by [`Document::query_selector`].
///
/// Handles stay valid until the next page load or click.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub selector: String,
}

impl ElementHandle {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
        }
    }
}

impl std::fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.selector)
    }
}

/// A loaded page that can be inspected and interacted with
#[async_trait]
pub trait Document: Send {
    /// Navigate to `url`, replacing the current page
    async fn load(&mut self, url: &str) -> anyhow::Result<()>;

    /// First element matching any of `selectors`, tried in order
    fn query_selector(&self, selectors: &[&str]) -> Option<ElementHandle>;

    fn set_value(&mut self, element: &ElementHandle, text: &str) -> anyhow::Result<()>;

    /// Notify the page that the element's value changed
    fn dispatch_input_event(&mut self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Activate the element; may navigate to a new page
    async fn click(&mut self, element: &ElementHandle) -> anyhow::Result<()>;

    /// Visible text of the current page
    fn read_text(&self) -> String;

    /// Named field of the page's state object, if the page publishes one
    fn state_field(&self, name: &str) -> Option<String>;
}

/// Opens fresh documents, one per login attempt
pub trait Browser: Send + Sync {
    fn open(&self) -> anyhow::Result<Box<dyn Document>>;
}
