//! Tab context injection
//!
//! One process may host several tabs (tests, simulations). A
//! [`TabContextGuard`] marks the current thread as acting for one tab so every
//! span opened in scope carries its identity; [`tab_span`] does the same for
//! futures that hop threads.

use std::cell::RefCell;

use tabsync_core::TabId;
use tracing::Span;
use uuid::Uuid;

/// Tab context stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabContextData {
    pub tab_id: String,
    /// Distinguishes reloads of the same tab
    pub instance_id: Uuid,
}

thread_local! {
    static TAB_CONTEXT: RefCell<Option<TabContextData>> = const { RefCell::new(None) };
}

/// RAII guard for tab context
///
/// Sets the tab context for the current thread and restores the previous one
/// on drop.
///
/// ```ignore
/// let _guard = TabContextGuard::new(&tab_id);
/// tracing::info!("Draining queue"); // spans here carry tab_id
/// ```
pub struct TabContextGuard {
    previous: Option<TabContextData>,
}

impl TabContextGuard {
    pub fn new(tab_id: &TabId) -> Self {
        Self::with_instance_id(tab_id, Uuid::new_v4())
    }

    /// Create a guard with a specific instance id
    pub fn with_instance_id(tab_id: &TabId, instance_id: Uuid) -> Self {
        let previous = TAB_CONTEXT.with(|ctx| ctx.borrow().clone());
        let next = TabContextData {
            tab_id: tab_id.short_id().to_string(),
            instance_id,
        };
        TAB_CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(next));
        Self { previous }
    }

    pub fn current() -> Option<TabContextData> {
        TAB_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_tab_id() -> Option<String> {
        Self::current().map(|ctx| ctx.tab_id)
    }
}

impl Drop for TabContextGuard {
    fn drop(&mut self) {
        TAB_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Root span for everything one tab does
///
/// Use with `tracing::Instrument` on a tab's long-running future.
pub fn tab_span(tab_id: &TabId) -> Span {
    tracing::info_span!("tab", tab_id = %tab_id.short_id())
}

/// Run a block with a tab context set
#[macro_export]
macro_rules! with_tab_context {
    ($tab_id:expr, $body:block) => {{
        let _guard = $crate::context::TabContextGuard::new($tab_id);
        $body
    }};
}
