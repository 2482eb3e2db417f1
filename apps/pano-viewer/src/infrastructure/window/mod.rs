//! Tracked Window
//!
//! [`WindowPort`] adapter for a window owned by an external window manager.
//! It records the requested visibility and configuration refreshes so the
//! health endpoint can report them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::application::ports::WindowPort;

/// Window whose state is tracked locally.
#[derive(Debug)]
pub struct TrackedWindow {
    id: String,
    visible: AtomicBool,
    updates: AtomicU64,
}

impl TrackedWindow {
    /// Create a hidden window.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            visible: AtomicBool::new(false),
            updates: AtomicU64::new(0),
        }
    }

    /// Window identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl WindowPort for TrackedWindow {
    fn set_visible(&self, visible: bool) {
        let was = self.visible.swap(visible, Ordering::AcqRel);
        if was != visible {
            tracing::info!(window = %self.id, visible, "Window visibility changed");
        }
    }

    fn update(&self) {
        let count = self.updates.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(window = %self.id, count, "Window configuration refreshed");
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}
