//! Viewer Activity
//!
//! Drives the [`ActivityState`] machine and performs the side effects of each
//! transition on the relay and the window. A rejected transition has no side
//! effects.

use std::sync::Arc;

use parking_lot::Mutex;

use super::relay::Relay;
use crate::application::ports::SharedWindow;
use crate::domain::envelope::ChannelName;
use crate::domain::lifecycle::{ActivityState, LifecycleError, LifecycleOp};

/// The panorama viewer activity.
pub struct Activity {
    state: Mutex<ActivityState>,
    relay: Arc<Relay>,
    window: SharedWindow,
    relay_channels: Vec<ChannelName>,
}

impl Activity {
    /// Create an activity in the `Created` state.
    ///
    /// `relay_channels` are registered on configure, in addition to the
    /// relay's view-sync channel.
    #[must_use]
    pub fn new(relay: Arc<Relay>, window: SharedWindow, relay_channels: Vec<ChannelName>) -> Self {
        Self {
            state: Mutex::new(ActivityState::Created),
            relay,
            window,
            relay_channels,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActivityState {
        *self.state.lock()
    }

    /// The relay driven by this activity.
    #[must_use]
    pub const fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Whether the window is currently shown.
    #[must_use]
    pub fn window_visible(&self) -> bool {
        self.window.is_visible()
    }

    /// Configuration refreshes applied to the window.
    #[must_use]
    pub fn window_updates(&self) -> u64 {
        self.window.update_count()
    }

    /// Register relayed channels and clear the last message.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless the activity is `Created`.
    pub fn configure(&self) -> Result<ActivityState, LifecycleError> {
        self.transition(LifecycleOp::Configure, || {
            let view_sync = self.relay.settings().view_sync_channel.clone();
            self.relay.register_channel(view_sync.clone());
            for channel in self.relay_channels.iter().filter(|c| **c != view_sync) {
                self.relay.register_channel(channel.clone());
            }
            self.relay.last_message().clear();
        })
    }

    /// Begin serving with the window hidden.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless the activity is `Configured`.
    pub fn start(&self) -> Result<ActivityState, LifecycleError> {
        self.transition(LifecycleOp::Start, || {
            self.relay.last_message().clear();
            // Realize the window once, then keep it hidden until activated.
            self.window.set_visible(true);
            self.window.set_visible(false);
        })
    }

    /// Show the window.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless the activity is `Running`.
    pub fn activate(&self) -> Result<ActivityState, LifecycleError> {
        self.transition(LifecycleOp::Activate, || self.window.set_visible(true))
    }

    /// Hide the window.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] unless the activity is `Activated`.
    pub fn deactivate(&self) -> Result<ActivityState, LifecycleError> {
        self.transition(LifecycleOp::Deactivate, || self.window.set_visible(false))
    }

    /// Shut down and hide the window.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] if already `Stopped`.
    pub fn stop(&self) -> Result<ActivityState, LifecycleError> {
        self.transition(LifecycleOp::Stop, || self.window.set_visible(false))
    }

    /// Re-apply window configuration after a configuration update.
    ///
    /// Returns `false` (and does nothing) once stopped.
    pub fn apply_configuration(&self) -> bool {
        let state = self.state.lock();
        if *state == ActivityState::Stopped {
            tracing::debug!("Ignoring configuration update after stop");
            return false;
        }
        self.window.update();
        tracing::debug!(state = %*state, "Window configuration applied");
        true
    }

    fn transition(
        &self,
        op: LifecycleOp,
        effects: impl FnOnce(),
    ) -> Result<ActivityState, LifecycleError> {
        let mut state = self.state.lock();
        let from = *state;
        let next = from.apply(op).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected lifecycle transition");
        })?;

        effects();
        *state = next;

        tracing::info!(op = %op, from = %from, to = %next, "Activity transition");
        Ok(next)
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("state", &self.state())
            .field("relay_channels", &self.relay_channels)
            .finish_non_exhaustive()
    }
}
