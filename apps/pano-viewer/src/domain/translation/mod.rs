//! Bus-to-Client Translation
//!
//! Each relayed channel is bound to a [`Translator`]: a pure function that
//! turns a raw bus payload into the [`Envelope`] broadcast to clients.
//! Registrations live in a [`DispatchTable`] keyed by channel name.
//!
//! # Nested Payloads
//!
//! Some producers (the touchscreen) double-wrap one message type:
//!
//! ```json
//! {"type": "changepano", "data": {"fileurl": "...", "type": "image"}}
//! ```
//!
//! For that type the translator descends into `data` before wrapping. All
//! other payloads are wrapped exactly as received.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::envelope::{ChannelName, DATA_FIELD, Envelope, Payload, TYPE_FIELD};

// =============================================================================
// Errors
// =============================================================================

/// A payload that could not be translated. Local and recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationError {
    /// A payload declaring the nested type had no `data` field.
    #[error("payload of type '{message_type}' on channel '{channel}' has no 'data' field")]
    MissingData {
        /// Channel the payload arrived on.
        channel: ChannelName,
        /// The declared message type.
        message_type: String,
    },
}

// =============================================================================
// Translators
// =============================================================================

/// Translation function bound to a channel.
pub type Translator =
    Arc<dyn Fn(&str, Payload) -> Result<Envelope, TranslationError> + Send + Sync>;

/// Wrap a payload, unwrapping one level of `data` when the payload declares
/// `nested_type`.
///
/// # Errors
///
/// Returns [`TranslationError::MissingData`] when the payload declares
/// `nested_type` but carries no `data` field.
pub fn translate(
    channel: &str,
    payload: Payload,
    nested_type: &str,
) -> Result<Envelope, TranslationError> {
    match payload {
        Value::Object(mut fields)
            if fields.get(TYPE_FIELD).and_then(Value::as_str) == Some(nested_type) =>
        {
            fields.remove(DATA_FIELD).map_or_else(
                || {
                    Err(TranslationError::MissingData {
                        channel: channel.to_string(),
                        message_type: nested_type.to_string(),
                    })
                },
                |inner| Ok(Envelope::new(channel, inner)),
            )
        }
        other => Ok(Envelope::new(channel, other)),
    }
}

/// Translator that applies [`translate`] for the given nested type.
#[must_use]
pub fn unwrapping(nested_type: impl Into<String>) -> Translator {
    let nested_type = nested_type.into();
    Arc::new(move |channel, payload| translate(channel, payload, &nested_type))
}

/// Translator that never unwraps.
#[must_use]
pub fn passthrough() -> Translator {
    Arc::new(|channel, payload| Ok(Envelope::new(channel, payload)))
}

// =============================================================================
// Dispatch Table
// =============================================================================

/// Mapping from relayed channel name to its translator.
#[derive(Default, Clone)]
pub struct DispatchTable {
    translators: HashMap<ChannelName, Translator>,
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a translator to a channel.
    ///
    /// Returns `true` if an earlier registration was replaced.
    pub fn register(&mut self, channel: impl Into<ChannelName>, translator: Translator) -> bool {
        self.translators
            .insert(channel.into(), translator)
            .is_some()
    }

    /// Whether the channel is registered.
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.translators.contains_key(channel)
    }

    /// Translate a payload for a channel.
    ///
    /// Returns `None` when the channel is not registered.
    #[must_use]
    pub fn dispatch(
        &self,
        channel: &str,
        payload: Payload,
    ) -> Option<Result<Envelope, TranslationError>> {
        self.translators
            .get(channel)
            .map(|translator| translator(channel, payload))
    }

    /// Registered channel names, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelName> {
        let mut channels: Vec<_> = self.translators.keys().cloned().collect();
        channels.sort();
        channels
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.translators.len()
    }

    /// Whether no channels are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("channels", &self.channels())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
