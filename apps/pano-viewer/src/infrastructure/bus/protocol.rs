//! Rosbridge Protocol
//!
//! The subset of the rosbridge v2 JSON protocol the relay speaks. Every
//! frame is a JSON object tagged by `op`:
//!
//! ```json
//! {"op": "subscribe", "topic": "/viewsync"}
//! {"op": "advertise", "topic": "/changepano", "type": "std_msgs/String"}
//! {"op": "publish", "topic": "/viewsync", "msg": {"heading": 90.0}}
//! ```
//!
//! Ops the relay does not handle (`status`, `service_response`, ...) decode
//! to [`RosbridgeOp::Other`] and are ignored.

use serde::{Deserialize, Serialize};

use crate::domain::envelope::{ChannelName, Payload};

/// Errors decoding or encoding a rosbridge frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a valid rosbridge JSON object.
    #[error("invalid rosbridge frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// One rosbridge operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosbridgeOp {
    /// Start receiving a topic.
    Subscribe {
        /// Fully qualified topic name.
        topic: String,
        /// Message type, when the bridge needs one.
        #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
        msg_type: Option<String>,
    },
    /// Declare intent to publish on a topic.
    Advertise {
        /// Fully qualified topic name.
        topic: String,
        /// Message type of the topic.
        #[serde(rename = "type")]
        msg_type: String,
    },
    /// A message on a topic, in either direction.
    Publish {
        /// Fully qualified topic name.
        topic: String,
        /// Message body.
        msg: Payload,
    },
    /// Any op the relay ignores.
    #[serde(other)]
    Other,
}

/// Maps channel names to topics and encodes frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCodec {
    prefix: String,
}

impl TopicCodec {
    /// Create a codec that prefixes every channel with `prefix`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Topic prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic for a channel.
    #[must_use]
    pub fn topic(&self, channel: &str) -> String {
        format!("{}{channel}", self.prefix)
    }

    /// Channel for a topic, if it carries the prefix.
    #[must_use]
    pub fn channel<'a>(&self, topic: &'a str) -> Option<&'a str> {
        topic
            .strip_prefix(self.prefix.as_str())
            .filter(|channel| !channel.is_empty())
    }

    /// Subscribe op for a channel.
    #[must_use]
    pub fn subscribe(&self, channel: &str) -> RosbridgeOp {
        RosbridgeOp::Subscribe {
            topic: self.topic(channel),
            msg_type: None,
        }
    }

    /// Advertise op for a channel.
    #[must_use]
    pub fn advertise(&self, channel: &str, msg_type: &str) -> RosbridgeOp {
        RosbridgeOp::Advertise {
            topic: self.topic(channel),
            msg_type: msg_type.to_string(),
        }
    }

    /// Publish op for a channel.
    #[must_use]
    pub fn publish(&self, channel: &str, payload: Payload) -> RosbridgeOp {
        RosbridgeOp::Publish {
            topic: self.topic(channel),
            msg: payload,
        }
    }

    /// Encode an op as frame text.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn encode(&self, op: &RosbridgeOp) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(op)?)
    }

    /// Decode frame text.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or a frame without a known shape.
    pub fn decode(&self, text: &str) -> Result<RosbridgeOp, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode an inbound frame into a channel message, if it is one.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed frames.
    pub fn decode_message(&self, text: &str) -> Result<Option<(ChannelName, Payload)>, ProtocolError> {
        match self.decode(text)? {
            RosbridgeOp::Publish { topic, msg } => Ok(self
                .channel(&topic)
                .map(|channel| (channel.to_string(), msg))),
            _ => Ok(None),
        }
    }
}

impl Default for TopicCodec {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    fn encoded(op: &RosbridgeOp) -> Value {
        serde_json::from_str(&TopicCodec::default().encode(op).unwrap()).unwrap()
    }

    #[test]
    fn subscribe_is_prefixed() {
        let codec = TopicCodec::default();
        assert_eq!(
            encoded(&codec.subscribe("viewsync")),
            json!({"op": "subscribe", "topic": "/viewsync"})
        );
    }

    #[test]
    fn advertise_carries_type() {
        let codec = TopicCodec::new("/pano/");
        assert_eq!(
            encoded(&codec.advertise("changepano", "std_msgs/String")),
            json!({"op": "advertise", "topic": "/pano/changepano", "type": "std_msgs/String"})
        );
    }

    #[test]
    fn publish_wraps_payload_in_msg() {
        let codec = TopicCodec::default();
        assert_eq!(
            encoded(&codec.publish("changepano", json!({"fileurl": "a.jpg"}))),
            json!({"op": "publish", "topic": "/changepano", "msg": {"fileurl": "a.jpg"}})
        );
    }

    #[test]
    fn inbound_publish_yields_channel_message() {
        let codec = TopicCodec::default();
        let message = codec
            .decode_message(r#"{"op":"publish","topic":"/viewsync","msg":{"heading":3}}"#)
            .unwrap();
        assert_eq!(message, Some(("viewsync".to_string(), json!({"heading": 3}))));
    }

    #[test]
    fn foreign_topics_are_skipped() {
        let codec = TopicCodec::new("/pano/");
        let message = codec
            .decode_message(r#"{"op":"publish","topic":"/other/viewsync","msg":{}}"#)
            .unwrap();
        assert_eq!(message, None);
        assert_eq!(codec.channel("/pano/"), None);
    }

    #[test]
    fn unknown_ops_decode_to_other() {
        let codec = TopicCodec::default();
        assert_eq!(
            codec
                .decode(r#"{"op":"status","level":"error","msg":"nope"}"#)
                .unwrap(),
            RosbridgeOp::Other
        );
        assert_eq!(
            codec.decode_message(r#"{"op":"status","msg":"x"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        let codec = TopicCodec::default();
        assert!(codec.decode("not json").is_err());
        assert!(codec.decode(r#"{"topic":"/viewsync"}"#).is_err());
        assert!(codec.decode(r#"{"op":"publish","topic":"/viewsync"}"#).is_err());
    }
}
