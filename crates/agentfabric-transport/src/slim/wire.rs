//! SLIM wire format: length-delimited JSON frames over TCP.
//!
//! Every frame after the handshake carries a [`SessionHeader`]; the
//! session id is the correlation key for request/reply, broadcasts, and
//! streams, so no in-payload id generator is needed.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};
use uuid::Uuid;

use agentfabric_core::Topic;

/// How the node should treat frames of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    FireForget,
    RequestReply,
    Streaming,
    Group,
}

/// Per-frame session metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionHeader {
    pub id: Uuid,
    pub kind: SessionKind,
    pub sender: Topic,
    /// True when this frame answers an earlier frame of the same session.
    #[serde(default)]
    pub reply: bool,
}

impl SessionHeader {
    pub fn new(id: Uuid, kind: SessionKind, sender: Topic) -> Self {
        Self {
            id,
            kind,
            sender,
            reply: false,
        }
    }

    pub fn reply_to(id: Uuid, kind: SessionKind, sender: Topic) -> Self {
        Self {
            id,
            kind,
            sender,
            reply: true,
        }
    }
}

/// Frames exchanged with a SLIM node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum WireFrame {
    /// First client frame: identity plus its shared-secret digest.
    Hello { identity: Topic, auth: String },
    HelloAck {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    /// Announce intent to publish to a topic; must precede the first
    /// publish on it.
    Route { topic: Topic },
    Publish {
        header: SessionHeader,
        topic: Topic,
        #[serde(with = "b64")]
        payload: Vec<u8>,
    },
    /// Moderator-initiated group-chat invite, relayed by the node to each
    /// participant's connection.
    Invite {
        channel: Topic,
        moderator: Topic,
        session: Uuid,
        participants: Vec<Topic>,
    },
    SessionClose { session: Uuid },
    Bye,
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

/// Length-delimited JSON codec for [`WireFrame`].
pub struct WireCodec {
    inner: LengthDelimitedCodec,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(16 * 1024 * 1024)
                .new_codec(),
        }
    }
}

impl Decoder for WireCodec {
    type Item = WireFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(raw) => {
                let frame = serde_json::from_slice(&raw).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
                })?;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}

impl Encoder<WireFrame> for WireCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let raw = serde_json::to_vec(&frame)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.inner.encode(Bytes::from(raw), dst)
    }
}
