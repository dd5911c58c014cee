//! A2A domain types: agent cards, messages, and transport tags.
//!
//! The agent card is the interchange unit of the whole factory layer: a
//! server publishes one, a client inspects it to negotiate a transport.
//! JSON uses camelCase field names, matching the card's interchange form.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::error::{FabricError, Result};
use crate::topic::Topic;

/// Transport variants an agent card may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportTag {
    #[serde(rename = "slimrpc")]
    SlimRpc,
    #[serde(rename = "slimpatterns")]
    SlimPatterns,
    #[serde(rename = "natspatterns")]
    NatsPatterns,
    #[serde(rename = "jsonrpc")]
    JsonRpc,
}

impl TransportTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportTag::SlimRpc => "slimrpc",
            TransportTag::SlimPatterns => "slimpatterns",
            TransportTag::NatsPatterns => "natspatterns",
            TransportTag::JsonRpc => "jsonrpc",
        }
    }

    /// URL schemes a transport tag is allowed to pair with.
    fn accepts_scheme(&self, scheme: &str) -> bool {
        match self {
            TransportTag::SlimRpc | TransportTag::SlimPatterns => {
                scheme == "slim" || scheme == "http" || scheme == "https"
            }
            TransportTag::NatsPatterns => scheme == "nats",
            TransportTag::JsonRpc => scheme == "http" || scheme == "https",
        }
    }
}

impl std::fmt::Display for TransportTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags declared by an agent card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
}

/// A skill entry on an agent card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl AgentSkill {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Immutable descriptor of a server-side agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    /// `slim://org/ns/name`, `nats://org/ns/name`, or `http(s)://…`. For
    /// non-HTTP schemes the authority + path encode the topic.
    pub url: String,
    pub preferred_transport: TransportTag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_transports: Vec<TransportTag>,
    #[serde(default)]
    pub default_input_modes: Vec<String>,
    #[serde(default)]
    pub default_output_modes: Vec<String>,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

impl AgentCard {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        url: impl Into<String>,
        preferred_transport: TransportTag,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            version: version.into(),
            url: url.into(),
            preferred_transport,
            additional_transports: Vec::new(),
            default_input_modes: vec!["text".to_string()],
            default_output_modes: vec!["text".to_string()],
            skills: Vec::new(),
            capabilities: AgentCapabilities::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn with_additional_transport(mut self, tag: TransportTag) -> Self {
        self.additional_transports.push(tag);
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.capabilities.streaming = streaming;
        self
    }

    /// Transports the card advertises, preferred first, deduplicated.
    pub fn supported_transports(&self) -> Vec<TransportTag> {
        let mut tags = vec![self.preferred_transport];
        for tag in &self.additional_transports {
            if !tags.contains(tag) {
                tags.push(*tag);
            }
        }
        tags
    }

    /// Check that the preferred transport is consistent with the URL
    /// scheme.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.url)
            .map_err(|e| FabricError::protocol(format!("agent card url '{}': {e}", self.url)))?;
        if !self.preferred_transport.accepts_scheme(url.scheme()) {
            return Err(FabricError::protocol(format!(
                "preferred transport '{}' is inconsistent with url scheme '{}'",
                self.preferred_transport,
                url.scheme()
            )));
        }
        Ok(())
    }

    /// Topic encoded in a `slim://` or `nats://` URL authority + path.
    pub fn url_topic(&self) -> Result<Topic> {
        let url = Url::parse(&self.url)
            .map_err(|e| FabricError::protocol(format!("agent card url '{}': {e}", self.url)))?;
        match url.scheme() {
            "slim" | "nats" => {
                let org = url
                    .host_str()
                    .ok_or_else(|| FabricError::protocol("card url has no authority"))?;
                let mut segments = url.path().trim_matches('/').split('/');
                match (segments.next(), segments.next(), segments.next()) {
                    (Some(ns), Some(name), None) if !ns.is_empty() && !name.is_empty() => {
                        Topic::new(org, ns, name)
                    }
                    _ => Err(FabricError::protocol(format!(
                        "card url '{}' does not encode org/namespace/name",
                        self.url
                    ))),
                }
            }
            other => Err(FabricError::protocol(format!(
                "card url scheme '{other}' does not encode a topic"
            ))),
        }
    }

    /// Deterministic topic for this card: the URL topic when present,
    /// otherwise the mangled display name under `default/default`.
    pub fn topic(&self) -> Result<Topic> {
        match self.url_topic() {
            Ok(topic) => Ok(topic),
            Err(_) => Topic::from_display_name("default", "default", &self.name),
        }
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

/// One part of a message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    Text { text: String },
    Data { data: Value },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

/// An A2A message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            parts: vec![Part::text(text)],
            message_id: Uuid::new_v4().to_string(),
            task_id: None,
            context_id: None,
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Params of `message/send` and `message/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message: Message,
}

/// One item of a streamed reply, keyed by task id. `last` marks the end
/// of the stream; a terminal marker may carry no message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamItem {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default)]
    pub last: bool,
}

/// Params of `groupchat/init`, sent by the moderator to each participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupChatInitParams {
    pub channel: Topic,
    pub participants: Vec<Topic>,
    pub end_message: String,
    pub timeout_secs: u64,
}
