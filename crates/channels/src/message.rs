//! Wire model of the polling webhook: inbound messages and replies.

use serde::{Deserialize, Serialize};
use crate::WebhookError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgType {
    Text,
    Image,
    Mixed,
    /// A refresh poll for an earlier stream reply
    Stream,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Single,
    Group,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub userid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextContent {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedItem {
    pub msgtype: MsgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MixedContent {
    #[serde(default)]
    pub msg_item: Vec<MixedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRef {
    pub id: String,
}

/// A message pushed to the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub msgid: String,
    #[serde(default)]
    pub chattype: ChatType,
    /// Only present for group chats
    #[serde(default)]
    pub chatid: String,
    #[serde(default)]
    pub from: Sender,
    pub msgtype: Option<MsgType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mixed: Option<MixedContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamRef>,
}

impl InboundMessage {
    /// Parse and check the fields every message must carry.
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let msg: Self = serde_json::from_slice(body)
            .map_err(|e| WebhookError::InvalidMessage(format!("malformed JSON: {e}")))?;
        if msg.msgid.is_empty() {
            return Err(WebhookError::InvalidMessage("msgid is required".into()));
        }
        if msg.msgtype.is_none() {
            return Err(WebhookError::InvalidMessage("msgtype is required".into()));
        }
        if msg.from.userid.is_empty() {
            return Err(WebhookError::InvalidMessage("from.userid is required".into()));
        }
        Ok(msg)
    }

    pub fn kind(&self) -> MsgType {
        self.msgtype.unwrap_or(MsgType::Other)
    }

    /// Text of a `text` message, or the text items of a `mixed` one joined
    /// with a space. Empty for everything else.
    pub fn text_content(&self) -> String {
        match self.kind() {
            MsgType::Text => self
                .text
                .as_ref()
                .map(|t| t.content.clone())
                .unwrap_or_default(),
            MsgType::Mixed => self
                .mixed
                .iter()
                .flat_map(|m| &m.msg_item)
                .filter(|item| item.msgtype == MsgType::Text)
                .filter_map(|item| item.text.as_ref().map(|t| t.content.as_str()))
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        }
    }

    pub fn image_urls(&self) -> Vec<&str> {
        match self.kind() {
            MsgType::Image => self
                .image
                .iter()
                .map(|i| i.url.as_str())
                .filter(|u| !u.is_empty())
                .collect(),
            MsgType::Mixed => self
                .mixed
                .iter()
                .flat_map(|m| &m.msg_item)
                .filter(|item| item.msgtype == MsgType::Image)
                .filter_map(|item| item.image.as_ref().map(|i| i.url.as_str()))
                .filter(|u| !u.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `group_<chatid>` for group chats, `single_<userid>` otherwise.
    pub fn conversation_key(&self) -> String {
        match self.chattype {
            ChatType::Group => format!("group_{}", self.chatid),
            ChatType::Single => format!("single_{}", self.from.userid),
        }
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReply {
    pub id: String,
    pub finish: bool,
    pub content: String,
}

/// A synchronous reply to a webhook call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msgtype", rename_all = "lowercase")]
pub enum Reply {
    Text { text: TextReply },
    Stream { stream: StreamReply },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextReply {
    pub content: String,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            text: TextReply {
                content: content.into(),
            },
        }
    }

    pub fn stream(id: impl Into<String>, content: impl Into<String>, finish: bool) -> Self {
        Self::Stream {
            stream: StreamReply {
                id: id.into(),
                finish,
                content: content.into(),
            },
        }
    }
}
