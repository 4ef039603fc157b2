use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::structs::merge::MergeStrategy;

pub type NodeId = Uuid;

/// One immutable turn of the conversation, stored in the tree's node map.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    /// Ordered children; more than one child marks a branch point.
    #[serde(default)]
    pub child_ids: Vec<NodeId>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl ConversationNode {
    pub(crate) fn new(parent_id: Option<NodeId>, message: NewMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id,
            child_ids: Vec::new(),
            role: message.role,
            content: message.content,
            attachments: message.attachments,
            created_at: Utc::now(),
            metadata: message.metadata,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// True when one node was produced by editing or regenerating the other,
    /// or both are revisions of the same original.
    pub fn is_revision_of(&self, other: &ConversationNode) -> bool {
        let ours = self.metadata.edited_from;
        let theirs = other.metadata.edited_from;
        ours == Some(other.id) || theirs == Some(self.id) || (ours.is_some() && ours == theirs)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Only used for the synthetic root of a tree created without a greeting.
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Reference to an attachment owned by an external attachment service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl AttachmentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            mime_type: None,
            size_bytes: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// Advisory metadata. None of these fields take part in tree invariants.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct NodeMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub regenerated: bool,
    /// Node this one replaced through an edit or regeneration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_from: Option<NodeId>,
    /// Node this one was copied from by a merge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_strategy: Option<MergeStrategy>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Content handed to the tree by the chat layer.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub attachments: Vec<AttachmentRef>,
    pub metadata: NodeMetadata,
}

impl NewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            metadata: NodeMetadata::default(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.metadata.model = Some(model.into());
        self
    }
}
