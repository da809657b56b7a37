use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Ids are UUIDv7 so they sort by creation time.
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaEntry {
    #[serde(default, alias = "_id")]
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub frequency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl QaEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            answer: answer.into(),
            category: String::new(),
            created_at: Some(now),
            updated_at: Some(now),
            frequency: 0,
            user_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn for_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.user_id = Some(tenant_id.into());
        self
    }
}

/// Body of `GET /qa/user/{tenantId}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantQaResponse {
    #[serde(default)]
    pub qas: Vec<QaEntry>,
}

/// Body of `POST /qa/unanswered`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnansweredReport {
    pub user_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub messages: Vec<ChatMessage>,
    pub is_typing: bool,
    pub is_chat_open: bool,
    pub user_id: Option<String>,
}

impl SessionState {
    pub fn initial(greeting: &str) -> Self {
        Self {
            messages: vec![ChatMessage::bot(greeting)],
            is_typing: false,
            is_chat_open: false,
            user_id: None,
        }
    }
}

/// Notification sent to store subscribers after a transition is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum SessionEvent {
    #[serde(rename = "message:new")]
    MessageAppended(ChatMessage),
    #[serde(rename = "typing")]
    TypingChanged { active: bool },
    #[serde(rename = "chat:open")]
    ChatOpenChanged { open: bool },
    #[serde(rename = "session:reset")]
    SessionReset { messages: Vec<ChatMessage> },
    #[serde(rename = "session:tenant")]
    TenantChanged {
        #[serde(rename = "tenantId")]
        tenant_id: Option<String>,
    },
}
