//! Conversation threads and turns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The host CLI / end user.
    User,
    /// A model or tool answering.
    Assistant,
    /// Injected instructions.
    System,
}

/// One entry in a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Speaker.
    pub role: Role,
    /// Turn text.
    pub content: String,
    /// Tool that wrote the turn, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Model that produced an assistant turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    /// Absolute file paths referenced by the turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Unix timestamp (seconds).
    pub timestamp: f64,
}

impl Turn {
    /// A user turn stamped now.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// An assistant turn stamped now.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// A system turn stamped now.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            model_used: None,
            files: Vec::new(),
            timestamp: unix_now(),
        }
    }

    /// Tag the turn with the tool that wrote it.
    #[must_use]
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    /// Tag the turn with the model that produced it.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    /// Attach file references.
    #[must_use]
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}

/// A conversation thread: the unit of cross-tool continuity.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationThread {
    /// Opaque handle handed to the host as `continuation_id`.
    pub id: Uuid,
    /// Thread this one was forked from, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Tool that created the thread. Later turns may come from other tools.
    pub tool_name: String,
    /// Creation time, unix seconds.
    pub created_at: f64,
    /// Last append time, unix seconds; monotonically non-decreasing.
    pub last_touched_at: f64,
    /// Turns in append order.
    pub turns: Vec<Turn>,
    /// De-duplicated union of all file paths referenced by the turns.
    pub files: Vec<String>,
    /// Opaque workflow state persisted by multi-step tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_state: Option<serde_json::Value>,
}

impl ConversationThread {
    pub(crate) fn new(tool_name: &str, parent_id: Option<Uuid>) -> Self {
        let now = unix_now();
        Self {
            id: Uuid::new_v4(),
            parent_id,
            tool_name: tool_name.to_owned(),
            created_at: now,
            last_touched_at: now,
            turns: Vec::new(),
            files: Vec::new(),
            workflow_state: None,
        }
    }

    /// Merge the turn's files into the thread-level set, preserving first
    /// occurrence order. De-dup is exact string equality.
    pub(crate) fn absorb_files(&mut self, turn: &Turn) {
        for file in &turn.files {
            if !self.files.contains(file) {
                self.files.push(file.clone());
            }
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_touched_at = self.last_touched_at.max(unix_now());
    }
}

/// Error type for conversation memory operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ThreadError {
    /// No thread with this id.
    #[error("unknown conversation thread {0}")]
    Unknown(Uuid),
    /// The thread existed but aged out.
    #[error("conversation thread {0} has expired")]
    Expired(Uuid),
    /// The thread hit the turn cap.
    #[error("conversation thread {id} is full ({max} turns)")]
    Full {
        /// Thread id.
        id: Uuid,
        /// The configured turn cap.
        max: usize,
    },
}

impl ThreadError {
    /// Short tag used in structured error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unknown(_) => "thread_unknown",
            Self::Expired(_) => "thread_expired",
            Self::Full { .. } => "thread_full",
        }
    }
}

/// Current unix time as fractional seconds.
pub(crate) fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
