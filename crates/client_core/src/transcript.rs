//! Conversation transcript and the rules stream events apply to it.

use chrono::{DateTime, Utc};
use shared::domain::{MessageId, Role};

use crate::{format::format_inline, parser::StreamEvent};

pub const THINKING_PLACEHOLDER: &str = "Thinking...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    /// Already rendered markup, shown without further processing.
    Markup(String),
}

impl Content {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) | Self::Markup(text) => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: Content,
    pub is_pending: bool,
    pub created_at: DateTime<Utc>,
}

/// One visible mutation, reported so a rendering surface can mirror it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptChange {
    Appended(Message),
    PendingReplaced(Message),
    PendingRemoved(MessageId),
    LogAppended(String),
    LogCleared,
}

/// Ordered message history plus the side log.
///
/// Messages are only ever appended, except for the single pending
/// placeholder which is either replaced in place or removed.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    pending: Option<MessageId>,
    log: Vec<String>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn pending(&self) -> Option<&Message> {
        let id = self.pending?;
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Appends the user's question followed by a pending assistant placeholder.
    pub fn submit_question(&mut self, question: &str) -> Vec<TranscriptChange> {
        let mut changes = self.remove_pending();
        changes.extend(self.append(Role::User, Content::Text(question.to_string())));
        changes.extend(self.begin_pending(THINKING_PLACEHOLDER));
        changes
    }

    /// Applies one stream event, in arrival order.
    pub fn apply(&mut self, event: StreamEvent) -> Vec<TranscriptChange> {
        match event {
            StreamEvent::LogEntry(markup) => {
                self.log.push(markup.clone());
                vec![TranscriptChange::LogAppended(markup)]
            }
            StreamEvent::Answer(text) => {
                let content = Content::Markup(format_inline(&text));
                if self.has_pending() {
                    self.resolve_pending(Role::Assistant, content)
                } else {
                    self.append(Role::Assistant, content)
                }
            }
            StreamEvent::Error(text) => self.push_error(&format!("System error: {text}")),
            StreamEvent::Finished => self.remove_pending(),
        }
    }

    /// Drops the pending placeholder and appends a formatted error message.
    pub fn push_error(&mut self, text: &str) -> Vec<TranscriptChange> {
        let mut changes = self.remove_pending();
        changes.extend(self.append(Role::Error, Content::Markup(format_inline(text))));
        changes
    }

    /// Appends a committed message.
    pub fn append(&mut self, role: Role, content: Content) -> Vec<TranscriptChange> {
        let message = self.new_message(role, content, false);
        self.messages.push(message.clone());
        vec![TranscriptChange::Appended(message)]
    }

    /// Appends a pending assistant placeholder, replacing any earlier one.
    pub fn begin_pending(&mut self, placeholder: &str) -> Vec<TranscriptChange> {
        let mut changes = self.remove_pending();
        let message = self.new_message(
            Role::Assistant,
            Content::Text(placeholder.to_string()),
            true,
        );
        self.pending = Some(message.id);
        self.messages.push(message.clone());
        changes.push(TranscriptChange::Appended(message));
        changes
    }

    /// Resolves the pending placeholder in place. Without one, nothing changes.
    pub fn resolve_pending(&mut self, role: Role, content: Content) -> Vec<TranscriptChange> {
        let Some(index) = self.pending_index() else {
            return Vec::new();
        };
        self.pending = None;
        let slot = &mut self.messages[index];
        slot.role = role;
        slot.content = content;
        slot.is_pending = false;
        vec![TranscriptChange::PendingReplaced(slot.clone())]
    }

    pub fn remove_pending(&mut self) -> Vec<TranscriptChange> {
        let Some(index) = self.pending_index() else {
            self.pending = None;
            return Vec::new();
        };
        self.pending = None;
        let removed = self.messages.remove(index);
        vec![TranscriptChange::PendingRemoved(removed.id)]
    }

    pub fn clear_log(&mut self) -> Vec<TranscriptChange> {
        self.log.clear();
        vec![TranscriptChange::LogCleared]
    }

    fn pending_index(&self) -> Option<usize> {
        let id = self.pending?;
        self.messages.iter().position(|message| message.id == id)
    }

    fn new_message(&mut self, role: Role, content: Content, is_pending: bool) -> Message {
        self.next_id += 1;
        Message {
            id: MessageId(self.next_id),
            role,
            content,
            is_pending,
            created_at: Utc::now(),
        }
    }
}
