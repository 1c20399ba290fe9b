use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message. Serializes as the `{role, content}` pair the
/// completion API expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub role: Role,
    pub content: String,
}

impl MessageEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Arrival-ordered message log for a single conversation.
///
/// Storage is unbounded. Anything sent upstream goes through [`recent`],
/// which caps the window to the newest entries.
///
/// [`recent`]: MessageHistory::recent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHistory {
    entries: Vec<MessageEntry>,
}

impl MessageHistory {
    pub fn append(&mut self, entry: MessageEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns the last `n` entries in arrival order, or all of them when
    /// fewer than `n` exist.
    pub fn recent(&self, n: usize) -> Vec<MessageEntry> {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..].to_vec()
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
