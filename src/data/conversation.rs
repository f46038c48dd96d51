use chrono::{DateTime, Local};

use super::{Diagnostic, FileProposal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single entry of the conversation
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub timestamp: DateTime<Local>,
    pub role: Role,
    pub text: String,
    pub proposals: Vec<FileProposal>,
    /// Parser findings shown alongside the reply
    pub diagnostics: Vec<Diagnostic>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            role: Role::User,
            text: text.into(),
            proposals: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        proposals: Vec<FileProposal>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            role: Role::Assistant,
            text: text.into(),
            proposals,
            diagnostics,
        }
    }
}

/// Append-only list of turns. Nothing is edited or removed once pushed.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) -> &ConversationTurn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Proposals that may still be applied: only those of the most recent turn, and only
    /// when that turn came from the assistant.
    pub fn pending_proposals(&self) -> &[FileProposal] {
        match self.turns.last() {
            Some(turn) if turn.role == Role::Assistant => &turn.proposals,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn proposal(name: &str) -> FileProposal {
        FileProposal::located(
            name.to_string(),
            PathBuf::from("/project").join(name),
            "java".to_string(),
            "class A {}".to_string(),
        )
    }

    #[test]
    fn only_latest_assistant_turn_is_pending() {
        let mut history = ConversationHistory::new();
        history.push(ConversationTurn::user("make A"));
        history.push(ConversationTurn::assistant("here", vec![proposal("A.java")], vec![]));
        assert_eq!(history.pending_proposals().len(), 1);

        history.push(ConversationTurn::user("now B"));
        assert!(history.pending_proposals().is_empty());

        history.push(ConversationTurn::assistant("no files", vec![], vec![]));
        assert!(history.pending_proposals().is_empty());
        assert_eq!(history.len(), 4);
        assert_eq!(history.turns()[1].proposals[0].declared_path(), "A.java");
    }
}
