use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::Intent;
use crate::core::error::{RelioError, Result};
use crate::core::profile::ReplyStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
}

impl std::str::FromStr for Feedback {
    type Err = RelioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "like" | "up" | "+" => Ok(Feedback::Like),
            "dislike" | "down" | "-" => Ok(Feedback::Dislike),
            _ => Err(RelioError::InvalidInput(format!("Unknown feedback: {}", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub strategy: ReplyStrategy,
    #[serde(default)]
    pub feedback: Option<Feedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub contact_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Intent,
    pub sentiment: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    #[serde(default)]
    pub chosen: Option<usize>,
    /// Intimacy when the round started; feedback is scored against it.
    pub base_intimacy: i32,
}

impl ConversationTurn {
    pub fn new(contact_id: &str, message: &str, intent: Intent, sentiment: f64, base_intimacy: i32) -> Self {
        ConversationTurn {
            id: Uuid::new_v4().to_string(),
            contact_id: contact_id.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            intent,
            sentiment,
            keywords: Vec::new(),
            suggestions: Vec::new(),
            chosen: None,
            base_intimacy,
        }
    }

    pub fn has_feedback(&self, feedback: Feedback) -> bool {
        self.suggestions.iter().any(|s| s.feedback == Some(feedback))
    }

    /// The reply that continues the conversation: the chosen suggestion, else the primary.
    pub fn reply(&self) -> Option<&Suggestion> {
        self.chosen
            .and_then(|i| self.suggestions.get(i))
            .or_else(|| self.suggestions.first())
    }
}

/// Append-only turns, grouped by contact.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: HashMap<String, Vec<ConversationTurn>>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: HashMap<String, Vec<ConversationTurn>>) -> Self {
        ConversationHistory { turns }
    }

    pub fn append(&mut self, turn: ConversationTurn) -> Result<()> {
        if turn.contact_id.is_empty() {
            return Err(RelioError::InvalidInput("turn has no contact".to_string()));
        }
        self.turns.entry(turn.contact_id.clone()).or_default().push(turn);
        Ok(())
    }

    pub fn turns(&self, contact_id: &str) -> &[ConversationTurn] {
        self.turns.get(contact_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of a contact's turn by id or unambiguous id prefix.
    pub fn position(&self, contact_id: &str, turn_id: &str) -> Result<usize> {
        let turn_id = turn_id.trim();
        if turn_id.is_empty() {
            return Err(RelioError::InvalidInput("turn id must not be empty".to_string()));
        }
        let turns = self.turns(contact_id);
        if let Some(index) = turns.iter().position(|t| t.id == turn_id) {
            return Ok(index);
        }

        let matches: Vec<usize> = turns
            .iter()
            .enumerate()
            .filter(|(_, t)| t.id.starts_with(turn_id))
            .map(|(i, _)| i)
            .collect();
        match matches[..] {
            [index] => Ok(index),
            [] => Err(RelioError::TurnNotFound(turn_id.to_string())),
            _ => Err(RelioError::InvalidInput(format!(
                "'{}' matches {} turns, use a longer id",
                turn_id,
                matches.len()
            ))),
        }
    }

    pub fn find_mut(&mut self, contact_id: &str, turn_id: &str) -> Result<&mut ConversationTurn> {
        let index = self.position(contact_id, turn_id)?;
        self.turns
            .get_mut(contact_id)
            .and_then(|turns| turns.get_mut(index))
            .ok_or_else(|| RelioError::TurnNotFound(turn_id.to_string()))
    }

    /// The last `max_messages` chat messages: the contact's messages as `user`
    /// and the reply that was used as `assistant`.
    pub fn window(&self, contact_id: &str, max_messages: usize) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        for turn in self.turns(contact_id) {
            messages.push(ChatMessage::user(turn.message.clone()));
            if let Some(reply) = turn.reply() {
                messages.push(ChatMessage::assistant(reply.text.clone()));
            }
        }

        let skip = messages.len().saturating_sub(max_messages);
        messages.split_off(skip)
    }

    pub fn remove_contact(&mut self, contact_id: &str) -> usize {
        self.turns.remove(contact_id).map(|t| t.len()).unwrap_or(0)
    }

    pub fn as_map(&self) -> &HashMap<String, Vec<ConversationTurn>> {
        &self.turns
    }

    pub fn total_turns(&self) -> usize {
        self.turns.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(contact: &str, message: &str, reply: &str) -> ConversationTurn {
        let mut turn = ConversationTurn::new(contact, message, Intent::General, 0.0, 25);
        turn.suggestions.push(Suggestion {
            text: reply.to_string(),
            strategy: ReplyStrategy::Casual,
            feedback: None,
        });
        turn
    }

    #[test]
    fn test_window_keeps_latest_messages() {
        let mut history = ConversationHistory::new();
        history.append(turn("c1", "m1", "r1")).unwrap();
        history.append(turn("c1", "m2", "r2")).unwrap();
        history.append(turn("c2", "other", "x")).unwrap();

        let window = history.window("c1", 3);
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["r1", "m2", "r2"]);
        assert_eq!(window[1].role, Role::User);
    }

    #[test]
    fn test_reply_prefers_chosen() {
        let mut t = turn("c1", "hi", "primary");
        t.suggestions.push(Suggestion {
            text: "alt".to_string(),
            strategy: ReplyStrategy::Warm,
            feedback: None,
        });
        assert_eq!(t.reply().unwrap().text, "primary");
        t.chosen = Some(1);
        assert_eq!(t.reply().unwrap().text, "alt");
    }

    #[test]
    fn test_turn_requires_contact() {
        let mut history = ConversationHistory::new();
        assert!(history.append(turn("", "hi", "hey")).is_err());
    }

    #[test]
    fn test_find_by_prefix() {
        let mut history = ConversationHistory::new();
        let t = turn("c1", "hi", "hey");
        let id = t.id.clone();
        history.append(t).unwrap();

        assert_eq!(history.find_mut("c1", &id[..6]).unwrap().id, id);
        assert!(history.find_mut("c2", &id).is_err());
    }

    #[test]
    fn test_ambiguous_or_empty_turn_ids_are_rejected() {
        let mut history = ConversationHistory::new();
        for id in ["ab12-first", "ab34-second"] {
            let mut t = turn("c1", "hi", "hey");
            t.id = id.to_string();
            history.append(t).unwrap();
        }

        assert!(matches!(history.position("c1", ""), Err(RelioError::InvalidInput(_))));
        assert!(matches!(history.position("c1", "ab"), Err(RelioError::InvalidInput(_))));
        assert!(matches!(history.position("c1", "zz"), Err(RelioError::TurnNotFound(_))));
        assert_eq!(history.position("c1", "ab3").unwrap(), 1);
        assert_eq!(history.find_mut("c1", "ab12").unwrap().id, "ab12-first");
    }
}
