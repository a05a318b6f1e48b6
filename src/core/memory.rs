use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{RelioError, Result};

/// Facts at or above this confidence are used as reply hints.
const HINT_CONFIDENCE: f64 = 0.5;
/// Facts below this confidence are hidden from the profile summary.
const PROFILE_CONFIDENCE: f64 = 0.3;
const EFFECTIVE_STRATEGY: f64 = 0.6;
const AVOID_STRATEGY: f64 = 0.3;
const RECENT_EVENTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    EntityFact,
    RelationshipEvent,
    CommunicationStrategy,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryKind::EntityFact => write!(f, "fact"),
            MemoryKind::RelationshipEvent => write!(f, "event"),
            MemoryKind::CommunicationStrategy => write!(f, "strategy"),
        }
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = RelioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "fact" | "entity" | "entity_fact" | "profile" => Ok(MemoryKind::EntityFact),
            "event" | "experience" | "relationship_event" => Ok(MemoryKind::RelationshipEvent),
            "strategy" | "communication_strategy" => Ok(MemoryKind::CommunicationStrategy),
            _ => Err(RelioError::InvalidInput(format!("Unknown memory kind: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Manual,
    Extracted,
}

/// Kind-specific numbers carried by a memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MemoryDetail {
    EntityFact {
        confidence: f64,
        last_confirmed: DateTime<Utc>,
    },
    RelationshipEvent {
        impact: f64,
        event_date: NaiveDate,
        #[serde(default)]
        note: String,
    },
    CommunicationStrategy {
        effectiveness: f64,
        evidence_count: u32,
        last_updated: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub contact_id: String,
    pub content: String,
    pub source: MemorySource,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub detail: MemoryDetail,
}

fn default_active() -> bool {
    true
}

impl MemoryEntry {
    fn new(contact_id: &str, content: &str, source: MemorySource, detail: MemoryDetail) -> Result<Self> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RelioError::InvalidInput("memory content must not be empty".to_string()));
        }
        Ok(MemoryEntry {
            id: Uuid::new_v4().to_string(),
            contact_id: contact_id.to_string(),
            content: content.to_string(),
            source,
            created_at: Utc::now(),
            active: true,
            detail,
        })
    }

    pub fn kind(&self) -> MemoryKind {
        match self.detail {
            MemoryDetail::EntityFact { .. } => MemoryKind::EntityFact,
            MemoryDetail::RelationshipEvent { .. } => MemoryKind::RelationshipEvent,
            MemoryDetail::CommunicationStrategy { .. } => MemoryKind::CommunicationStrategy,
        }
    }
}

/// What the reply prompt needs to know from long-term memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplyMemorySummary {
    pub facts: Vec<String>,
    pub recent_events: Vec<String>,
    pub effective_strategies: Vec<String>,
    pub avoid_strategies: Vec<String>,
}

impl ReplyMemorySummary {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
            && self.recent_events.is_empty()
            && self.effective_strategies.is_empty()
            && self.avoid_strategies.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileMemorySummary {
    pub traits: Vec<(String, f64)>,
    pub events: Vec<(String, f64, NaiveDate)>,
    pub strategy_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Vec<MemoryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<MemoryEntry>) -> Self {
        MemoryStore { entries }
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    fn push(&mut self, entry: MemoryEntry) -> &MemoryEntry {
        tracing::debug!(contact = %entry.contact_id, kind = %entry.kind(), "memory added");
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn add_fact(&mut self, contact_id: &str, content: &str, confidence: f64, source: MemorySource) -> Result<&MemoryEntry> {
        let detail = MemoryDetail::EntityFact {
            confidence: clamp(confidence, 0.0, 1.0),
            last_confirmed: Utc::now(),
        };
        let entry = MemoryEntry::new(contact_id, content, source, detail)?;
        Ok(self.push(entry))
    }

    pub fn add_event(
        &mut self,
        contact_id: &str,
        event: &str,
        impact: f64,
        event_date: NaiveDate,
        source: MemorySource,
    ) -> Result<&MemoryEntry> {
        let detail = MemoryDetail::RelationshipEvent {
            impact: clamp(impact, -1.0, 1.0),
            event_date,
            note: String::new(),
        };
        let entry = MemoryEntry::new(contact_id, event, source, detail)?;
        Ok(self.push(entry))
    }

    pub fn add_strategy(
        &mut self,
        contact_id: &str,
        pattern: &str,
        effectiveness: f64,
        source: MemorySource,
    ) -> Result<&MemoryEntry> {
        let detail = MemoryDetail::CommunicationStrategy {
            effectiveness: clamp(effectiveness, 0.0, 1.0),
            evidence_count: 1,
            last_updated: Utc::now(),
        };
        let entry = MemoryEntry::new(contact_id, pattern, source, detail)?;
        Ok(self.push(entry))
    }

    /// Index of the entry with this id, or with this unambiguous id prefix.
    fn position(&self, id: &str) -> Result<usize> {
        let id = id.trim();
        if id.is_empty() {
            return Err(RelioError::InvalidInput("memory id must not be empty".to_string()));
        }
        if let Some(index) = self.entries.iter().position(|m| m.id == id) {
            return Ok(index);
        }

        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, m)| m.id.starts_with(id))
            .map(|(i, _)| i)
            .collect();
        match matches[..] {
            [index] => Ok(index),
            [] => Err(RelioError::MemoryNotFound(id.to_string())),
            _ => Err(RelioError::InvalidInput(format!(
                "'{}' matches {} memories, use a longer id",
                id,
                matches.len()
            ))),
        }
    }

    pub fn get(&self, id: &str) -> Result<&MemoryEntry> {
        let index = self.position(id)?;
        Ok(&self.entries[index])
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut MemoryEntry> {
        let index = self.position(id)?;
        Ok(&mut self.entries[index])
    }

    pub fn update_content(&mut self, id: &str, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RelioError::InvalidInput("memory content must not be empty".to_string()));
        }
        self.get_mut(id)?.content = content.to_string();
        Ok(())
    }

    pub fn deactivate(&mut self, id: &str) -> Result<()> {
        self.get_mut(id)?.active = false;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<MemoryEntry> {
        let index = self.position(id)?;
        Ok(self.entries.remove(index))
    }

    /// Entries of a contact in insertion order.
    pub fn query(&self, contact_id: &str, kind: Option<MemoryKind>, active_only: bool) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|m| m.contact_id == contact_id)
            .filter(|m| kind.map_or(true, |k| m.kind() == k))
            .filter(|m| !active_only || m.active)
            .collect()
    }

    /// Raises a fact's confidence by 0.1.
    pub fn confirm_fact(&mut self, id: &str) -> Result<f64> {
        let entry = self.get_mut(id)?;
        match &mut entry.detail {
            MemoryDetail::EntityFact { confidence, last_confirmed } => {
                *confidence = clamp(*confidence + 0.1, 0.0, 1.0);
                *last_confirmed = Utc::now();
                Ok(*confidence)
            }
            _ => Err(RelioError::InvalidInput(format!("memory {} is not a fact", id))),
        }
    }

    /// Records one more observation of a strategy working or not.
    pub fn reinforce_strategy(&mut self, id: &str, success: bool) -> Result<f64> {
        let entry = self.get_mut(id)?;
        match &mut entry.detail {
            MemoryDetail::CommunicationStrategy { effectiveness, evidence_count, last_updated } => {
                let delta = if success { 0.1 } else { -0.1 };
                *evidence_count += 1;
                *effectiveness = clamp(*effectiveness + delta, 0.0, 1.0);
                *last_updated = Utc::now();
                Ok(*effectiveness)
            }
            _ => Err(RelioError::InvalidInput(format!("memory {} is not a strategy", id))),
        }
    }

    pub fn summary_for_reply(&self, contact_id: &str) -> ReplyMemorySummary {
        let mut summary = ReplyMemorySummary::default();
        let mut events: Vec<(NaiveDate, usize, &str)> = Vec::new();

        for (index, entry) in self.query(contact_id, None, true).into_iter().enumerate() {
            match &entry.detail {
                MemoryDetail::EntityFact { confidence, .. } if *confidence >= HINT_CONFIDENCE => {
                    summary.facts.push(entry.content.clone());
                }
                MemoryDetail::RelationshipEvent { event_date, .. } => {
                    events.push((*event_date, index, entry.content.as_str()));
                }
                MemoryDetail::CommunicationStrategy { effectiveness, .. } => {
                    if *effectiveness >= EFFECTIVE_STRATEGY {
                        summary.effective_strategies.push(entry.content.clone());
                    } else if *effectiveness <= AVOID_STRATEGY {
                        summary.avoid_strategies.push(entry.content.clone());
                    }
                }
                _ => {}
            }
        }

        // Newest first; insertion order breaks ties so the result is stable.
        events.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
        summary.recent_events = events
            .into_iter()
            .take(RECENT_EVENTS)
            .map(|(date, _, text)| format!("{} ({})", text, date))
            .collect();

        summary
    }

    pub fn summary_for_profile(&self, contact_id: &str) -> ProfileMemorySummary {
        let mut summary = ProfileMemorySummary::default();
        for entry in self.query(contact_id, None, true) {
            match &entry.detail {
                MemoryDetail::EntityFact { confidence, .. } if *confidence >= PROFILE_CONFIDENCE => {
                    summary.traits.push((entry.content.clone(), *confidence));
                }
                MemoryDetail::RelationshipEvent { impact, event_date, .. } => {
                    summary.events.push((entry.content.clone(), *impact, *event_date));
                }
                MemoryDetail::CommunicationStrategy { .. } => summary.strategy_count += 1,
                _ => {}
            }
        }
        summary
    }

    /// Whether an active entry of the same kind says the same thing.
    pub fn contains_similar(&self, contact_id: &str, kind: MemoryKind, text: &str) -> bool {
        let needle = normalize(text);
        if needle.is_empty() {
            return false;
        }
        self.query(contact_id, Some(kind), true)
            .iter()
            .any(|m| normalize(&m.content) == needle)
    }

    pub fn remove_contact(&mut self, contact_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|m| m.contact_id != contact_id);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}
