use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::{RelioError, Result};

/// Smoothing factor for learned style updates.
pub const STYLE_LEARNING_RATE: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Family,
    Partner,
    CloseFriend,
    Friend,
    Colleague,
    Acquaintance,
    Stranger,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 7] = [
        RelationshipType::Family,
        RelationshipType::Partner,
        RelationshipType::CloseFriend,
        RelationshipType::Friend,
        RelationshipType::Colleague,
        RelationshipType::Acquaintance,
        RelationshipType::Stranger,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Family => "family",
            RelationshipType::Partner => "partner",
            RelationshipType::CloseFriend => "close_friend",
            RelationshipType::Friend => "friend",
            RelationshipType::Colleague => "colleague",
            RelationshipType::Acquaintance => "acquaintance",
            RelationshipType::Stranger => "stranger",
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = RelioError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "family" => Ok(RelationshipType::Family),
            "partner" | "lover" | "spouse" => Ok(RelationshipType::Partner),
            "close_friend" => Ok(RelationshipType::CloseFriend),
            "friend" => Ok(RelationshipType::Friend),
            "colleague" | "coworker" => Ok(RelationshipType::Colleague),
            "acquaintance" => Ok(RelationshipType::Acquaintance),
            "stranger" => Ok(RelationshipType::Stranger),
            _ => Err(RelioError::InvalidInput(format!(
                "Unknown relationship type: {}",
                s
            ))),
        }
    }
}

/// Tone a suggested reply is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStrategy {
    Formal,
    Casual,
    Warm,
    Professional,
    Humorous,
}

impl ReplyStrategy {
    pub const ALL: [ReplyStrategy; 5] = [
        ReplyStrategy::Formal,
        ReplyStrategy::Casual,
        ReplyStrategy::Warm,
        ReplyStrategy::Professional,
        ReplyStrategy::Humorous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStrategy::Formal => "formal",
            ReplyStrategy::Casual => "casual",
            ReplyStrategy::Warm => "warm",
            ReplyStrategy::Professional => "professional",
            ReplyStrategy::Humorous => "humorous",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            ReplyStrategy::Formal => "polite and well-formed, no slang",
            ReplyStrategy::Casual => "relaxed and conversational",
            ReplyStrategy::Warm => "friendly and caring, openly expressing feelings",
            ReplyStrategy::Professional => "clear, competent and to the point",
            ReplyStrategy::Humorous => "light-hearted with a touch of humor",
        }
    }
}

impl std::fmt::Display for ReplyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Conversation style toward one contact. Every field is in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleParams {
    pub formality: f64,
    pub proactivity: f64,
    pub expressiveness: f64,
    pub humor: f64,
    pub verbosity: f64,
}

impl Default for StyleParams {
    fn default() -> Self {
        StyleParams {
            formality: 0.5,
            proactivity: 0.5,
            expressiveness: 0.5,
            humor: 0.5,
            verbosity: 0.5,
        }
    }
}

impl StyleParams {
    pub fn clamped(self) -> Self {
        StyleParams {
            formality: clamp_unit(self.formality),
            proactivity: clamp_unit(self.proactivity),
            expressiveness: clamp_unit(self.expressiveness),
            humor: clamp_unit(self.humor),
            verbosity: clamp_unit(self.verbosity),
        }
    }

    /// Moves each observed dimension a fraction of the way toward the signal.
    /// Proactivity has no message-level signal and is left alone.
    pub fn learn(&mut self, signals: &StyleSignals, rate: f64) {
        let rate = clamp_unit(rate);
        let blend = |old: f64, observed: f64| clamp_unit(old * (1.0 - rate) + observed * rate);

        self.formality = blend(self.formality, signals.formality);
        self.expressiveness = blend(self.expressiveness, signals.expressiveness);
        self.humor = blend(self.humor, signals.humor);
        self.verbosity = blend(self.verbosity, signals.verbosity);
    }
}

/// Style observed in a single message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StyleSignals {
    pub formality: f64,
    pub expressiveness: f64,
    pub humor: f64,
    pub verbosity: f64,
}

/// Partial style update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct StyleUpdate {
    pub formality: Option<f64>,
    pub proactivity: Option<f64>,
    pub expressiveness: Option<f64>,
    pub humor: Option<f64>,
    pub verbosity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactProfile {
    pub id: String,
    pub name: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub style: StyleParams,
    #[serde(default)]
    pub style_tags: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<PathBuf>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub evolution_notes: Vec<String>,
}

impl ContactProfile {
    pub fn new(name: &str, relationship_type: RelationshipType) -> Self {
        ContactProfile {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            relationship_type,
            style: StyleParams::default(),
            style_tags: Vec::new(),
            goals: Vec::new(),
            notes: String::new(),
            avatar: None,
            message_count: 0,
            last_interaction: None,
            created_at: Utc::now(),
            evolution_notes: Vec::new(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "unnamed"
        } else {
            &self.name
        }
    }

    pub fn record_interaction(&mut self) {
        self.message_count += 1;
        self.last_interaction = Some(Utc::now());
    }
}

/// Fields that can change when a contact is edited.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub relationship_type: Option<RelationshipType>,
    pub notes: Option<String>,
    pub style_tags: Option<Vec<String>>,
    pub goals: Option<Vec<String>>,
    pub avatar: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileManager {
    profiles: HashMap<String, ContactProfile>,
}

impl ProfileManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: HashMap<String, ContactProfile>) -> Self {
        ProfileManager { profiles }
    }

    pub fn create(&mut self, profile: ContactProfile) -> Result<&ContactProfile> {
        if profile.name.is_empty() {
            return Err(RelioError::InvalidInput("contact name must not be empty".to_string()));
        }
        if self.profiles.contains_key(&profile.id) {
            return Err(RelioError::DuplicateContact(profile.id));
        }
        let id = profile.id.clone();
        Ok(self.profiles.entry(id).or_insert(profile))
    }

    pub fn get(&self, id: &str) -> Option<&ContactProfile> {
        self.profiles.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ContactProfile> {
        self.profiles.get_mut(id)
    }

    /// Resolves an id, an unambiguous id prefix or an exact (case-insensitive) name.
    pub fn resolve(&self, key: &str) -> Result<&ContactProfile> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RelioError::InvalidInput("contact must not be empty".to_string()));
        }
        if let Some(profile) = self.profiles.get(key) {
            return Ok(profile);
        }

        let key_lower = key.to_lowercase();
        let mut matches: Vec<&ContactProfile> = self
            .profiles
            .values()
            .filter(|p| p.id.starts_with(key) || p.name.to_lowercase() == key_lower)
            .collect();

        match matches.len() {
            1 => Ok(matches.remove(0)),
            0 => Err(RelioError::ContactNotFound(key.to_string())),
            _ => Err(RelioError::InvalidInput(format!(
                "'{}' matches {} contacts, use the full id",
                key,
                matches.len()
            ))),
        }
    }

    pub fn update(&mut self, id: &str, update: ProfileUpdate) -> Result<&ContactProfile> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;

        if let Some(name) = update.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(RelioError::InvalidInput("contact name must not be empty".to_string()));
            }
            profile.name = name;
        }
        if let Some(relationship_type) = update.relationship_type {
            profile.relationship_type = relationship_type;
        }
        if let Some(notes) = update.notes {
            profile.notes = notes;
        }
        if let Some(tags) = update.style_tags {
            profile.style_tags = tags;
        }
        if let Some(goals) = update.goals {
            profile.goals = goals;
        }
        if let Some(avatar) = update.avatar {
            profile.avatar = Some(avatar);
        }

        Ok(profile)
    }

    pub fn update_style(&mut self, id: &str, update: StyleUpdate) -> Result<StyleParams> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;

        let style = &mut profile.style;
        if let Some(v) = update.formality {
            style.formality = v;
        }
        if let Some(v) = update.proactivity {
            style.proactivity = v;
        }
        if let Some(v) = update.expressiveness {
            style.expressiveness = v;
        }
        if let Some(v) = update.humor {
            style.humor = v;
        }
        if let Some(v) = update.verbosity {
            style.verbosity = v;
        }
        *style = style.clamped();

        Ok(*style)
    }

    pub fn learn_style(&mut self, id: &str, signals: &StyleSignals) -> Result<StyleParams> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;
        profile.style.learn(signals, STYLE_LEARNING_RATE);
        Ok(profile.style)
    }

    pub fn record_interaction(&mut self, id: &str) -> Result<()> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;
        profile.record_interaction();
        Ok(())
    }

    pub fn add_evolution_note(&mut self, id: &str, note: impl Into<String>) -> Result<()> {
        let profile = self
            .profiles
            .get_mut(id)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;
        profile.evolution_notes.push(note.into());
        Ok(())
    }

    /// All contacts ordered by name, then id.
    pub fn list(&self) -> Vec<&ContactProfile> {
        let mut profiles: Vec<_> = self.profiles.values().collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        profiles
    }

    pub fn remove(&mut self, id: &str) -> Option<ContactProfile> {
        self.profiles.remove(id)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn as_map(&self) -> &HashMap<String, ContactProfile> {
        &self.profiles
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.5
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_type_parse() {
        assert_eq!("Close Friend".parse::<RelationshipType>().unwrap(), RelationshipType::CloseFriend);
        assert_eq!("coworker".parse::<RelationshipType>().unwrap(), RelationshipType::Colleague);
        assert!("nemesis".parse::<RelationshipType>().is_err());
    }

    #[test]
    fn test_create_rejects_duplicates() {
        let mut manager = ProfileManager::new();
        let profile = ContactProfile::new("Alice", RelationshipType::Friend);
        let copy = profile.clone();

        manager.create(profile).unwrap();
        assert!(matches!(manager.create(copy), Err(RelioError::DuplicateContact(_))));
    }

    #[test]
    fn test_update_style_clamps() {
        let mut manager = ProfileManager::new();
        let id = manager.create(ContactProfile::new("Bob", RelationshipType::Colleague)).unwrap().id.clone();

        let style = manager
            .update_style(&id, StyleUpdate { formality: Some(1.7), humor: Some(-0.2), ..Default::default() })
            .unwrap();

        assert_eq!(style.formality, 1.0);
        assert_eq!(style.humor, 0.0);
        assert_eq!(style.verbosity, 0.5);
    }

    #[test]
    fn test_learn_style_moves_toward_signal() {
        let mut style = StyleParams::default();
        let signals = StyleSignals { formality: 1.0, expressiveness: 0.0, humor: 0.5, verbosity: 0.5 };

        style.learn(&signals, STYLE_LEARNING_RATE);

        assert!((style.formality - 0.575).abs() < 1e-9);
        assert!((style.expressiveness - 0.425).abs() < 1e-9);
        assert_eq!(style.humor, 0.5);
        assert_eq!(style.proactivity, 0.5);
    }

    #[test]
    fn test_resolve_by_name_and_prefix() {
        let mut manager = ProfileManager::new();
        let id = manager.create(ContactProfile::new("Carol", RelationshipType::Family)).unwrap().id.clone();

        assert_eq!(manager.resolve("carol").unwrap().id, id);
        assert_eq!(manager.resolve(&id[..8]).unwrap().id, id);
        assert!(matches!(manager.resolve("dave"), Err(RelioError::ContactNotFound(_))));
    }

    #[test]
    fn test_resolve_rejects_empty_key() {
        let mut manager = ProfileManager::new();
        manager.create(ContactProfile::new("Carol", RelationshipType::Family)).unwrap();

        assert!(matches!(manager.resolve(""), Err(RelioError::InvalidInput(_))));
        assert!(matches!(manager.resolve("   "), Err(RelioError::InvalidInput(_))));
    }

    #[test]
    fn test_list_sorted_by_name() {
        let mut manager = ProfileManager::new();
        manager.create(ContactProfile::new("Zoe", RelationshipType::Friend)).unwrap();
        manager.create(ContactProfile::new("Adam", RelationshipType::Friend)).unwrap();

        let names: Vec<_> = manager.list().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["Adam", "Zoe"]);
    }
}
