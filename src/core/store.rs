use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::Result;
use super::history::{ConversationHistory, ConversationTurn};
use super::intimacy::IntimacyManager;
use super::memory::{MemoryEntry, MemoryStore};
use super::profile::{ContactProfile, ProfileManager};
use super::relationship::{RelationshipState, RelationshipTracker, StageThresholds};

pub const PROFILES_FILE: &str = "profiles.json";
pub const RELATIONSHIPS_FILE: &str = "relationship_states.json";
pub const MEMORIES_FILE: &str = "long_term_memories.json";
pub const CONVERSATIONS_FILE: &str = "conversations.json";
pub const PROFILE_SUMMARY_FILE: &str = "profile_summary.json";
pub const RELATIONSHIP_SUMMARY_FILE: &str = "relationship_summary.json";

/// JSON files in one data directory.
#[derive(Debug, Clone)]
pub struct DataStore {
    dir: PathBuf,
}

impl DataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DataStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub fn load_profiles(&self) -> ProfileManager {
        let profiles: HashMap<String, ContactProfile> = load_json(&self.path(PROFILES_FILE));
        ProfileManager::from_profiles(profiles)
    }

    pub fn save_profiles(&self, profiles: &ProfileManager) -> Result<()> {
        save_json(&self.path(PROFILES_FILE), profiles.as_map())
    }

    pub fn load_relationships(&self, thresholds: StageThresholds) -> RelationshipTracker {
        let states: HashMap<String, RelationshipState> = load_json(&self.path(RELATIONSHIPS_FILE));
        RelationshipTracker::from_states(states, thresholds)
    }

    pub fn save_relationships(&self, tracker: &RelationshipTracker) -> Result<()> {
        save_json(&self.path(RELATIONSHIPS_FILE), tracker.as_map())
    }

    pub fn load_memories(&self) -> MemoryStore {
        let entries: Vec<MemoryEntry> = load_json(&self.path(MEMORIES_FILE));
        MemoryStore::from_entries(entries)
    }

    pub fn save_memories(&self, memories: &MemoryStore) -> Result<()> {
        save_json(&self.path(MEMORIES_FILE), memories.entries())
    }

    pub fn load_history(&self) -> ConversationHistory {
        let turns: HashMap<String, Vec<ConversationTurn>> = load_json(&self.path(CONVERSATIONS_FILE));
        ConversationHistory::from_turns(turns)
    }

    pub fn save_history(&self, history: &ConversationHistory) -> Result<()> {
        save_json(&self.path(CONVERSATIONS_FILE), history.as_map())
    }

    /// Writes the human-readable summary reports and returns their paths.
    pub fn export_summaries(
        &self,
        profiles: &ProfileManager,
        tracker: &RelationshipTracker,
        memories: &MemoryStore,
        today: NaiveDate,
    ) -> Result<Vec<PathBuf>> {
        #[derive(Serialize)]
        struct ProfileSummary<'a> {
            id: &'a str,
            name: &'a str,
            relationship_type: String,
            style: &'a super::profile::StyleParams,
            style_tags: &'a [String],
            goals: &'a [String],
            message_count: u32,
            traits: Vec<String>,
            events: Vec<String>,
        }

        #[derive(Serialize)]
        struct RelationshipSummary<'a> {
            contact_id: &'a str,
            name: &'a str,
            intimacy: i32,
            level: String,
            stage: String,
            interaction_count: u32,
            last_interaction: String,
            acceptance_rate: f64,
            rejection_count: u32,
        }

        #[derive(Serialize)]
        struct Report<T> {
            generated_at: chrono::DateTime<Utc>,
            entries: Vec<T>,
        }

        let profile_entries: Vec<ProfileSummary> = profiles
            .list()
            .into_iter()
            .map(|p| {
                let mem = memories.summary_for_profile(&p.id);
                ProfileSummary {
                    id: &p.id,
                    name: p.display_name(),
                    relationship_type: p.relationship_type.to_string(),
                    style: &p.style,
                    style_tags: &p.style_tags,
                    goals: &p.goals,
                    message_count: p.message_count,
                    traits: mem
                        .traits
                        .into_iter()
                        .map(|(text, confidence)| format!("{} ({:.0}%)", text, confidence * 100.0))
                        .collect(),
                    events: mem
                        .events
                        .into_iter()
                        .map(|(text, impact, date)| format!("{} [{}] ({:+.1})", text, date, impact))
                        .collect(),
                }
            })
            .collect();

        let relationship_entries: Vec<RelationshipSummary> = profiles
            .list()
            .into_iter()
            .filter_map(|p| {
                tracker.get(&p.id).map(|s| RelationshipSummary {
                    contact_id: &s.contact_id,
                    name: p.display_name(),
                    intimacy: s.intimacy,
                    level: s.level().to_string(),
                    stage: s.stage.to_string(),
                    interaction_count: s.interaction_count,
                    last_interaction: IntimacyManager::interaction_status(s.last_interaction_date, today),
                    acceptance_rate: s.acceptance_rate,
                    rejection_count: s.rejection_count,
                })
            })
            .collect();

        let now = Utc::now();
        let profile_path = self.path(PROFILE_SUMMARY_FILE);
        let relationship_path = self.path(RELATIONSHIP_SUMMARY_FILE);
        save_json(&profile_path, &Report { generated_at: now, entries: profile_entries })?;
        save_json(&relationship_path, &Report { generated_at: now, entries: relationship_entries })?;

        Ok(vec![profile_path, relationship_path])
    }
}

/// Missing or unreadable files load as empty data.
pub(crate) fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read data file, starting empty");
            return T::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to parse data file, starting empty");
            T::default()
        }
    }
}

/// Writes next to the target and renames over it.
pub(crate) fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    tracing::debug!(path = %path.display(), "saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemorySource;
    use crate::core::profile::RelationshipType;
    use tempfile::TempDir;

    #[test]
    fn test_profiles_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::new(dir.path());

        let mut profiles = ProfileManager::new();
        let mut alice = ContactProfile::new("Alice", RelationshipType::Friend);
        alice.goals.push("plan a trip".to_string());
        alice.style.humor = 0.8;
        profiles.create(alice).unwrap();
        profiles.create(ContactProfile::new("Bob", RelationshipType::Colleague)).unwrap();

        store.save_profiles(&profiles).unwrap();
        let loaded = store.load_profiles();

        assert_eq!(loaded.as_map(), profiles.as_map());
        assert!(!dir.path().join("profiles.json.tmp").exists());
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::new(dir.path().join("nested"));

        assert!(store.load_profiles().is_empty());
        assert!(store.load_memories().is_empty());
        assert_eq!(store.load_history().total_turns(), 0);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RELATIONSHIPS_FILE), "{not json").unwrap();
        let store = DataStore::new(dir.path());

        assert_eq!(store.load_relationships(StageThresholds::default()).stats().total, 0);
    }

    #[test]
    fn test_memories_and_relationships_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::new(dir.path());

        let mut memories = MemoryStore::new();
        memories.add_fact("c1", "likes hiking", 0.7, MemorySource::Manual).unwrap();
        let mut tracker = RelationshipTracker::new(StageThresholds::default());
        tracker.get_or_create("c1", 30);

        store.save_memories(&memories).unwrap();
        store.save_relationships(&tracker).unwrap();

        assert_eq!(store.load_memories().entries(), memories.entries());
        let loaded = store.load_relationships(StageThresholds::default());
        assert_eq!(loaded.get("c1"), tracker.get("c1"));
    }

    #[test]
    fn test_export_writes_both_reports() {
        let dir = TempDir::new().unwrap();
        let store = DataStore::new(dir.path());

        let mut profiles = ProfileManager::new();
        let id = profiles
            .create(ContactProfile::new("Carol", RelationshipType::Family))
            .unwrap()
            .id
            .clone();
        let mut tracker = RelationshipTracker::new(StageThresholds::default());
        tracker.get_or_create(&id, 35);

        let today = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let paths = store
            .export_summaries(&profiles, &tracker, &MemoryStore::new(), today)
            .unwrap();

        assert_eq!(paths.len(), 2);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[1]).unwrap()).unwrap();
        assert_eq!(report["entries"][0]["intimacy"], 35);
        assert_eq!(report["entries"][0]["last_interaction"], "never");
    }
}
