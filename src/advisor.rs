use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::analysis::ConversationAnalyzer;
use crate::config::Settings;
use crate::core::error::{RelioError, Result};
use crate::core::history::{ConversationHistory, ConversationTurn, Feedback};
use crate::core::intimacy::{IntimacyChange, IntimacyManager};
use crate::core::memory::{MemoryEntry, MemoryKind, MemorySource, MemoryStore, ProfileMemorySummary, ReplyMemorySummary};
use crate::core::profile::{ContactProfile, ProfileManager, ProfileUpdate, RelationshipType, StyleUpdate};
use crate::core::relationship::{
    IntimacyLevel, RelationshipStage, RelationshipState, RelationshipStats, RelationshipTracker, StageChange,
};
use crate::core::store::DataStore;
use crate::extractor::{ApplyReport, MemoryExtractor};
use crate::feedback::{FeedbackManager, FeedbackOutcome};
use crate::llm::{ChatModel, OpenAiCompatibleClient};
use crate::reply::{ReplyContext, ReplyEngine, ReplyRecommendation};

/// Turns sent to the extractor per run.
const EXTRACTION_WINDOW: usize = 20;
const SETTLE_REJECTIONS_EVERY_DAYS: i64 = 7;

/// Aborts the wrapped task when the awaiting future is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestOutcome {
    pub turn_id: String,
    pub recommendation: ReplyRecommendation,
    pub intimacy: i32,
    pub stage: RelationshipStage,
    pub decay: Option<IntimacyChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactStatus {
    pub profile: ContactProfile,
    pub state: RelationshipState,
    pub level: IntimacyLevel,
    pub last_seen: String,
    pub timeline: Vec<StageChange>,
    pub memory: ProfileMemorySummary,
    pub turns: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub decayed: Vec<(String, i32)>,
    pub penalized: Vec<(String, i32)>,
    pub drifting: usize,
}

/// A manual memory as entered on the command line.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub kind: MemoryKind,
    pub content: String,
    /// Confidence, impact or effectiveness depending on the kind.
    pub value: Option<f64>,
    pub event_date: Option<NaiveDate>,
}

/// Owns every store and wires analysis, prompting and feedback together.
pub struct ReplyAdvisor {
    settings: Settings,
    store: DataStore,
    profiles: ProfileManager,
    tracker: RelationshipTracker,
    history: ConversationHistory,
    memories: MemoryStore,
    analyzer: ConversationAnalyzer,
    feedback: FeedbackManager,
    /// Built on first use, so offline commands never touch the network stack.
    model: Option<Arc<dyn ChatModel>>,
    fixed_today: Option<NaiveDate>,
}

impl ReplyAdvisor {
    /// Loads the data directory. The endpoint client is created lazily.
    pub fn new(settings: Settings) -> Self {
        Self::load(settings, None)
    }

    pub fn with_model(settings: Settings, model: Arc<dyn ChatModel>) -> Self {
        Self::load(settings, Some(model))
    }

    fn load(settings: Settings, model: Option<Arc<dyn ChatModel>>) -> Self {
        let store = DataStore::new(settings.data_dir.clone());
        let profiles = store.load_profiles();
        let tracker = store.load_relationships(settings.stages);
        let history = store.load_history();
        let memories = store.load_memories();
        let feedback = FeedbackManager::new(IntimacyManager::new(settings.intimacy.clone()));

        tracing::info!(
            data_dir = %settings.data_dir.display(),
            contacts = profiles.len(),
            "advisor ready"
        );

        ReplyAdvisor {
            settings,
            store,
            profiles,
            tracker,
            history,
            memories,
            analyzer: ConversationAnalyzer::new(),
            feedback,
            model,
            fixed_today: None,
        }
    }

    /// Pins the calendar day, for reproducible runs.
    pub fn set_today(&mut self, today: NaiveDate) {
        self.fixed_today = Some(today);
    }

    fn model(&mut self) -> Result<Arc<dyn ChatModel>> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }
        let client = OpenAiCompatibleClient::new(
            &self.settings.api.base_url,
            self.settings.api.api_key.clone(),
            self.settings.api.timeout(),
        )?;
        let model: Arc<dyn ChatModel> = Arc::new(client);
        self.model = Some(model.clone());
        Ok(model)
    }

    fn today(&self) -> NaiveDate {
        self.fixed_today.unwrap_or_else(|| Local::now().date_naive())
    }

    fn intimacy(&self) -> &IntimacyManager {
        self.feedback.intimacy()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    pub fn tracker(&self) -> &RelationshipTracker {
        &self.tracker
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn memories(&self) -> &MemoryStore {
        &self.memories
    }

    pub fn resolve(&self, key: &str) -> Result<String> {
        Ok(self.profiles.resolve(key)?.id.clone())
    }

    pub fn save(&self) -> Result<()> {
        self.store.save_profiles(&self.profiles)?;
        self.store.save_relationships(&self.tracker)?;
        self.store.save_history(&self.history)?;
        self.store.save_memories(&self.memories)?;
        Ok(())
    }

    pub fn add_contact(&mut self, name: &str, relationship_type: RelationshipType) -> Result<ContactProfile> {
        let profile = self
            .profiles
            .create(ContactProfile::new(name, relationship_type))?
            .clone();
        let base = self.intimacy().base_intimacy(relationship_type);
        self.tracker.get_or_create(&profile.id, base);

        tracing::info!(contact = %profile.id, name = %profile.name, "contact added");
        self.save()?;
        Ok(profile)
    }

    pub fn edit_contact(&mut self, key: &str, update: ProfileUpdate, style: StyleUpdate) -> Result<ContactProfile> {
        let id = self.resolve(key)?;
        self.profiles.update(&id, update)?;
        self.profiles.update_style(&id, style)?;

        let relationship_type = self.profiles.resolve(&id)?.relationship_type;
        let base = self.intimacy().base_intimacy(relationship_type);
        self.tracker.get_or_create(&id, base);

        self.save()?;
        Ok(self.profiles.resolve(&id)?.clone())
    }

    /// Removes the contact along with its relationship state, turns and memories.
    pub fn remove_contact(&mut self, key: &str) -> Result<ContactProfile> {
        let id = self.resolve(key)?;
        let profile = self
            .profiles
            .remove(&id)
            .ok_or_else(|| RelioError::ContactNotFound(id.clone()))?;
        self.tracker.remove(&id);
        let turns = self.history.remove_contact(&id);
        let memories = self.memories.remove_contact(&id);

        tracing::info!(contact = %id, turns, memories, "contact removed");
        self.save()?;
        Ok(profile)
    }

    fn state_for(&mut self, id: &str) -> Result<&RelationshipState> {
        let relationship_type = self
            .profiles
            .get(id)
            .map(|p| p.relationship_type)
            .ok_or_else(|| RelioError::ContactNotFound(id.to_string()))?;
        let base = self.intimacy().base_intimacy(relationship_type);
        Ok(self.tracker.get_or_create(id, base))
    }

    /// Takes any decay owed for inactivity and refreshes the stage.
    fn settle_decay(&mut self, id: &str, today: NaiveDate) -> Result<Option<IntimacyChange>> {
        let state = self.state_for(id)?;
        let (current, last, applied) = (state.intimacy, state.last_interaction_date, state.decay_applied);
        let change = self.intimacy().decay(current, last, applied, today);

        if let Some(change) = &change {
            self.tracker
                .set_intimacy(id, change.score, &change.reason, None, today)?;
            if let Some(state) = self.tracker.get_mut(id) {
                state.decay_applied += -change.delta;
            }
        }
        self.tracker.refresh_stage(id, today)?;
        Ok(change)
    }

    /// Generates reply suggestions for an incoming message.
    ///
    /// The model call runs on its own task. Dropping the returned future
    /// aborts it, and nothing is recorded unless the call succeeds.
    pub async fn suggest(&mut self, key: &str, message: &str) -> Result<SuggestOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RelioError::InvalidInput("message must not be empty".to_string()));
        }
        let id = self.resolve(key)?;
        let today = self.today();

        // Work on a snapshot so an abandoned request leaves no trace.
        let mut snapshot = self.state_for(&id)?.clone();
        if let Some(change) = self.intimacy().decay(
            snapshot.intimacy,
            snapshot.last_interaction_date,
            snapshot.decay_applied,
            today,
        ) {
            snapshot.intimacy = change.score;
            snapshot.closeness = change.score as f64 / 100.0;
            snapshot.stage = RelationshipStage::derive(
                snapshot.stage,
                snapshot.intimacy,
                snapshot.days_idle(today),
                self.tracker.thresholds(),
            );
        }

        let profile = self.profiles.resolve(&id)?.clone();
        let window = self.history.window(&id, self.settings.api.max_history);
        let analysis = self.analyzer.analyze(&id, message, window.len());
        let score = self.analyzer.score(&analysis, &profile, &snapshot);
        let memory: ReplyMemorySummary = self.memories.summary_for_reply(&id);

        let engine = ReplyEngine::new(self.model()?, self.settings.api.chat_options());
        let task = {
            let analysis = analysis.clone();
            let snapshot = snapshot.clone();
            tokio::spawn(async move {
                let ctx = ReplyContext {
                    profile: &profile,
                    state: &snapshot,
                    analysis: &analysis,
                    score,
                    memory: &memory,
                };
                engine.generate(&ctx, &window).await
            })
        };
        let mut guard = AbortOnDrop(task);
        let recommendation = (&mut guard.0)
            .await
            .map_err(|e| RelioError::Task(e.to_string()))??;

        // The call succeeded: commit decay, the turn and the interaction.
        let decay = self.settle_decay(&id, today)?;
        let stage_before = self.tracker.get(&id).map(|s| s.stage);

        let mut turn = ConversationTurn::new(
            &id,
            message,
            analysis.intent,
            analysis.sentiment,
            self.tracker.get(&id).map(|s| s.intimacy).unwrap_or(snapshot.intimacy),
        );
        turn.keywords = analysis.keywords.clone();
        turn.suggestions = recommendation.suggestions.clone();
        let turn_id = turn.id.clone();
        self.history.append(turn)?;

        let state = self.tracker.record_interaction(&id, today)?;
        let (intimacy, stage) = (state.intimacy, state.stage);
        self.profiles.record_interaction(&id)?;
        if self.settings.learn_style {
            self.profiles.learn_style(&id, &analysis.style)?;
        }
        if let Some(before) = stage_before.filter(|before| *before != stage) {
            self.profiles
                .add_evolution_note(&id, format!("{}: {} -> {}", today, before, stage))?;
        }

        tracing::info!(
            contact = %id,
            turn = %turn_id,
            strategy = %recommendation.strategy,
            suggestions = recommendation.suggestions.len(),
            "suggestions generated"
        );
        self.save()?;

        Ok(SuggestOutcome {
            turn_id,
            recommendation,
            intimacy,
            stage,
            decay,
        })
    }

    /// Sets or clears (`None`) the feedback on one suggestion of a turn.
    pub fn feedback(
        &mut self,
        key: &str,
        turn_id: &str,
        index: usize,
        feedback: Option<Feedback>,
    ) -> Result<Option<FeedbackOutcome>> {
        let id = self.resolve(key)?;
        let today = self.today();
        self.state_for(&id)?;

        let turn = self.history.find_mut(&id, turn_id)?;
        let outcome = self
            .feedback
            .apply(&mut self.tracker, turn, index, feedback, today)?;
        if outcome.is_some() {
            self.save()?;
        }
        Ok(outcome)
    }

    /// Records which suggestion was sent and grows intimacy once per turn.
    pub fn accept(&mut self, key: &str, turn_id: &str, index: usize) -> Result<IntimacyChange> {
        let id = self.resolve(key)?;
        let today = self.today();
        self.state_for(&id)?;

        // Gap between this turn and the one before it.
        let position = self.history.position(&id, turn_id)?;
        let turns = self.history.turns(&id);
        let days_since_last = match position.checked_sub(1).map(|p| &turns[p]) {
            Some(previous) => (turns[position].timestamp - previous.timestamp).num_days(),
            None => 0,
        };
        let quality = self.analyzer.quality(&turns[position].message);

        let turn = self.history.find_mut(&id, turn_id)?;
        let change = self
            .feedback
            .accept(&mut self.tracker, turn, index, &quality, days_since_last, today)?;
        self.save()?;
        Ok(change)
    }

    pub fn add_memory(&mut self, key: &str, memory: NewMemory) -> Result<MemoryEntry> {
        let id = self.resolve(key)?;
        let entry = match memory.kind {
            MemoryKind::EntityFact => self.memories.add_fact(
                &id,
                &memory.content,
                memory.value.unwrap_or(0.8),
                MemorySource::Manual,
            )?,
            MemoryKind::RelationshipEvent => {
                let date = memory.event_date.unwrap_or_else(|| self.today());
                self.memories.add_event(
                    &id,
                    &memory.content,
                    memory.value.unwrap_or(0.0),
                    date,
                    MemorySource::Manual,
                )?
            }
            MemoryKind::CommunicationStrategy => self.memories.add_strategy(
                &id,
                &memory.content,
                memory.value.unwrap_or(0.5),
                MemorySource::Manual,
            )?,
        }
        .clone();
        self.store.save_memories(&self.memories)?;
        Ok(entry)
    }

    pub fn remove_memory(&mut self, memory_id: &str) -> Result<MemoryEntry> {
        let entry = self.memories.remove(memory_id)?;
        self.store.save_memories(&self.memories)?;
        Ok(entry)
    }

    /// Hides a memory from prompts and summaries without deleting it.
    pub fn deactivate_memory(&mut self, memory_id: &str) -> Result<MemoryEntry> {
        self.memories.deactivate(memory_id)?;
        self.store.save_memories(&self.memories)?;
        Ok(self.memories.get(memory_id)?.clone())
    }

    /// Confirms a fact, returning its new confidence.
    pub fn confirm_memory(&mut self, memory_id: &str) -> Result<f64> {
        let confidence = self.memories.confirm_fact(memory_id)?;
        self.store.save_memories(&self.memories)?;
        Ok(confidence)
    }

    pub fn edit_memory(&mut self, memory_id: &str, content: &str) -> Result<MemoryEntry> {
        self.memories.update_content(memory_id, content)?;
        self.store.save_memories(&self.memories)?;
        Ok(self.memories.get(memory_id)?.clone())
    }

    pub fn list_memories(&self, key: &str, kind: Option<MemoryKind>, include_inactive: bool) -> Result<Vec<MemoryEntry>> {
        let id = self.resolve(key)?;
        Ok(self
            .memories
            .query(&id, kind, !include_inactive)
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn memory_summary(&self, key: &str) -> Result<ReplyMemorySummary> {
        let id = self.resolve(key)?;
        Ok(self.memories.summary_for_reply(&id))
    }

    /// Asks the model for memories found in the recent turns and stores them.
    pub async fn extract_memories(&mut self, key: &str) -> Result<ApplyReport> {
        let id = self.resolve(key)?;
        let name = self.profiles.resolve(&id)?.display_name().to_string();
        let today = self.today();
        let model = self.model()?;

        let turns = self.history.turns(&id);
        let recent = &turns[turns.len().saturating_sub(EXTRACTION_WINDOW)..];

        let extractor = MemoryExtractor::new(model, self.settings.api.chat_options());
        let result = extractor.extract(&id, &name, recent, &self.memories, today).await?;
        let report = extractor.apply(&mut self.memories, &id, result).await;

        self.store.save_memories(&self.memories)?;
        Ok(report)
    }

    /// Daily upkeep: inactivity decay and drift for every contact, and the
    /// weekly rejection penalty with counter reset.
    pub fn maintenance(&mut self) -> Result<MaintenanceReport> {
        let today = self.today();
        let mut report = MaintenanceReport::default();

        for id in self.tracker.contact_ids() {
            if self.profiles.get(&id).is_none() {
                continue;
            }
            if let Some(change) = self.settle_decay(&id, today)? {
                report.decayed.push((id.clone(), change.delta));
            }

            let (intimacy, rejections, settled) = match self.tracker.get(&id) {
                Some(s) => (s.intimacy, s.rejection_count, s.rejections_settled_on),
                None => continue,
            };
            let due = settled.map_or(true, |d| (today - d).num_days() >= SETTLE_REJECTIONS_EVERY_DAYS);
            if !due {
                continue;
            }
            if settled.is_some() {
                if let Some(penalty) = self.intimacy().rejection_penalty(intimacy, rejections) {
                    self.tracker
                        .set_intimacy(&id, penalty.score, &penalty.reason, None, today)?;
                    report.penalized.push((id.clone(), penalty.delta));
                }
            }
            if let Some(state) = self.tracker.get_mut(&id) {
                if settled.is_some() {
                    state.rejection_count = 0;
                }
                state.rejections_settled_on = Some(today);
            }
        }

        report.drifting = self.tracker.stats().drifting;
        tracing::info!(
            decayed = report.decayed.len(),
            penalized = report.penalized.len(),
            drifting = report.drifting,
            "maintenance done"
        );
        self.save()?;
        Ok(report)
    }

    pub fn status(&mut self, key: &str) -> Result<ContactStatus> {
        let id = self.resolve(key)?;
        let today = self.today();
        let state = self.state_for(&id)?.clone();
        let profile = self.profiles.resolve(&id)?.clone();

        Ok(ContactStatus {
            level: state.level(),
            last_seen: IntimacyManager::interaction_status(state.last_interaction_date, today),
            timeline: self.tracker.timeline(&id),
            memory: self.memories.summary_for_profile(&id),
            turns: self.history.turns(&id).len(),
            profile,
            state,
        })
    }

    pub fn overview(&self) -> RelationshipStats {
        self.tracker.stats()
    }

    pub fn export(&self) -> Result<Vec<PathBuf>> {
        self.store
            .export_summaries(&self.profiles, &self.tracker, &self.memories, self.today())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsFile;
    use crate::core::profile::ReplyStrategy;
    use crate::llm::testing::ScriptedModel;
    use crate::llm::LlmError;
    use tempfile::TempDir;

    const REPLY: &str = r#"{"primary": "Sounds fun!", "alternatives": ["Let me check", "Sure thing"]}"#;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn advisor(dir: &TempDir, replies: Vec<std::result::Result<String, LlmError>>) -> (ReplyAdvisor, Arc<ScriptedModel>) {
        let settings = Settings::resolve(SettingsFile::default(), |_| None, dir.path().to_path_buf()).unwrap();
        let model = Arc::new(ScriptedModel::new(replies));
        let mut advisor = ReplyAdvisor::with_model(settings, model.clone());
        advisor.set_today(day("2026-05-01"));
        (advisor, model)
    }

    #[tokio::test]
    async fn test_suggest_records_turn_and_interaction() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, model) = advisor(&dir, vec![Ok(REPLY.to_string())]);
        let contact = advisor.add_contact("Hana", RelationshipType::Friend).unwrap();

        let outcome = advisor.suggest("hana", "Want to see a movie?").await.unwrap();
        assert_eq!(outcome.recommendation.suggestions.len(), 3);
        assert_eq!(outcome.intimacy, 25);
        assert_eq!(model.request_count(), 1);

        let state = advisor.tracker().get(&contact.id).unwrap();
        assert_eq!(state.interaction_count, 1);
        assert_eq!(state.last_interaction_date, Some(day("2026-05-01")));
        assert_eq!(advisor.history().turns(&contact.id).len(), 1);
        assert_eq!(advisor.profiles().get(&contact.id).unwrap().message_count, 1);

        // persisted
        let reloaded = DataStore::new(dir.path()).load_history();
        assert_eq!(reloaded.turns(&contact.id)[0].id, outcome.turn_id);
    }

    #[tokio::test]
    async fn test_failed_request_records_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, vec![Err(LlmError::Auth { status: 401, message: "bad key".to_string() })]);
        let contact = advisor.add_contact("Ivan", RelationshipType::Colleague).unwrap();

        let err = advisor.suggest(&contact.id, "report ready?").await.unwrap_err();
        assert!(err.user_notice().contains("API key"));
        assert_eq!(advisor.history().total_turns(), 0);
        assert_eq!(advisor.tracker().get(&contact.id).unwrap().interaction_count, 0);
    }

    #[tokio::test]
    async fn test_feedback_and_accept_flow() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, vec![Ok(REPLY.to_string())]);
        let contact = advisor.add_contact("Jo", RelationshipType::CloseFriend).unwrap();
        let outcome = advisor.suggest("Jo", "thanks for yesterday!").await.unwrap();
        let start = outcome.intimacy;

        let liked = advisor
            .feedback("Jo", &outcome.turn_id[..8], 0, Some(Feedback::Like))
            .unwrap()
            .unwrap();
        assert_eq!(liked.intimacy, start + 2);
        assert_eq!(liked.strategy, ReplyStrategy::Casual);

        let growth = advisor.accept("Jo", &outcome.turn_id, 1).unwrap();
        assert!(growth.delta >= 1);
        let state = advisor.tracker().get(&contact.id).unwrap();
        assert_eq!(state.intimacy, start + 2 + growth.delta);

        assert!(advisor.feedback("Jo", "missing", 0, None).is_err());
        assert!(matches!(advisor.accept("Jo", "", 0), Err(RelioError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_memory_deactivate_confirm_edit() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, Vec::new());
        let contact = advisor.add_contact("Oli", RelationshipType::Friend).unwrap();
        let fact = advisor
            .add_memory(
                "Oli",
                NewMemory {
                    kind: MemoryKind::EntityFact,
                    content: "likes tea".to_string(),
                    value: Some(0.5),
                    event_date: None,
                },
            )
            .unwrap();

        let confidence = advisor.confirm_memory(&fact.id).unwrap();
        assert!((confidence - 0.6).abs() < 1e-9);

        let edited = advisor.edit_memory(&fact.id, "likes green tea").unwrap();
        assert_eq!(edited.content, "likes green tea");
        assert!(advisor.edit_memory(&fact.id, "  ").is_err());

        let hidden = advisor.deactivate_memory(&fact.id).unwrap();
        assert!(!hidden.active);
        assert!(advisor.list_memories("Oli", None, false).unwrap().is_empty());
        assert_eq!(advisor.list_memories("Oli", None, true).unwrap().len(), 1);
        assert!(advisor.memory_summary("Oli").unwrap().facts.is_empty());

        let reloaded = DataStore::new(dir.path()).load_memories();
        let entries = reloaded.query(&contact.id, None, false);
        assert_eq!(entries[0].content, "likes green tea");
        assert!(!entries[0].active);
    }

    #[test]
    fn test_offline_commands_skip_the_client() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::resolve(SettingsFile::default(), |_| None, dir.path().to_path_buf()).unwrap();
        let mut advisor = ReplyAdvisor::new(settings);
        assert!(advisor.model.is_none());

        advisor.add_contact("Pia", RelationshipType::Colleague).unwrap();
        advisor.status("pia").unwrap();
        advisor.maintenance().unwrap();
        assert!(advisor.model.is_none());
    }

    #[tokio::test]
    async fn test_remove_contact_cascades() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, vec![Ok(REPLY.to_string())]);
        let contact = advisor.add_contact("Kim", RelationshipType::Family).unwrap();
        advisor.suggest("Kim", "dinner sunday?").await.unwrap();
        advisor
            .add_memory(
                "Kim",
                NewMemory {
                    kind: MemoryKind::EntityFact,
                    content: "cooks well".to_string(),
                    value: None,
                    event_date: None,
                },
            )
            .unwrap();

        advisor.remove_contact("Kim").unwrap();
        assert!(advisor.tracker().get(&contact.id).is_none());
        assert_eq!(advisor.history().total_turns(), 0);
        assert!(advisor.memories().is_empty());
        assert!(advisor.suggest("Kim", "hello").await.is_err());
    }

    #[tokio::test]
    async fn test_maintenance_decays_and_settles_rejections() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, vec![Ok(REPLY.to_string())]);
        let contact = advisor.add_contact("Lee", RelationshipType::Partner).unwrap();
        advisor.suggest("Lee", "hey").await.unwrap();
        advisor.maintenance().unwrap();

        if let Some(state) = advisor.tracker.get_mut(&contact.id) {
            state.rejection_count = 2;
        }
        advisor.set_today(day("2026-05-21"));
        let report = advisor.maintenance().unwrap();

        // 20 idle days cost 2, two rejections cost 4
        assert_eq!(report.decayed, vec![(contact.id.clone(), -2)]);
        assert_eq!(report.penalized, vec![(contact.id.clone(), -4)]);
        let state = advisor.tracker().get(&contact.id).unwrap();
        assert_eq!(state.intimacy, 45 - 6);
        assert_eq!(state.rejection_count, 0);

        // running again the same day changes nothing
        let again = advisor.maintenance().unwrap();
        assert!(again.decayed.is_empty() && again.penalized.is_empty());
    }

    #[tokio::test]
    async fn test_extract_memories_uses_recent_turns() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, model) = advisor(
            &dir,
            vec![
                Ok(REPLY.to_string()),
                Ok(r#"{"profile_traits": [{"content": "loves sci-fi", "confidence": 0.8}], "experiences": [], "strategies": []}"#.to_string()),
            ],
        );
        let contact = advisor.add_contact("Max", RelationshipType::Friend).unwrap();
        advisor.suggest("Max", "seen the new sci-fi film?").await.unwrap();

        let report = advisor.extract_memories("Max").await.unwrap();
        assert_eq!(report.facts_added, 1);
        assert_eq!(advisor.memory_summary("Max").unwrap().facts, vec!["loves sci-fi"]);
        assert_eq!(model.request_count(), 2);

        let reloaded = DataStore::new(dir.path()).load_memories();
        assert_eq!(reloaded.query(&contact.id, None, true).len(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_relationship() {
        let dir = TempDir::new().unwrap();
        let (mut advisor, _) = advisor(&dir, Vec::new());
        advisor.add_contact("Ned", RelationshipType::Acquaintance).unwrap();

        let status = advisor.status("ned").unwrap();
        assert_eq!(status.state.intimacy, 15);
        assert_eq!(status.level, IntimacyLevel::from_score(15));
        assert_eq!(status.last_seen, "never");
        assert_eq!(status.turns, 0);
        assert_eq!(advisor.overview().total, 1);
    }
}
