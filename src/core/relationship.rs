use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::{RelioError, Result};
use crate::core::intimacy::{clamp_intimacy, MAX_INTIMACY};
use crate::core::profile::ReplyStrategy;

/// Intimacy history older than this many records is dropped.
pub const HISTORY_LIMIT: usize = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    Initial,
    Building,
    Stable,
    Close,
    Drifting,
}

impl std::fmt::Display for RelationshipStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelationshipStage::Initial => write!(f, "initial"),
            RelationshipStage::Building => write!(f, "building"),
            RelationshipStage::Stable => write!(f, "stable"),
            RelationshipStage::Close => write!(f, "close"),
            RelationshipStage::Drifting => write!(f, "drifting"),
        }
    }
}

impl RelationshipStage {
    /// Position on the initial → close ladder. Drifting sits outside it.
    fn rank(self) -> Option<u8> {
        match self {
            RelationshipStage::Initial => Some(0),
            RelationshipStage::Building => Some(1),
            RelationshipStage::Stable => Some(2),
            RelationshipStage::Close => Some(3),
            RelationshipStage::Drifting => None,
        }
    }

    /// Stage implied by the score alone.
    pub fn bucket(intimacy: i32, thresholds: &StageThresholds) -> RelationshipStage {
        if intimacy >= thresholds.close {
            RelationshipStage::Close
        } else if intimacy >= thresholds.stable {
            RelationshipStage::Stable
        } else if intimacy >= thresholds.building {
            RelationshipStage::Building
        } else {
            RelationshipStage::Initial
        }
    }

    /// Derives the next stage. Pure: identical inputs give identical stages.
    ///
    /// Rising follows the thresholds directly. Falling keeps the previous
    /// stage until the score is more than `hysteresis` below its entry
    /// threshold. A long silence overrides both and yields `Drifting`.
    pub fn derive(
        previous: RelationshipStage,
        intimacy: i32,
        days_idle: i64,
        thresholds: &StageThresholds,
    ) -> RelationshipStage {
        if days_idle >= thresholds.drift_after_days {
            return RelationshipStage::Drifting;
        }

        let raw = Self::bucket(intimacy, thresholds);
        let previous_rank = match previous.rank() {
            Some(rank) => rank,
            None => return raw,
        };
        let raw_rank = raw.rank().unwrap_or(0);
        if raw_rank >= previous_rank {
            return raw;
        }

        let held = Self::bucket(intimacy.saturating_add(thresholds.hysteresis), thresholds);
        if held.rank().unwrap_or(0) >= previous_rank {
            previous
        } else {
            held
        }
    }
}

/// Stage entry scores plus the hysteresis band and the drift window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageThresholds {
    pub building: i32,
    pub stable: i32,
    pub close: i32,
    pub hysteresis: i32,
    pub drift_after_days: i64,
}

impl Default for StageThresholds {
    fn default() -> Self {
        StageThresholds {
            building: 20,
            stable: 40,
            close: 60,
            hysteresis: 5,
            drift_after_days: 30,
        }
    }
}

impl StageThresholds {
    pub fn validate(&self) -> Result<()> {
        let ordered = 0 < self.building && self.building < self.stable && self.stable < self.close;
        if !ordered || self.close > MAX_INTIMACY {
            return Err(RelioError::Config(format!(
                "stage thresholds must satisfy 0 < building < stable < close <= {}",
                MAX_INTIMACY
            )));
        }
        if self.hysteresis < 0 || self.drift_after_days < 1 {
            return Err(RelioError::Config(
                "hysteresis must be >= 0 and drift_after_days >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Finer display label for a raw intimacy score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntimacyLevel {
    Stranger,
    Acquaintance,
    Friend,
    CloseFriend,
    VeryClose,
    Intimate,
}

impl IntimacyLevel {
    pub fn from_score(score: i32) -> Self {
        match clamp_intimacy(score) {
            s if s >= 90 => IntimacyLevel::Intimate,
            s if s >= 75 => IntimacyLevel::VeryClose,
            s if s >= 60 => IntimacyLevel::CloseFriend,
            s if s >= 40 => IntimacyLevel::Friend,
            s if s >= 20 => IntimacyLevel::Acquaintance,
            _ => IntimacyLevel::Stranger,
        }
    }
}

impl std::fmt::Display for IntimacyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntimacyLevel::Stranger => write!(f, "stranger"),
            IntimacyLevel::Acquaintance => write!(f, "acquaintance"),
            IntimacyLevel::Friend => write!(f, "friend"),
            IntimacyLevel::CloseFriend => write!(f, "close friend"),
            IntimacyLevel::VeryClose => write!(f, "very close"),
            IntimacyLevel::Intimate => write!(f, "intimate"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageChange {
    pub at: DateTime<Utc>,
    pub stage: RelationshipStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntimacyRecord {
    pub timestamp: DateTime<Utc>,
    pub score: i32,
    pub change: i32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipState {
    pub contact_id: String,
    pub intimacy: i32,
    pub stage: RelationshipStage,
    #[serde(default)]
    pub interaction_count: u32,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_interaction_date: Option<NaiveDate>,
    #[serde(default)]
    pub stage_history: Vec<StageChange>,
    #[serde(default)]
    pub closeness: f64,
    #[serde(default = "default_trust")]
    pub trust_level: f64,
    #[serde(default)]
    pub interaction_frequency: f64,
    #[serde(default = "default_acceptance")]
    pub acceptance_rate: f64,
    #[serde(default)]
    pub rejection_count: u32,
    #[serde(default)]
    pub strategy_weights: BTreeMap<ReplyStrategy, f64>,
    /// Inactivity decay already taken since the last interaction.
    #[serde(default)]
    pub decay_applied: i32,
    /// Day the weekly rejection counter was last settled.
    #[serde(default)]
    pub rejections_settled_on: Option<NaiveDate>,
    #[serde(default)]
    pub intimacy_history: Vec<IntimacyRecord>,
    pub updated_at: DateTime<Utc>,
}

fn default_trust() -> f64 {
    0.5
}

fn default_acceptance() -> f64 {
    1.0
}

impl RelationshipState {
    pub fn new(contact_id: &str, base_intimacy: i32, thresholds: &StageThresholds) -> Self {
        let now = Utc::now();
        let intimacy = clamp_intimacy(base_intimacy);
        let stage = RelationshipStage::bucket(intimacy, thresholds);

        RelationshipState {
            contact_id: contact_id.to_string(),
            intimacy,
            stage,
            interaction_count: 0,
            last_interaction: None,
            last_interaction_date: None,
            stage_history: vec![StageChange { at: now, stage }],
            closeness: intimacy as f64 / MAX_INTIMACY as f64,
            trust_level: default_trust(),
            interaction_frequency: 0.0,
            acceptance_rate: default_acceptance(),
            rejection_count: 0,
            strategy_weights: BTreeMap::new(),
            decay_applied: 0,
            rejections_settled_on: None,
            intimacy_history: Vec::new(),
            updated_at: now,
        }
    }

    pub fn days_idle(&self, today: NaiveDate) -> i64 {
        self.last_interaction_date
            .map(|last| (today - last).num_days().max(0))
            .unwrap_or(0)
    }

    pub fn level(&self) -> IntimacyLevel {
        IntimacyLevel::from_score(self.intimacy)
    }

    /// Learned weight of a strategy; unrated strategies weigh 1.0.
    pub fn strategy_weight(&self, strategy: ReplyStrategy) -> f64 {
        self.strategy_weights.get(&strategy).copied().unwrap_or(1.0)
    }

    fn refresh_stage(&mut self, today: NaiveDate, thresholds: &StageThresholds) -> bool {
        let next = RelationshipStage::derive(self.stage, self.intimacy, self.days_idle(today), thresholds);
        if next == self.stage {
            return false;
        }
        let now = Utc::now();
        self.stage = next;
        self.stage_history.push(StageChange { at: now, stage: next });
        self.updated_at = now;
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipStats {
    pub total: usize,
    pub active: usize,
    pub drifting: usize,
    pub avg_intimacy: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipTracker {
    states: HashMap<String, RelationshipState>,
    thresholds: StageThresholds,
}

impl RelationshipTracker {
    pub fn new(thresholds: StageThresholds) -> Self {
        RelationshipTracker {
            states: HashMap::new(),
            thresholds,
        }
    }

    pub fn from_states(states: HashMap<String, RelationshipState>, thresholds: StageThresholds) -> Self {
        RelationshipTracker { states, thresholds }
    }

    pub fn thresholds(&self) -> &StageThresholds {
        &self.thresholds
    }

    pub fn get(&self, contact_id: &str) -> Option<&RelationshipState> {
        self.states.get(contact_id)
    }

    pub fn get_mut(&mut self, contact_id: &str) -> Option<&mut RelationshipState> {
        self.states.get_mut(contact_id)
    }

    pub fn get_or_create(&mut self, contact_id: &str, base_intimacy: i32) -> &mut RelationshipState {
        let thresholds = self.thresholds;
        self.states
            .entry(contact_id.to_string())
            .or_insert_with(|| RelationshipState::new(contact_id, base_intimacy, &thresholds))
    }

    fn state_mut(&mut self, contact_id: &str) -> Result<&mut RelationshipState> {
        self.states
            .get_mut(contact_id)
            .ok_or_else(|| RelioError::ContactNotFound(contact_id.to_string()))
    }

    /// Sets a new score and appends a history record. A record with the
    /// same `round_id` replaces the earlier one so a round is scored once.
    /// Returns the applied change.
    pub fn set_intimacy(
        &mut self,
        contact_id: &str,
        score: i32,
        reason: &str,
        round_id: Option<&str>,
        today: NaiveDate,
    ) -> Result<i32> {
        let thresholds = self.thresholds;
        let state = self.state_mut(contact_id)?;

        let new_score = clamp_intimacy(score);
        let change = new_score - state.intimacy;
        let now = Utc::now();

        if let Some(round) = round_id {
            state
                .intimacy_history
                .retain(|record| record.round_id.as_deref() != Some(round));
        }
        state.intimacy_history.push(IntimacyRecord {
            timestamp: now,
            score: new_score,
            change,
            reason: reason.to_string(),
            round_id: round_id.map(str::to_string),
        });
        if state.intimacy_history.len() > HISTORY_LIMIT {
            let excess = state.intimacy_history.len() - HISTORY_LIMIT;
            state.intimacy_history.drain(..excess);
        }

        state.intimacy = new_score;
        state.closeness = new_score as f64 / MAX_INTIMACY as f64;
        state.updated_at = now;
        if state.refresh_stage(today, &thresholds) {
            tracing::info!(contact = contact_id, stage = %state.stage, "relationship stage changed");
        }

        Ok(change)
    }

    pub fn record_interaction(&mut self, contact_id: &str, today: NaiveDate) -> Result<&RelationshipState> {
        let thresholds = self.thresholds;
        let state = self.state_mut(contact_id)?;

        let idle = state.days_idle(today);
        let observed = if state.last_interaction_date.is_none() {
            1.0
        } else {
            1.0 / (1.0 + idle as f64)
        };
        state.interaction_frequency = (state.interaction_frequency * 0.8 + observed * 0.2).clamp(0.0, 1.0);
        state.interaction_count += 1;
        state.last_interaction = Some(Utc::now());
        state.last_interaction_date = Some(today);
        state.decay_applied = 0;
        state.updated_at = Utc::now();
        state.refresh_stage(today, &thresholds);

        Ok(state)
    }

    /// Re-evaluates the stage without touching the score, e.g. to mark drift.
    pub fn refresh_stage(&mut self, contact_id: &str, today: NaiveDate) -> Result<RelationshipStage> {
        let thresholds = self.thresholds;
        let state = self.state_mut(contact_id)?;
        state.refresh_stage(today, &thresholds);
        Ok(state.stage)
    }

    pub fn update_metrics(
        &mut self,
        contact_id: &str,
        closeness: Option<f64>,
        trust_level: Option<f64>,
        interaction_frequency: Option<f64>,
    ) -> Result<&RelationshipState> {
        let state = self.state_mut(contact_id)?;
        if let Some(v) = closeness {
            state.closeness = v.clamp(0.0, 1.0);
        }
        if let Some(v) = trust_level {
            state.trust_level = v.clamp(0.0, 1.0);
        }
        if let Some(v) = interaction_frequency {
            state.interaction_frequency = v.clamp(0.0, 1.0);
        }
        state.updated_at = Utc::now();
        Ok(state)
    }

    pub fn timeline(&self, contact_id: &str) -> Vec<StageChange> {
        self.states
            .get(contact_id)
            .map(|s| s.stage_history.clone())
            .unwrap_or_default()
    }

    pub fn contact_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove(&mut self, contact_id: &str) -> Option<RelationshipState> {
        self.states.remove(contact_id)
    }

    pub fn as_map(&self) -> &HashMap<String, RelationshipState> {
        &self.states
    }

    pub fn stats(&self) -> RelationshipStats {
        let total = self.states.len();
        let active = self.states.values().filter(|s| s.interaction_count > 0).count();
        let drifting = self
            .states
            .values()
            .filter(|s| s.stage == RelationshipStage::Drifting)
            .count();
        let avg_intimacy = if total > 0 {
            self.states.values().map(|s| s.intimacy as f64).sum::<f64>() / total as f64
        } else {
            0.0
        };

        RelationshipStats {
            total,
            active,
            drifting,
            avg_intimacy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_bucket_thresholds() {
        let t = StageThresholds::default();
        assert_eq!(RelationshipStage::bucket(0, &t), RelationshipStage::Initial);
        assert_eq!(RelationshipStage::bucket(20, &t), RelationshipStage::Building);
        assert_eq!(RelationshipStage::bucket(59, &t), RelationshipStage::Stable);
        assert_eq!(RelationshipStage::bucket(100, &t), RelationshipStage::Close);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let t = StageThresholds::default();
        for score in 0..=100 {
            for prev in [
                RelationshipStage::Initial,
                RelationshipStage::Building,
                RelationshipStage::Stable,
                RelationshipStage::Close,
                RelationshipStage::Drifting,
            ] {
                let a = RelationshipStage::derive(prev, score, 3, &t);
                let b = RelationshipStage::derive(prev, score, 3, &t);
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_derive_hysteresis_on_the_way_down() {
        let t = StageThresholds::default();
        // Close starts at 60; the band holds it down to 55.
        assert_eq!(RelationshipStage::derive(RelationshipStage::Close, 57, 0, &t), RelationshipStage::Close);
        assert_eq!(RelationshipStage::derive(RelationshipStage::Close, 55, 0, &t), RelationshipStage::Close);
        assert_eq!(RelationshipStage::derive(RelationshipStage::Close, 54, 0, &t), RelationshipStage::Stable);
        // A large fall skips levels.
        assert_eq!(RelationshipStage::derive(RelationshipStage::Close, 10, 0, &t), RelationshipStage::Initial);
        // Rising has no band.
        assert_eq!(RelationshipStage::derive(RelationshipStage::Stable, 60, 0, &t), RelationshipStage::Close);
    }

    #[test]
    fn test_derive_drifting_after_silence() {
        let t = StageThresholds::default();
        assert_eq!(RelationshipStage::derive(RelationshipStage::Close, 80, 30, &t), RelationshipStage::Drifting);
        assert_eq!(RelationshipStage::derive(RelationshipStage::Drifting, 80, 0, &t), RelationshipStage::Close);
    }

    #[test]
    fn test_set_intimacy_clamps_and_replaces_round() {
        let mut tracker = RelationshipTracker::new(StageThresholds::default());
        tracker.get_or_create("c1", 25);
        let today = day("2026-03-01");

        tracker.set_intimacy("c1", 27, "like", Some("r1"), today).unwrap();
        tracker.set_intimacy("c1", 24, "dislike", Some("r1"), today).unwrap();
        tracker.set_intimacy("c1", 500, "boost", None, today).unwrap();

        let state = tracker.get("c1").unwrap();
        assert_eq!(state.intimacy, 100);
        assert_eq!(state.intimacy_history.len(), 2);
        assert_eq!(state.intimacy_history[0].reason, "dislike");
        assert_eq!(state.stage, RelationshipStage::Close);
    }

    #[test]
    fn test_record_interaction_updates_counters() {
        let mut tracker = RelationshipTracker::new(StageThresholds::default());
        tracker.get_or_create("c1", 10);

        let state = tracker.record_interaction("c1", day("2026-03-01")).unwrap();
        assert_eq!(state.interaction_count, 1);
        assert_eq!(state.last_interaction_date, Some(day("2026-03-01")));
        assert!(state.interaction_frequency > 0.0);
    }

    #[test]
    fn test_thresholds_validate() {
        assert!(StageThresholds::default().validate().is_ok());
        let bad = StageThresholds { stable: 10, ..Default::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_intimacy_level_labels() {
        assert_eq!(IntimacyLevel::from_score(5), IntimacyLevel::Stranger);
        assert_eq!(IntimacyLevel::from_score(74), IntimacyLevel::CloseFriend);
        assert_eq!(IntimacyLevel::from_score(95), IntimacyLevel::Intimate);
    }

    #[test]
    fn test_update_metrics_clamps() {
        let mut tracker = RelationshipTracker::new(StageThresholds::default());
        tracker.get_or_create("c1", 30);

        let state = tracker.update_metrics("c1", Some(1.4), Some(-0.2), None).unwrap();
        assert_eq!(state.closeness, 1.0);
        assert_eq!(state.trust_level, 0.0);
        assert_eq!(state.interaction_frequency, 0.0);
        assert!(tracker.update_metrics("missing", None, Some(0.5), None).is_err());
    }
}
