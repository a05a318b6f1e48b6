use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::error::{RelioError, Result};
use crate::core::profile::RelationshipType;

pub const MIN_INTIMACY: i32 = 0;
pub const MAX_INTIMACY: i32 = 100;

/// Growth is capped per accepted suggestion.
const MAX_GROWTH: i32 = 15;
/// No growth after this many idle days.
const GROWTH_IDLE_LIMIT: i64 = 30;
/// Days without contact before decay starts.
const DECAY_GRACE_DAYS: i64 = 7;

pub fn clamp_intimacy(score: i32) -> i32 {
    score.clamp(MIN_INTIMACY, MAX_INTIMACY)
}

/// Tunable weights for intimacy growth, decay and feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntimacyWeights {
    pub decay_7_14: f64,
    pub decay_14_30: f64,
    pub decay_30_90: f64,
    pub decay_90_plus: f64,
    pub like_weight: i32,
    pub dislike_weight: i32,
    pub acceptance_delta: f64,
    pub rejection_delta: f64,
    pub base_intimacy: BTreeMap<RelationshipType, i32>,
}

impl Default for IntimacyWeights {
    fn default() -> Self {
        let base_intimacy = BTreeMap::from([
            (RelationshipType::Family, 35),
            (RelationshipType::Partner, 45),
            (RelationshipType::CloseFriend, 30),
            (RelationshipType::Friend, 25),
            (RelationshipType::Colleague, 20),
            (RelationshipType::Acquaintance, 15),
            (RelationshipType::Stranger, 10),
        ]);

        IntimacyWeights {
            decay_7_14: 0.1,
            decay_14_30: 0.15,
            decay_30_90: 0.2,
            decay_90_plus: 0.3,
            like_weight: 2,
            dislike_weight: 1,
            acceptance_delta: 0.05,
            rejection_delta: 0.05,
            base_intimacy,
        }
    }
}

impl IntimacyWeights {
    pub fn validate(&self) -> Result<()> {
        let rates = [self.decay_7_14, self.decay_14_30, self.decay_30_90, self.decay_90_plus];
        if rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(RelioError::Config("decay rates must be non-negative".to_string()));
        }
        if self.like_weight < 0 || self.dislike_weight < 0 {
            return Err(RelioError::Config("feedback weights must be non-negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.acceptance_delta) || !(0.0..=1.0).contains(&self.rejection_delta) {
            return Err(RelioError::Config("acceptance deltas must be within [0, 1]".to_string()));
        }
        if let Some((kind, value)) = self
            .base_intimacy
            .iter()
            .find(|(_, v)| !(MIN_INTIMACY..=MAX_INTIMACY).contains(*v))
        {
            return Err(RelioError::Config(format!(
                "base intimacy for {} out of range: {}",
                kind, value
            )));
        }
        Ok(())
    }
}

/// Features of an incoming message that affect growth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageQuality {
    pub length: usize,
    pub has_question: bool,
    pub has_thanks: bool,
    pub has_empathy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntimacyChange {
    pub score: i32,
    pub delta: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IntimacyManager {
    weights: IntimacyWeights,
}

impl IntimacyManager {
    pub fn new(weights: IntimacyWeights) -> Self {
        IntimacyManager { weights }
    }

    pub fn weights(&self) -> &IntimacyWeights {
        &self.weights
    }

    pub fn base_intimacy(&self, relationship_type: RelationshipType) -> i32 {
        self.weights
            .base_intimacy
            .get(&relationship_type)
            .copied()
            .map(clamp_intimacy)
            .unwrap_or(25)
    }

    /// Score lost to inactivity. Each phase is rounded up on its own so the
    /// total only depends on the number of idle days.
    pub fn decay_amount(&self, days_idle: i64) -> i32 {
        let w = &self.weights;
        let phase = |days: i64, rate: f64| ceil_steps(days, rate);

        if days_idle < DECAY_GRACE_DAYS {
            0
        } else if days_idle < 14 {
            phase(days_idle - 7, w.decay_7_14)
        } else if days_idle < 30 {
            phase(7, w.decay_7_14) + phase(days_idle - 14, w.decay_14_30)
        } else if days_idle < 90 {
            phase(7, w.decay_7_14) + phase(16, w.decay_14_30) + phase(days_idle - 30, w.decay_30_90)
        } else {
            phase(7, w.decay_7_14)
                + phase(16, w.decay_14_30)
                + phase(60, w.decay_30_90)
                + phase(days_idle - 90, w.decay_90_plus)
        }
    }

    /// Decay owed since the last interaction, minus what `already_applied`
    /// says was taken earlier in the same idle stretch. Never lowers a score
    /// below the stranger base and never raises one that already sits under it.
    pub fn decay(
        &self,
        current: i32,
        last_interaction: Option<NaiveDate>,
        already_applied: i32,
        today: NaiveDate,
    ) -> Option<IntimacyChange> {
        let last = last_interaction?;
        let days_idle = (today - last).num_days();
        let amount = self.decay_amount(days_idle) - already_applied.max(0);
        if amount <= 0 {
            return None;
        }

        let floor = self.base_intimacy(RelationshipType::Stranger);
        let score = (current - amount).max(floor).min(current);
        if score >= current {
            return None;
        }

        Some(IntimacyChange {
            score,
            delta: score - current,
            reason: format!("no contact for {} days", days_idle),
        })
    }

    /// Growth for a suggestion the user accepted.
    pub fn growth(
        &self,
        current: i32,
        quality: &MessageQuality,
        sentiment: f64,
        accepted: bool,
        days_since_last: i64,
    ) -> IntimacyChange {
        let current = clamp_intimacy(current);
        if !accepted {
            return IntimacyChange {
                score: current,
                delta: 0,
                reason: "suggestion not accepted".to_string(),
            };
        }
        if days_since_last > GROWTH_IDLE_LIMIT {
            return IntimacyChange {
                score: current,
                delta: 0,
                reason: "growth paused after a long silence".to_string(),
            };
        }

        let depth_multiplier = match quality.length {
            l if l > 200 => 1.3,
            l if l > 100 => 1.2,
            l if l > 50 => 1.1,
            _ => 1.0,
        };
        let sentiment_bonus = if sentiment >= 0.3 {
            2.0
        } else if sentiment >= 0.0 {
            1.0
        } else if sentiment >= -0.3 {
            0.0
        } else {
            -2.0
        };
        let quality_bonus = [quality.has_question, quality.has_thanks, quality.has_empathy]
            .iter()
            .filter(|flag| **flag)
            .count() as f64;
        let frequency_multiplier = match days_since_last {
            d if d <= 3 => 1.0,
            d if d <= 7 => 0.95,
            d if d <= 14 => 0.90,
            _ => 0.80,
        };

        let raw = (2.0 * depth_multiplier + sentiment_bonus + quality_bonus) * frequency_multiplier;
        let growth = (raw.round() as i32).clamp(1, MAX_GROWTH);
        let score = clamp_intimacy(current + growth);

        IntimacyChange {
            score,
            delta: score - current,
            reason: format!("accepted suggestion (+{})", growth),
        }
    }

    /// Penalty for the suggestions rejected since the last weekly reset.
    pub fn rejection_penalty(&self, current: i32, rejection_count: u32) -> Option<IntimacyChange> {
        if rejection_count == 0 {
            return None;
        }
        let mut penalty = rejection_count as i32 * 2;
        if rejection_count > 3 {
            penalty += 2;
        }
        let score = clamp_intimacy(current - penalty);

        Some(IntimacyChange {
            score,
            delta: score - current,
            reason: format!("{} rejected suggestions (-{})", rejection_count, penalty),
        })
    }

    /// Score for a feedback round relative to the score at round start.
    /// Likes only ever add and dislikes only ever subtract.
    pub fn feedback_score(&self, base: i32, has_like: bool, has_dislike: bool) -> IntimacyChange {
        let base = clamp_intimacy(base);
        let mut delta = 0;
        let mut reasons = Vec::new();

        if has_like {
            delta += self.weights.like_weight;
            reasons.push(format!("liked a suggestion (+{})", self.weights.like_weight));
        }
        if has_dislike {
            delta -= self.weights.dislike_weight;
            reasons.push(format!("disliked a suggestion (-{})", self.weights.dislike_weight));
        }

        let score = clamp_intimacy(base + delta);
        let reason = if reasons.is_empty() {
            "feedback cleared".to_string()
        } else {
            reasons.join(" & ")
        };

        IntimacyChange {
            score,
            delta: score - base,
            reason,
        }
    }

    pub fn interaction_status(last_interaction: Option<NaiveDate>, today: NaiveDate) -> String {
        let last = match last_interaction {
            Some(last) => last,
            None => return "never".to_string(),
        };

        match (today - last).num_days() {
            d if d <= 0 => "today".to_string(),
            1 => "yesterday".to_string(),
            d if d < 7 => format!("{} days ago", d),
            d if d < 30 => format!("{} weeks ago", d / 7),
            d => format!("{} months ago", d / 30),
        }
    }
}

fn ceil_steps(days: i64, rate: f64) -> i32 {
    if days <= 0 || rate <= 0.0 {
        return 0;
    }
    // Absorb binary float noise such as 10 * 0.3 = 3.0000000000000004.
    (days as f64 * rate - 1e-9).ceil().max(0.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn manager() -> IntimacyManager {
        IntimacyManager::default()
    }

    #[test]
    fn test_base_intimacy_by_type() {
        assert_eq!(manager().base_intimacy(RelationshipType::Partner), 45);
        assert_eq!(manager().base_intimacy(RelationshipType::Stranger), 10);
    }

    #[test]
    fn test_decay_amount_phases() {
        let m = manager();
        assert_eq!(m.decay_amount(6), 0);
        assert_eq!(m.decay_amount(10), 1);
        assert_eq!(m.decay_amount(20), 2);
        assert_eq!(m.decay_amount(100), 1 + 3 + 12 + 3);
    }

    #[test]
    fn test_decay_respects_floor() {
        let m = manager();
        let change = m.decay(12, Some(day("2025-01-01")), 0, day("2026-01-01")).unwrap();
        assert_eq!(change.score, 10);

        // Already under the floor: left alone.
        assert!(m.decay(5, Some(day("2025-01-01")), 0, day("2026-01-01")).is_none());
        assert!(m.decay(50, None, 0, day("2026-01-01")).is_none());
    }

    #[test]
    fn test_decay_is_not_taken_twice() {
        let m = manager();
        let last = Some(day("2026-01-01"));
        // 20 idle days owe 2 points
        let first = m.decay(40, last, 0, day("2026-01-21")).unwrap();
        assert_eq!(first.delta, -2);
        assert!(m.decay(first.score, last, 2, day("2026-01-21")).is_none());
        // 30 idle days owe 4 in total
        assert_eq!(m.decay(first.score, last, 2, day("2026-01-31")).unwrap().delta, -2);
    }

    #[test]
    fn test_growth_formula() {
        let quality = MessageQuality { length: 120, has_question: true, has_thanks: true, has_empathy: false };
        let change = manager().growth(30, &quality, 0.5, true, 0);
        // (2 * 1.2 + 2 + 2) * 1.0 = 6.4
        assert_eq!(change.score, 36);
        assert_eq!(change.delta, 6);
    }

    #[test]
    fn test_growth_requires_acceptance_and_recent_contact() {
        let quality = MessageQuality::default();
        assert_eq!(manager().growth(30, &quality, 1.0, false, 0).delta, 0);
        assert_eq!(manager().growth(30, &quality, 1.0, true, 31).delta, 0);
        // Negative sentiment still grows by at least one.
        assert_eq!(manager().growth(30, &quality, -1.0, true, 0).delta, 1);
        assert_eq!(manager().growth(99, &quality, 1.0, true, 0).score, 100);
    }

    #[test]
    fn test_rejection_penalty() {
        assert!(manager().rejection_penalty(50, 0).is_none());
        assert_eq!(manager().rejection_penalty(50, 2).unwrap().score, 46);
        assert_eq!(manager().rejection_penalty(50, 4).unwrap().score, 40);
        assert_eq!(manager().rejection_penalty(3, 10).unwrap().score, 0);
    }

    #[test]
    fn test_feedback_score_directions() {
        let m = manager();
        assert_eq!(m.feedback_score(40, true, false).score, 42);
        assert_eq!(m.feedback_score(40, false, true).score, 39);
        assert_eq!(m.feedback_score(40, true, true).score, 41);
        assert_eq!(m.feedback_score(40, false, false).score, 40);
        assert_eq!(m.feedback_score(100, true, false).score, 100);
        assert_eq!(m.feedback_score(0, false, true).score, 0);
    }

    #[test]
    fn test_interaction_status() {
        let today = day("2026-03-31");
        assert_eq!(IntimacyManager::interaction_status(None, today), "never");
        assert_eq!(IntimacyManager::interaction_status(Some(day("2026-03-31")), today), "today");
        assert_eq!(IntimacyManager::interaction_status(Some(day("2026-03-30")), today), "yesterday");
        assert_eq!(IntimacyManager::interaction_status(Some(day("2026-03-17")), today), "2 weeks ago");
        assert_eq!(IntimacyManager::interaction_status(Some(day("2025-12-31")), today), "3 months ago");
    }

    #[test]
    fn test_weights_validate() {
        assert!(IntimacyWeights::default().validate().is_ok());
        let bad = IntimacyWeights { like_weight: -1, ..Default::default() };
        assert!(bad.validate().is_err());
    }
}
