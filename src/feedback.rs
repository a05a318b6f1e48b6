use chrono::NaiveDate;
use serde::Serialize;

use crate::core::error::{RelioError, Result};
use crate::core::history::{ConversationTurn, Feedback};
use crate::core::intimacy::{IntimacyChange, IntimacyManager, MessageQuality};
use crate::core::profile::ReplyStrategy;
use crate::core::relationship::RelationshipTracker;

const STRATEGY_STEP: f64 = 0.1;
const MAX_STRATEGY_WEIGHT: f64 = 2.0;
const TRUST_STEP: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackOutcome {
    pub intimacy: i32,
    pub change: i32,
    pub reason: String,
    pub acceptance_rate: f64,
    pub rejection_count: u32,
    pub trust_level: f64,
    pub strategy: ReplyStrategy,
    pub strategy_weight: f64,
}

/// How one feedback value moves the per-contact counters.
#[derive(Debug, Clone, Copy, Default)]
struct Step {
    acceptance: f64,
    rejections: i64,
    trust: f64,
    weight: f64,
}

fn suggestion_index(turn: &ConversationTurn, index: usize) -> Result<usize> {
    if index < turn.suggestions.len() {
        Ok(index)
    } else {
        Err(RelioError::InvalidInput(format!(
            "turn {} has {} suggestions, no index {}",
            turn.id,
            turn.suggestions.len(),
            index
        )))
    }
}

/// Turns user reactions to suggestions into relationship changes.
#[derive(Debug, Clone, Default)]
pub struct FeedbackManager {
    intimacy: IntimacyManager,
}

impl FeedbackManager {
    pub fn new(intimacy: IntimacyManager) -> Self {
        FeedbackManager { intimacy }
    }

    pub fn intimacy(&self) -> &IntimacyManager {
        &self.intimacy
    }

    fn step(&self, feedback: Option<Feedback>) -> Step {
        let weights = self.intimacy.weights();
        match feedback {
            Some(Feedback::Like) => Step {
                acceptance: weights.acceptance_delta,
                rejections: -1,
                trust: TRUST_STEP,
                weight: STRATEGY_STEP,
            },
            Some(Feedback::Dislike) => Step {
                acceptance: -weights.rejection_delta,
                rejections: 1,
                trust: -TRUST_STEP,
                weight: -STRATEGY_STEP,
            },
            None => Step::default(),
        }
    }

    /// Sets (or clears, with `None`) the feedback on one suggestion.
    ///
    /// Intimacy is scored per turn against the score the turn started with,
    /// so flipping feedback back and forth never accumulates. The counters
    /// (acceptance, rejections, trust and strategy weight) move on every
    /// change, with the previous feedback undone first. Returns `None` when
    /// nothing changed.
    pub fn apply(
        &self,
        tracker: &mut RelationshipTracker,
        turn: &mut ConversationTurn,
        index: usize,
        feedback: Option<Feedback>,
        today: NaiveDate,
    ) -> Result<Option<FeedbackOutcome>> {
        let index = suggestion_index(turn, index)?;
        let previous = turn.suggestions[index].feedback;
        if previous == feedback {
            return Ok(None);
        }
        if tracker.get(&turn.contact_id).is_none() {
            return Err(RelioError::ContactNotFound(turn.contact_id.clone()));
        }

        turn.suggestions[index].feedback = feedback;
        let strategy = turn.suggestions[index].strategy;

        let scored = self.intimacy.feedback_score(
            turn.base_intimacy,
            turn.has_feedback(Feedback::Like),
            turn.has_feedback(Feedback::Dislike),
        );
        let change = tracker.set_intimacy(&turn.contact_id, scored.score, &scored.reason, Some(&turn.id), today)?;

        let undo = self.step(previous);
        let redo = self.step(feedback);

        let trust = tracker
            .get(&turn.contact_id)
            .map(|s| s.trust_level - undo.trust + redo.trust)
            .ok_or_else(|| RelioError::ContactNotFound(turn.contact_id.clone()))?;
        tracker.update_metrics(&turn.contact_id, None, Some(trust), None)?;

        let state = tracker
            .get_mut(&turn.contact_id)
            .ok_or_else(|| RelioError::ContactNotFound(turn.contact_id.clone()))?;
        state.acceptance_rate = (state.acceptance_rate - undo.acceptance + redo.acceptance).clamp(0.0, 1.0);
        state.rejection_count = (state.rejection_count as i64 - undo.rejections + redo.rejections).max(0) as u32;
        let strategy_weight =
            (state.strategy_weight(strategy) - undo.weight + redo.weight).clamp(0.0, MAX_STRATEGY_WEIGHT);
        state.strategy_weights.insert(strategy, strategy_weight);

        tracing::info!(
            contact = %turn.contact_id,
            turn = %turn.id,
            intimacy = state.intimacy,
            change,
            "feedback applied"
        );

        Ok(Some(FeedbackOutcome {
            intimacy: state.intimacy,
            change,
            reason: scored.reason,
            acceptance_rate: state.acceptance_rate,
            rejection_count: state.rejection_count,
            trust_level: state.trust_level,
            strategy,
            strategy_weight,
        }))
    }

    /// Marks a suggestion as the one that was sent. Growth is granted once
    /// per turn; choosing a different suggestion later only moves the choice.
    pub fn accept(
        &self,
        tracker: &mut RelationshipTracker,
        turn: &mut ConversationTurn,
        index: usize,
        quality: &MessageQuality,
        days_since_last: i64,
        today: NaiveDate,
    ) -> Result<IntimacyChange> {
        let index = suggestion_index(turn, index)?;
        let current = tracker
            .get(&turn.contact_id)
            .map(|s| s.intimacy)
            .ok_or_else(|| RelioError::ContactNotFound(turn.contact_id.clone()))?;

        let first_choice = turn.chosen.is_none();
        turn.chosen = Some(index);
        if !first_choice {
            return Ok(IntimacyChange {
                score: current,
                delta: 0,
                reason: "choice changed".to_string(),
            });
        }

        let trust = tracker
            .get(&turn.contact_id)
            .map(|s| s.trust_level + TRUST_STEP)
            .unwrap_or(TRUST_STEP);
        tracker.update_metrics(&turn.contact_id, None, Some(trust), None)?;

        let growth = self
            .intimacy
            .growth(current, quality, turn.sentiment, true, days_since_last);
        if growth.delta != 0 {
            let round = format!("{}:accept", turn.id);
            tracker.set_intimacy(&turn.contact_id, growth.score, &growth.reason, Some(&round), today)?;
            // later feedback on this turn is scored on top of the growth
            turn.base_intimacy += growth.delta;
        }

        Ok(growth)
    }
}
