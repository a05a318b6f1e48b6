use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::analysis::{DialogueAnalysis, Intent, InteractionScore};
use crate::core::history::{ChatMessage, Suggestion};
use crate::core::memory::ReplyMemorySummary;
use crate::core::profile::{ContactProfile, ReplyStrategy, StyleParams};
use crate::core::relationship::RelationshipState;
use crate::llm::{ChatModel, ChatOptions, LlmError};

pub const ALTERNATIVE_COUNT: usize = 2;
/// Below this learned weight the preferred strategy gives way to the best-rated one.
const WEAK_STRATEGY_WEIGHT: f64 = 0.5;

/// Everything the engine knows about the message being answered.
pub struct ReplyContext<'a> {
    pub profile: &'a ContactProfile,
    pub state: &'a RelationshipState,
    pub analysis: &'a DialogueAnalysis,
    pub score: InteractionScore,
    pub memory: &'a ReplyMemorySummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyRecommendation {
    pub id: String,
    pub contact_id: String,
    pub strategy: ReplyStrategy,
    pub confidence: f64,
    pub matching_score: f64,
    pub intent: Intent,
    pub suggestions: Vec<Suggestion>,
    pub generated_at: DateTime<Utc>,
}

impl ReplyRecommendation {
    pub fn primary(&self) -> Option<&Suggestion> {
        self.suggestions.first()
    }
}

/// Primary reply plus alternatives as read from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub primary: String,
    pub alternatives: Vec<String>,
}

pub fn select_strategy(style: &StyleParams, state: &RelationshipState) -> ReplyStrategy {
    let preferred = if style.formality > 0.7 {
        ReplyStrategy::Formal
    } else if style.formality > 0.55 {
        ReplyStrategy::Professional
    } else if style.expressiveness > 0.7 {
        ReplyStrategy::Warm
    } else if style.humor > 0.6 {
        ReplyStrategy::Humorous
    } else {
        ReplyStrategy::Casual
    };

    if state.strategy_weight(preferred) >= WEAK_STRATEGY_WEIGHT {
        return preferred;
    }

    let mut best = ReplyStrategy::ALL[0];
    for strategy in ReplyStrategy::ALL {
        if state.strategy_weight(strategy) > state.strategy_weight(best) {
            best = strategy;
        }
    }
    best
}

/// Strategies for the alternatives: the others, in declaration order.
pub fn alternative_strategies(primary: ReplyStrategy) -> Vec<ReplyStrategy> {
    ReplyStrategy::ALL
        .into_iter()
        .filter(|s| *s != primary)
        .take(ALTERNATIVE_COUNT)
        .collect()
}

fn describe_style(style: &StyleParams) -> Vec<&'static str> {
    let mut lines = Vec::new();

    lines.push(if style.formality > 0.7 {
        "They write formally and expect proper wording."
    } else if style.formality < 0.3 {
        "They write casually and colloquially."
    } else {
        "Their tone sits between formal and casual."
    });
    if style.proactivity > 0.7 {
        lines.push("Reply actively and keep the conversation going.");
    } else if style.proactivity < 0.3 {
        lines.push("Keep replies reactive and brief.");
    }
    if style.expressiveness > 0.7 {
        lines.push("They are warm and open about feelings.");
    } else if style.expressiveness < 0.3 {
        lines.push("They are calm and reserved with emotion.");
    }
    if style.humor > 0.6 {
        lines.push("They enjoy jokes and playful remarks.");
    }
    if style.verbosity > 0.7 {
        lines.push("Detailed replies are welcome.");
    } else if style.verbosity < 0.3 {
        lines.push("Short and to-the-point replies work best.");
    }

    lines
}

fn sentiment_label(sentiment: f64) -> &'static str {
    if sentiment > 0.3 {
        "positive"
    } else if sentiment < -0.3 {
        "negative"
    } else {
        "neutral"
    }
}

fn bullet_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "{}:", title);
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
}

/// System prompt for one reply. Contains no clock or random input, so the
/// same context always yields the same text.
pub fn build_prompt(ctx: &ReplyContext<'_>, strategy: ReplyStrategy) -> String {
    let profile = ctx.profile;
    let state = ctx.state;
    let analysis = ctx.analysis;
    let mut out = String::new();

    out.push_str("You help the user answer chat messages. Suggest replies that fit the user's relationship with the contact.\n\n");

    out.push_str("## Contact\n");
    let _ = writeln!(out, "- Name: {}", profile.display_name());
    let _ = writeln!(out, "- Relationship: {}", profile.relationship_type);
    let _ = writeln!(out, "- Stage: {}", state.stage);
    let _ = writeln!(out, "- Intimacy: {}/100 ({})", state.intimacy, state.level());
    let _ = writeln!(out, "- Trust: {:.0}%", state.trust_level * 100.0);
    if !profile.style_tags.is_empty() {
        let _ = writeln!(out, "- Style tags: {}", profile.style_tags.join(", "));
    }
    if !profile.goals.is_empty() {
        let _ = writeln!(out, "- Goals with this contact: {}", profile.goals.join("; "));
    }
    if !profile.notes.trim().is_empty() {
        let _ = writeln!(out, "- Notes: {}", profile.notes.trim());
    }

    out.push_str("\n## Style\n");
    for line in describe_style(&profile.style) {
        let _ = writeln!(out, "- {}", line);
    }

    out.push_str("\n## Incoming message\n");
    let _ = writeln!(out, "- Intent: {}", analysis.intent);
    let _ = writeln!(out, "- Sentiment: {}", sentiment_label(analysis.sentiment));
    let keywords = if analysis.keywords.is_empty() {
        "none".to_string()
    } else {
        analysis.keywords.join(", ")
    };
    let _ = writeln!(out, "- Keywords: {}", keywords);

    if !ctx.memory.is_empty() {
        out.push_str("\n## What you remember\n");
        bullet_list(&mut out, "Facts", &ctx.memory.facts);
        bullet_list(&mut out, "Recent events", &ctx.memory.recent_events);
        bullet_list(&mut out, "Approaches that worked", &ctx.memory.effective_strategies);
        bullet_list(&mut out, "Approaches to avoid", &ctx.memory.avoid_strategies);
    }

    out.push_str("\n## Reply strategy\n");
    let _ = writeln!(out, "Primary reply: {} ({}).", strategy, strategy.describe());
    for (i, alt) in alternative_strategies(strategy).iter().enumerate() {
        let _ = writeln!(out, "Alternative {}: {} ({}).", i + 1, alt, alt.describe());
    }

    out.push_str(
        "\nKeep replies natural and suited to how close the two people are. \
         Answer with JSON only, in this shape:\n\
         {\"primary\": \"...\", \"alternatives\": [\"...\", \"...\"]}\n",
    );

    out
}

/// Removes `<think>...</think>` blocks some reasoning models emit.
pub fn strip_think(raw: &str) -> String {
    let mut text = raw.to_string();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => text.replace_range(start..start + "<think>".len(), ""),
        }
    }
    text.trim().to_string()
}

/// First balanced `{...}` in the text, skipping braces inside strings.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Finds a JSON object in model output: a fenced block first, then the
/// first balanced braces.
pub fn extract_json(raw: &str) -> Option<serde_json::Value> {
    let text = strip_think(raw);

    if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(body[..end].trim()) {
                if value.is_object() {
                    return Some(value);
                }
            }
        }
    }

    balanced_object(&text)
        .and_then(|candidate| serde_json::from_str::<serde_json::Value>(candidate).ok())
        .filter(|value| value.is_object())
}

fn first_string(value: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value[*k].as_str())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads the reply JSON; anything unreadable becomes a single raw suggestion.
pub fn parse_reply(raw: &str) -> Option<ParsedReply> {
    if let Some(value) = extract_json(raw) {
        if let Some(primary) = first_string(&value, &["primary", "reply", "suggested_reply"]) {
            let mut alternatives: Vec<String> = Vec::new();
            let list = ["alternatives", "alternative_replies"]
                .iter()
                .find_map(|k| value[*k].as_array());
            for item in list.into_iter().flatten() {
                let text = match item.as_str() {
                    Some(text) => text.trim(),
                    None => continue,
                };
                if text.is_empty() || text == primary || alternatives.iter().any(|a| a == text) {
                    continue;
                }
                alternatives.push(text.to_string());
            }
            alternatives.truncate(ALTERNATIVE_COUNT);
            return Some(ParsedReply { primary, alternatives });
        }
    }

    let text = strip_think(raw);
    if text.is_empty() {
        return None;
    }
    Some(ParsedReply {
        primary: text,
        alternatives: Vec::new(),
    })
}

#[derive(Clone)]
pub struct ReplyEngine {
    model: Arc<dyn ChatModel>,
    options: ChatOptions,
}

impl ReplyEngine {
    pub fn new(model: Arc<dyn ChatModel>, options: ChatOptions) -> Self {
        ReplyEngine { model, options }
    }

    /// Asks the model for replies to `ctx.analysis.message`, with `history`
    /// as earlier conversation.
    pub async fn generate(&self, ctx: &ReplyContext<'_>, history: &[ChatMessage]) -> Result<ReplyRecommendation, LlmError> {
        let strategy = select_strategy(&ctx.profile.style, ctx.state);
        let prompt = build_prompt(ctx, strategy);
        tracing::debug!(contact = %ctx.profile.id, %strategy, "reply prompt:\n{}", prompt);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(ctx.analysis.message.clone()));

        let raw = self.model.complete(&messages, &self.options).await?;
        tracing::debug!("raw reply output: {}", raw);

        let parsed = parse_reply(&raw).ok_or_else(|| LlmError::InvalidResponse("empty reply".to_string()))?;

        let mut suggestions = vec![Suggestion {
            text: parsed.primary,
            strategy,
            feedback: None,
        }];
        for (text, alt) in parsed.alternatives.into_iter().zip(alternative_strategies(strategy)) {
            suggestions.push(Suggestion {
                text,
                strategy: alt,
                feedback: None,
            });
        }

        Ok(ReplyRecommendation {
            id: Uuid::new_v4().to_string(),
            contact_id: ctx.profile.id.clone(),
            strategy,
            confidence: ctx.score.confidence,
            matching_score: ctx.score.matching_score,
            intent: ctx.analysis.intent,
            suggestions,
            generated_at: Utc::now(),
        })
    }
}
