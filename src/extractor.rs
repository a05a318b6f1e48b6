use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::core::history::{ChatMessage, ConversationTurn, Feedback};
use crate::core::memory::{MemoryKind, MemorySource, MemoryStore};
use crate::llm::{ChatModel, ChatOptions, LlmError};
use crate::reply::{extract_json, strip_think};

const EXTRACTION_TEMPERATURE: f64 = 0.3;
const EXTRACTION_MAX_TOKENS: u32 = 1024;
const COMPARISON_TEMPERATURE: f64 = 0.2;
const COMPARISON_MAX_TOKENS: u32 = 512;
/// Existing memories of each kind listed in the prompt to discourage repeats.
const EXISTING_IN_PROMPT: usize = 5;

const EXTRACTION_PROMPT: &str = r#"You analyse a chat transcript between the user ("Me") and one contact and pull out long-term memories.

Extract three kinds of information:

1. profile_traits: the contact's personality, preferences, habits, background.
   - content: short description, e.g. "likes spicy food"
   - confidence: 0.0 to 1.0, how strongly the transcript supports it
2. experiences: things that happened between the two, plans they made, topics they discussed.
   - event: short description, e.g. "discussed where to have dinner"
   - impact: -1.0 to 1.0 effect on the relationship
   - event_time: when, relative to today ("today", "yesterday", "3 days ago", "last week", "last month") or a date
3. strategies: ways of communicating that worked or did not.
   - pattern: description
   - effectiveness: 0.0 to 1.0

Answer with JSON only:
{"profile_traits": [{"content": "...", "confidence": 0.9}],
 "experiences": [{"event": "...", "impact": 0.5, "event_time": "today"}],
 "strategies": [{"pattern": "...", "effectiveness": 0.8}]}

Only extract what the transcript supports. Use empty arrays when nothing is found. Do not repeat known memories."#;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedTrait {
    pub content: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedEvent {
    pub event: String,
    pub impact: f64,
    pub event_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedStrategy {
    pub pattern: String,
    pub effectiveness: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    pub traits: Vec<ExtractedTrait>,
    pub events: Vec<ExtractedEvent>,
    pub strategies: Vec<ExtractedStrategy>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.traits.is_empty() && self.events.is_empty() && self.strategies.is_empty()
    }
}

/// What applying an extraction changed in the memory store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    pub facts_added: usize,
    pub events_added: usize,
    pub strategies_added: usize,
    pub strategies_reinforced: usize,
    pub duplicates_skipped: usize,
}

/// `today` minus `days`, or `today` itself when the count is negative or
/// leaves the calendar range.
fn days_before(today: NaiveDate, days: i64) -> NaiveDate {
    let date = Duration::try_days(days)
        .filter(|_| days >= 0)
        .and_then(|delta| today.checked_sub_signed(delta));
    match date {
        Some(date) => date,
        None => {
            tracing::debug!(days, "event time out of range, using today");
            today
        }
    }
}

/// Turns a model-supplied time expression into a date. Unknown or missing
/// expressions mean today.
pub fn resolve_event_date(raw: Option<&str>, today: NaiveDate) -> NaiveDate {
    let text = match raw.map(str::trim) {
        Some(text) if !text.is_empty() => text.to_lowercase(),
        _ => return today,
    };

    let days_back = match text.as_str() {
        "today" | "just now" | "now" | "this week" | "今天" | "刚才" | "刚刚" | "本周" | "这周" | "这个星期" => Some(0),
        "yesterday" | "昨天" => Some(1),
        "the day before yesterday" | "前天" => Some(2),
        "大前天" => Some(3),
        "last week" | "a week ago" | "上周" | "上个星期" | "上星期" => Some(7),
        "last month" | "a month ago" | "上个月" | "上月" => Some(30),
        _ => None,
    };
    if let Some(days) = days_back {
        return days_before(today, days);
    }

    let count_before = |suffixes: &[&str]| {
        suffixes
            .iter()
            .find_map(|suffix| text.strip_suffix(suffix))
            .and_then(|n| n.trim().parse::<i64>().ok())
    };
    if let Some(days) = count_before(&["days ago", "day ago", "天前"]) {
        return days_before(today, days);
    }
    if let Some(weeks) = count_before(&["weeks ago", "week ago", "周前"]) {
        return days_before(today, weeks.saturating_mul(7));
    }

    let parts: Vec<u32> = text
        .split(['-', '/', '年', '月', '日'])
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    if let [year, month, day] = parts[..] {
        if let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) {
            return date;
        }
    }

    tracing::debug!(time = %text, "unrecognised event time, using today");
    today
}

fn number(value: &serde_json::Value, default: f64) -> f64 {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .unwrap_or(default)
}

fn text_field(item: &serde_json::Value, key: &str) -> Option<String> {
    item[key]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reads the extraction JSON, skipping entries that lack their text.
pub fn parse_extraction(raw: &str, today: NaiveDate) -> ExtractionResult {
    let mut result = ExtractionResult::default();
    let value = match extract_json(raw) {
        Some(value) => value,
        None => {
            tracing::warn!("memory extraction output was not JSON");
            return result;
        }
    };

    let items = |key: &str| value[key].as_array().cloned().unwrap_or_default();

    for item in items("profile_traits") {
        if let Some(content) = text_field(&item, "content") {
            result.traits.push(ExtractedTrait {
                content,
                confidence: number(&item["confidence"], 0.7).clamp(0.0, 1.0),
            });
        }
    }
    for item in items("experiences") {
        if let Some(event) = text_field(&item, "event") {
            result.events.push(ExtractedEvent {
                event,
                impact: number(&item["impact"], 0.0).clamp(-1.0, 1.0),
                event_date: resolve_event_date(item["event_time"].as_str(), today),
            });
        }
    }
    for item in items("strategies") {
        if let Some(pattern) = text_field(&item, "pattern") {
            result.strategies.push(ExtractedStrategy {
                pattern,
                effectiveness: number(&item["effectiveness"], 0.5).clamp(0.0, 1.0),
            });
        }
    }

    result
}

/// Transcript lines for the prompt. Disliked suggestions never count as
/// something the user said.
pub fn format_transcript(contact_name: &str, turns: &[ConversationTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let _ = writeln!(out, "{}: {}", contact_name, turn.message);

        let chosen = turn
            .reply()
            .filter(|s| s.feedback != Some(Feedback::Dislike))
            .or_else(|| turn.suggestions.iter().find(|s| s.feedback != Some(Feedback::Dislike)));
        if let Some(reply) = chosen {
            let _ = writeln!(out, "Me: {}", reply.text);
        }
    }
    out
}

pub struct MemoryExtractor {
    model: Arc<dyn ChatModel>,
    options: ChatOptions,
}

impl MemoryExtractor {
    pub fn new(model: Arc<dyn ChatModel>, options: ChatOptions) -> Self {
        MemoryExtractor { model, options }
    }

    pub async fn extract(
        &self,
        contact_id: &str,
        contact_name: &str,
        turns: &[ConversationTurn],
        store: &MemoryStore,
        today: NaiveDate,
    ) -> Result<ExtractionResult, LlmError> {
        if turns.is_empty() {
            return Ok(ExtractionResult::default());
        }

        let mut prompt = format!(
            "Transcript with {}:\n\n{}\n",
            contact_name,
            format_transcript(contact_name, turns)
        );
        let known = |kind| {
            store
                .query(contact_id, Some(kind), true)
                .into_iter()
                .take(EXISTING_IN_PROMPT)
                .map(|m| format!("- {}", m.content))
                .collect::<Vec<_>>()
        };
        let facts = known(MemoryKind::EntityFact);
        let events = known(MemoryKind::RelationshipEvent);
        if !facts.is_empty() || !events.is_empty() {
            prompt.push_str("Already known (do not repeat):\n");
            for line in facts.iter().chain(events.iter()) {
                let _ = writeln!(prompt, "{}", line);
            }
        }

        let messages = [ChatMessage::system(EXTRACTION_PROMPT), ChatMessage::user(prompt)];
        let options = self
            .options
            .clone()
            .with_temperature(EXTRACTION_TEMPERATURE)
            .with_max_tokens(EXTRACTION_MAX_TOKENS);

        tracing::info!(contact = contact_id, turns = turns.len(), "extracting memories");
        let raw = self.model.complete(&messages, &options).await?;
        tracing::debug!("extraction output: {}", raw);

        Ok(parse_extraction(&raw, today))
    }

    /// Index of an existing pattern the model judges equivalent to `pattern`.
    /// A failed comparison counts as no match.
    pub async fn similar_strategy(&self, pattern: &str, existing: &[String]) -> Option<usize> {
        if existing.is_empty() {
            return None;
        }

        let mut prompt = format!("New communication pattern: {}\n\nExisting patterns:\n", pattern);
        for (i, p) in existing.iter().enumerate() {
            let _ = writeln!(prompt, "{}. {}", i + 1, p);
        }
        prompt.push_str(
            "\nIs the new pattern essentially the same as one of the existing ones (same approach, same goal)? \
             Answer with JSON only: {\"has_similar\": true, \"similar_index\": 1}. Use null for similar_index when none match.",
        );

        let messages = [
            ChatMessage::system("You compare communication strategies."),
            ChatMessage::user(prompt),
        ];
        let options = self
            .options
            .clone()
            .with_temperature(COMPARISON_TEMPERATURE)
            .with_max_tokens(COMPARISON_MAX_TOKENS);

        let raw = match self.model.complete(&messages, &options).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "strategy comparison failed");
                return None;
            }
        };

        let value = extract_json(&strip_think(&raw))?;
        if !value["has_similar"].as_bool().unwrap_or(false) {
            return None;
        }
        let index = value["similar_index"].as_u64()? as usize;
        (1..=existing.len()).contains(&index).then(|| index - 1)
    }

    /// Stores new memories, skipping near-duplicates and merging strategies
    /// the model considers equivalent to a known one.
    pub async fn apply(&self, store: &mut MemoryStore, contact_id: &str, result: ExtractionResult) -> ApplyReport {
        let mut report = ApplyReport::default();

        for fact in result.traits {
            if store.contains_similar(contact_id, MemoryKind::EntityFact, &fact.content) {
                report.duplicates_skipped += 1;
                continue;
            }
            if store
                .add_fact(contact_id, &fact.content, fact.confidence, MemorySource::Extracted)
                .is_ok()
            {
                report.facts_added += 1;
            }
        }

        for event in result.events {
            if store.contains_similar(contact_id, MemoryKind::RelationshipEvent, &event.event) {
                report.duplicates_skipped += 1;
                continue;
            }
            if store
                .add_event(contact_id, &event.event, event.impact, event.event_date, MemorySource::Extracted)
                .is_ok()
            {
                report.events_added += 1;
            }
        }

        for strategy in result.strategies {
            let existing: Vec<(String, String)> = store
                .query(contact_id, Some(MemoryKind::CommunicationStrategy), true)
                .into_iter()
                .map(|m| (m.id.clone(), m.content.clone()))
                .collect();
            let success = strategy.effectiveness >= 0.5;

            let matched = if store.contains_similar(contact_id, MemoryKind::CommunicationStrategy, &strategy.pattern) {
                existing
                    .iter()
                    .position(|(_, text)| normalized_eq(text, &strategy.pattern))
            } else {
                let patterns: Vec<String> = existing.iter().map(|(_, text)| text.clone()).collect();
                self.similar_strategy(&strategy.pattern, &patterns).await
            };

            match matched.and_then(|i| existing.get(i)) {
                Some((id, _)) => {
                    if store.reinforce_strategy(id, success).is_ok() {
                        report.strategies_reinforced += 1;
                    }
                }
                None => {
                    if store
                        .add_strategy(contact_id, &strategy.pattern, strategy.effectiveness, MemorySource::Extracted)
                        .is_ok()
                    {
                        report.strategies_added += 1;
                    }
                }
            }
        }

        tracing::info!(
            contact = contact_id,
            facts = report.facts_added,
            events = report.events_added,
            strategies = report.strategies_added,
            reinforced = report.strategies_reinforced,
            "memories applied"
        );
        report
    }
}

fn normalized_eq(a: &str, b: &str) -> bool {
    let norm = |s: &str| -> String {
        s.chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect()
    };
    norm(a) == norm(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Intent;
    use crate::core::history::Suggestion;
    use crate::core::memory::MemoryDetail;
    use crate::core::profile::ReplyStrategy;
    use crate::llm::testing::ScriptedModel;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    fn options() -> ChatOptions {
        ChatOptions {
            model: "test".to_string(),
            temperature: 0.7,
            top_p: 0.7,
            frequency_penalty: 0.5,
            max_tokens: 512,
        }
    }

    #[test]
    fn test_relative_dates() {
        let t = today();
        assert_eq!(resolve_event_date(None, t), t);
        assert_eq!(resolve_event_date(Some("Yesterday"), t), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(resolve_event_date(Some("前天"), t), NaiveDate::from_ymd_opt(2026, 3, 13).unwrap());
        assert_eq!(resolve_event_date(Some("5 days ago"), t), NaiveDate::from_ymd_opt(2026, 3, 10).unwrap());
        assert_eq!(resolve_event_date(Some("3天前"), t), NaiveDate::from_ymd_opt(2026, 3, 12).unwrap());
        assert_eq!(resolve_event_date(Some("last week"), t), NaiveDate::from_ymd_opt(2026, 3, 8).unwrap());
        assert_eq!(resolve_event_date(Some("2 weeks ago"), t), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(resolve_event_date(Some("last month"), t), NaiveDate::from_ymd_opt(2026, 2, 13).unwrap());
        assert_eq!(resolve_event_date(Some("2025/12/1"), t), NaiveDate::from_ymd_opt(2025, 12, 1).unwrap());
        assert_eq!(resolve_event_date(Some("2025年7月9日"), t), NaiveDate::from_ymd_opt(2025, 7, 9).unwrap());
        assert_eq!(resolve_event_date(Some("someday"), t), t);
    }

    #[test]
    fn test_out_of_range_counts_fall_back_to_today() {
        let t = today();
        assert_eq!(resolve_event_date(Some("999999999 days ago"), t), t);
        assert_eq!(resolve_event_date(Some("9223372036854775807 days ago"), t), t);
        assert_eq!(resolve_event_date(Some("99999999999999 weeks ago"), t), t);
        assert_eq!(resolve_event_date(Some("-3 days ago"), t), t);

        let raw = r#"{"experiences":[{"event":"met at school","impact":0.3,"event_time":"999999999 days ago"}]}"#;
        let result = parse_extraction(raw, t);
        assert_eq!(result.events[0].event_date, t);
    }

    #[test]
    fn test_parse_extraction_is_tolerant() {
        let raw = r#"```json
{"profile_traits": [{"content": "likes basketball", "confidence": 1.4}, {"confidence": 0.9}, "junk"],
 "experiences": [{"event": "talked about dinner", "impact": "0.5", "event_time": "yesterday"}],
 "strategies": [{"pattern": "use humor"}]}
```"#;
        let result = parse_extraction(raw, today());
        assert_eq!(result.traits, vec![ExtractedTrait { content: "likes basketball".to_string(), confidence: 1.0 }]);
        assert_eq!(result.events[0].impact, 0.5);
        assert_eq!(result.events[0].event_date, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(result.strategies[0].effectiveness, 0.5);

        assert!(parse_extraction("no json here", today()).is_empty());
    }

    #[test]
    fn test_transcript_skips_disliked_replies() {
        let mut turn = ConversationTurn::new("c1", "dinner?", Intent::Question, 0.0, 25);
        turn.suggestions = vec![
            Suggestion { text: "nope".to_string(), strategy: ReplyStrategy::Casual, feedback: Some(Feedback::Dislike) },
            Suggestion { text: "sure!".to_string(), strategy: ReplyStrategy::Formal, feedback: None },
        ];
        let transcript = format_transcript("Fay", &[turn]);
        assert_eq!(transcript, "Fay: dinner?\nMe: sure!\n");
    }

    #[tokio::test]
    async fn test_extract_and_apply() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok(r#"{"profile_traits": [{"content": "Likes basketball", "confidence": 0.9}, {"content": "night owl", "confidence": 0.6}],
                   "experiences": [{"event": "planned a game", "impact": 0.4, "event_time": "today"}],
                   "strategies": [{"pattern": "joke around", "effectiveness": 0.8}, {"pattern": "send memes", "effectiveness": 0.7}]}"#
                .to_string()),
            // comparison for "send memes"
            Ok(r#"{"has_similar": true, "similar_index": 1}"#.to_string()),
        ]));
        let extractor = MemoryExtractor::new(model.clone(), options());

        let mut store = MemoryStore::new();
        store.add_fact("c1", "likes basketball", 0.8, MemorySource::Manual).unwrap();
        let joke = store.add_strategy("c1", "Joke around!", 0.6, MemorySource::Manual).unwrap().id.clone();

        let turn = ConversationTurn::new("c1", "game tonight?", Intent::Question, 0.2, 25);
        let result = extractor.extract("c1", "Gus", &[turn], &store, today()).await.unwrap();
        let report = extractor.apply(&mut store, "c1", result).await;

        assert_eq!(report.facts_added, 1);
        assert_eq!(report.events_added, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert_eq!(report.strategies_added, 0);
        assert_eq!(report.strategies_reinforced, 2);

        match &store.get(&joke).unwrap().detail {
            MemoryDetail::CommunicationStrategy { evidence_count, .. } => assert_eq!(*evidence_count, 3),
            other => panic!("unexpected detail {:?}", other),
        }

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].1.temperature, EXTRACTION_TEMPERATURE);
        assert_eq!(requests[0].1.max_tokens, EXTRACTION_MAX_TOKENS);
        assert!(requests[0].0[1].content.contains("likes basketball"));
    }

    #[tokio::test]
    async fn test_failed_comparison_adds_new_strategy() {
        let model = Arc::new(ScriptedModel::new(vec![Err(LlmError::Timeout)]));
        let extractor = MemoryExtractor::new(model, options());
        let mut store = MemoryStore::new();
        store.add_strategy("c1", "be brief", 0.7, MemorySource::Manual).unwrap();

        let result = ExtractionResult {
            strategies: vec![ExtractedStrategy { pattern: "ask about work".to_string(), effectiveness: 0.7 }],
            ..Default::default()
        };
        let report = extractor.apply(&mut store, "c1", result).await;
        assert_eq!(report.strategies_added, 1);
        assert_eq!(store.query("c1", Some(MemoryKind::CommunicationStrategy), true).len(), 2);
    }

    #[tokio::test]
    async fn test_no_turns_skips_model() {
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let extractor = MemoryExtractor::new(model.clone(), options());
        let result = extractor.extract("c1", "Gus", &[], &MemoryStore::new(), today()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(model.request_count(), 0);
    }
}
