use serde::{Deserialize, Serialize};

use crate::core::intimacy::MessageQuality;
use crate::core::profile::{ContactProfile, StyleSignals};
use crate::core::relationship::RelationshipState;

/// Sentiment lexicon; scores are averaged over every entry the message mentions.
const SENTIMENT_WORDS: &[(&str, f64)] = &[
    ("好", 0.5),
    ("开心", 1.0),
    ("喜欢", 0.8),
    ("棒", 0.8),
    ("谢谢", 0.6),
    ("爱", 0.9),
    ("美", 0.7),
    ("太好", 1.0),
    ("good", 0.5),
    ("great", 0.8),
    ("awesome", 0.9),
    ("happy", 1.0),
    ("love", 0.9),
    ("glad", 0.7),
    ("thanks", 0.6),
    ("nice", 0.6),
    ("坏", -0.5),
    ("难受", -0.8),
    ("讨厌", -0.9),
    ("烦", -0.7),
    ("生气", -0.8),
    ("伤心", -0.9),
    ("糟", -0.8),
    ("差", -0.6),
    ("bad", -0.5),
    ("hate", -0.9),
    ("awful", -0.8),
    ("terrible", -0.8),
    ("angry", -0.8),
    ("sad", -0.9),
    ("upset", -0.8),
    ("annoying", -0.7),
];

const GREETING_WORDS: &[&str] = &["你好", "早上好", "晚安", "嗨", "hi", "hello", "hey", "morning"];
const QUESTION_WORDS: &[&str] = &["?", "？", "怎样", "如何", "为什么", "是什么", "什么时候"];
const QUESTION_OPENERS: &[&str] = &["how", "why", "what", "when", "where", "who", "can", "could", "do", "does", "is", "are"];
const COMPLAINT_WORDS: &[&str] = &[
    "投诉", "抱怨", "不满", "有问题", "出错", "坏了", "complain", "complaint", "broken", "disappointed",
];

const THANKS_WORDS: &[&str] = &["谢谢", "感谢", "多谢", "thanks", "thank"];
const EMPATHY_WORDS: &[&str] = &["理解", "明白", "懂你", "同感", "也是", "understand", "same", "sorry"];

const FORMAL_WORDS: &[&str] = &[
    "您", "请", "敬请", "烦请", "尊敬的", "贵", "希望", "建议", "感谢", "打扰", "冒昧", "恳请", "鉴于", "关于",
    "抱歉", "麻烦", "辛苦", "致谢", "please", "regards", "sincerely", "kindly", "appreciate", "dear",
];
const INFORMAL_WORDS: &[&str] = &[
    "哈哈", "嗯嗯", "啊", "呀", "嘛", "呢", "吧", "哦", "emmm", "hhh", "666", "咋", "啥", "咱", "兄弟", "姐妹",
    "lol", "yeah", "gonna", "wanna", "dude", "ok", "haha",
];
const WARM_WORDS: &[&str] = &[
    "关心", "在乎", "想念", "担心", "心疼", "辛苦了", "加油", "开心", "高兴", "喜欢", "爱", "亲爱的", "宝贝",
    "注意身体", "早点休息", "一起", "想你", "好久不见", "期待", "保重", "抱抱", "miss", "love", "care",
    "proud", "hug", "dear", "take care",
];
const COLD_WORDS: &[&str] = &[
    "通知", "告知", "必须", "应当", "不得", "禁止", "按照", "根据", "规定", "要求", "流程", "提交", "汇报",
    "deadline", "submit", "required", "must", "per", "policy",
];
const HUMOR_WORDS: &[&str] = &[
    "哈哈", "嘿嘿", "呵呵", "233", "笑死", "绝了", "太好笑", "搞笑", "有趣", "玩笑", "逗", "梗", "hhh", "xswl",
    "lol", "lmao", "haha", "joke", "funny", "🤣", "😂", "😆", "😜",
];
const SERIOUS_WORDS: &[&str] = &[
    "严肃", "认真", "重要", "紧急", "问题", "困难", "危机", "严重", "焦虑", "压力", "生病", "去世", "道歉",
    "serious", "urgent", "important", "problem", "sick", "stress",
];

const MAX_KEYWORDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Question,
    Complaint,
    General,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Greeting => "greeting",
            Intent::Question => "question",
            Intent::Complaint => "complaint",
            Intent::General => "general",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueAnalysis {
    pub contact_id: String,
    pub message: String,
    pub sentiment: f64,
    pub keywords: Vec<String>,
    pub intent: Intent,
    pub quality: MessageQuality,
    pub style: StyleSignals,
    /// Number of earlier messages available as context.
    pub context_length: usize,
}

/// How well the message fits what is known about the contact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InteractionScore {
    pub matching_score: f64,
    pub confidence: f64,
}

/// Lowercased message plus its word tokens. ASCII lexicon entries match
/// whole tokens, everything else matches as a substring.
struct Text {
    lower: String,
    tokens: Vec<String>,
}

impl Text {
    fn new(message: &str) -> Self {
        let lower = message.to_lowercase();
        let tokens = words(&lower).map(str::to_string).collect();
        Text { lower, tokens }
    }

    fn mentions(&self, entry: &str) -> bool {
        if entry.chars().all(|c| c.is_ascii_alphanumeric()) {
            self.tokens.iter().any(|t| t == entry)
        } else {
            self.lower.contains(entry)
        }
    }

    fn count(&self, entries: &[&str]) -> usize {
        entries.iter().filter(|e| self.mentions(e)).count()
    }

    fn any(&self, entries: &[&str]) -> bool {
        entries.iter().any(|e| self.mentions(e))
    }
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
}

fn is_emoji(c: char) -> bool {
    matches!(c as u32, 0x1F300..=0x1FAFF | 0x2600..=0x27BF)
}

#[derive(Debug, Clone, Default)]
pub struct ConversationAnalyzer;

impl ConversationAnalyzer {
    pub fn new() -> Self {
        ConversationAnalyzer
    }

    pub fn analyze(&self, contact_id: &str, message: &str, context_length: usize) -> DialogueAnalysis {
        let text = Text::new(message);
        DialogueAnalysis {
            contact_id: contact_id.to_string(),
            message: message.to_string(),
            sentiment: sentiment_of(&text),
            keywords: self.keywords(message),
            intent: intent_of(message, &text),
            quality: quality_of(message, &text),
            style: style_of(message, &text),
            context_length,
        }
    }

    /// Sentiment in `[-1, 1]`; 0 when no lexicon entry is mentioned.
    pub fn sentiment(&self, message: &str) -> f64 {
        sentiment_of(&Text::new(message))
    }

    /// Words of two or more characters, in order, at most ten.
    pub fn keywords(&self, message: &str) -> Vec<String> {
        words(message)
            .filter(|w| w.chars().count() >= 2)
            .take(MAX_KEYWORDS)
            .map(str::to_string)
            .collect()
    }

    pub fn intent(&self, message: &str) -> Intent {
        intent_of(message, &Text::new(message))
    }

    pub fn quality(&self, message: &str) -> MessageQuality {
        quality_of(message, &Text::new(message))
    }

    pub fn style_signals(&self, message: &str) -> StyleSignals {
        style_of(message, &Text::new(message))
    }

    pub fn score(&self, analysis: &DialogueAnalysis, profile: &ContactProfile, state: &RelationshipState) -> InteractionScore {
        let emotion = if analysis.sentiment > 0.0 && profile.style.expressiveness > 0.5 {
            0.5
        } else if analysis.sentiment < 0.0 && profile.style.expressiveness < 0.5 {
            0.3
        } else {
            0.0
        };
        let frequency = state.interaction_frequency * 0.3;
        let trust = state.trust_level * 0.2;
        let matching_score = ((emotion + frequency + trust) / 3.0).clamp(0.0, 1.0);

        let context = (analysis.context_length as f64 / 10.0).min(1.0);
        let confidence = (matching_score * 0.5 + context * 0.3 + state.closeness * 0.2).clamp(0.0, 1.0);

        InteractionScore {
            matching_score,
            confidence,
        }
    }
}

fn sentiment_of(text: &Text) -> f64 {
    let matched: Vec<f64> = SENTIMENT_WORDS
        .iter()
        .filter(|(word, _)| text.mentions(word))
        .map(|(_, score)| *score)
        .collect();
    if matched.is_empty() {
        return 0.0;
    }
    (matched.iter().sum::<f64>() / matched.len() as f64).clamp(-1.0, 1.0)
}

fn intent_of(message: &str, text: &Text) -> Intent {
    if text.any(GREETING_WORDS) {
        return Intent::Greeting;
    }
    let opens_with_question = text
        .tokens
        .first()
        .map_or(false, |first| QUESTION_OPENERS.contains(&first.as_str()));
    if QUESTION_WORDS.iter().any(|w| message.contains(w)) || opens_with_question {
        return Intent::Question;
    }
    if text.any(COMPLAINT_WORDS) {
        return Intent::Complaint;
    }
    Intent::General
}

fn quality_of(message: &str, text: &Text) -> MessageQuality {
    MessageQuality {
        length: message.chars().count(),
        has_question: message.contains('?') || message.contains('？') || message.contains('吗'),
        has_thanks: text.any(THANKS_WORDS),
        has_empathy: text.any(EMPATHY_WORDS),
    }
}

fn style_of(message: &str, text: &Text) -> StyleSignals {
    let emoji_count = message.chars().filter(|c| is_emoji(*c)).count() as f64;
    let exclamations = message.matches(['!', '！']).count() as f64;
    let waves = message.matches(['~', '～']).count() as f64;
    let length = message.chars().count();

    let ends_cleanly = message
        .trim_end()
        .ends_with(['。', '！', '？', '.', '!', '?']);
    let sentences = message.matches(['。', '！', '？', '.', '!', '?']).count() + 1;
    let avg_sentence = length as f64 / sentences as f64;

    let mut formality = 0.5 + text.count(FORMAL_WORDS) as f64 * 0.08
        - text.count(INFORMAL_WORDS) as f64 * 0.06
        - emoji_count * 0.04;
    if ends_cleanly {
        formality += 0.05;
    }
    if avg_sentence > 20.0 {
        formality += 0.05;
    }

    let mut expressiveness = 0.5 + text.count(WARM_WORDS) as f64 * 0.1 - text.count(COLD_WORDS) as f64 * 0.08
        + (exclamations * 0.03).min(0.15);
    if text.any(GREETING_WORDS) {
        expressiveness += 0.05;
    }

    let humor = 0.5 + text.count(HUMOR_WORDS) as f64 * 0.12 - text.count(SERIOUS_WORDS) as f64 * 0.08
        + (waves * 0.05).min(0.1);

    let verbosity = (length as f64 / 120.0).min(1.0);

    StyleSignals {
        formality: formality.clamp(0.0, 1.0),
        expressiveness: expressiveness.clamp(0.0, 1.0),
        humor: humor.clamp(0.0, 1.0),
        verbosity,
    }
}
