use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{RelioError, Result};
use crate::core::intimacy::IntimacyWeights;
use crate::core::profile::RelationshipType;
use crate::core::relationship::StageThresholds;
use crate::core::store::{load_json, save_json};
use crate::llm::ChatOptions;

pub const SETTINGS_FILE: &str = "user_settings.json";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TOP_P: f64 = 0.7;
const DEFAULT_FREQUENCY_PENALTY: f64 = 0.5;
const DEFAULT_MAX_HISTORY: usize = 6;
const DEFAULT_MAX_TOKENS: u32 = 512;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Keys accepted by `settings set`.
pub const SETTABLE_KEYS: &[&str] = &[
    "api-key",
    "base-url",
    "model",
    "temperature",
    "top-p",
    "frequency-penalty",
    "max-history",
    "max-tokens",
    "timeout",
    "learn-style",
    "decay-7-14",
    "decay-14-30",
    "decay-30-90",
    "decay-90-plus",
    "like-weight",
    "dislike-weight",
    "acceptance-delta",
    "rejection-delta",
    "base-intimacy.<type>",
    "stage-building",
    "stage-stable",
    "stage-close",
    "stage-hysteresis",
    "drift-after-days",
];

/// What is stored in `user_settings.json`. Only explicitly saved values
/// are present; everything else falls through to the environment and
/// then to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learn_style: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intimacy: Option<IntimacyWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<StageThresholds>,
}

impl SettingsFile {
    pub fn load(data_dir: &Path) -> Self {
        load_json(&data_dir.join(SETTINGS_FILE))
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        save_json(&data_dir.join(SETTINGS_FILE), self)
    }

    /// Sets one key from its command-line spelling. Intimacy weights and
    /// stage thresholds are validated as a whole before they are kept.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| RelioError::InvalidInput(format!("invalid value for {}: {}", key, value)))
        }
        let text = || Some(value.trim().to_string()).filter(|v| !v.is_empty());

        match key {
            "api-key" => self.api_key = text(),
            "base-url" => self.base_url = text(),
            "model" => self.model = text(),
            "temperature" => self.temperature = Some(parse(key, value)?),
            "top-p" => self.top_p = Some(parse(key, value)?),
            "frequency-penalty" => self.frequency_penalty = Some(parse(key, value)?),
            "max-history" => self.max_history = Some(parse(key, value)?),
            "max-tokens" => self.max_tokens = Some(parse(key, value)?),
            "timeout" => self.timeout_secs = Some(parse(key, value)?),
            "learn-style" => self.learn_style = Some(parse(key, value)?),
            "decay-7-14" | "decay-14-30" | "decay-30-90" | "decay-90-plus" | "like-weight" | "dislike-weight"
            | "acceptance-delta" | "rejection-delta" => {
                let mut weights = self.intimacy.clone().unwrap_or_default();
                match key {
                    "decay-7-14" => weights.decay_7_14 = parse(key, value)?,
                    "decay-14-30" => weights.decay_14_30 = parse(key, value)?,
                    "decay-30-90" => weights.decay_30_90 = parse(key, value)?,
                    "decay-90-plus" => weights.decay_90_plus = parse(key, value)?,
                    "like-weight" => weights.like_weight = parse(key, value)?,
                    "dislike-weight" => weights.dislike_weight = parse(key, value)?,
                    "acceptance-delta" => weights.acceptance_delta = parse(key, value)?,
                    _ => weights.rejection_delta = parse(key, value)?,
                }
                weights.validate()?;
                self.intimacy = Some(weights);
            }
            "stage-building" | "stage-stable" | "stage-close" | "stage-hysteresis" | "drift-after-days" => {
                let mut stages = self.stages.unwrap_or_default();
                match key {
                    "stage-building" => stages.building = parse(key, value)?,
                    "stage-stable" => stages.stable = parse(key, value)?,
                    "stage-close" => stages.close = parse(key, value)?,
                    "stage-hysteresis" => stages.hysteresis = parse(key, value)?,
                    _ => stages.drift_after_days = parse(key, value)?,
                }
                stages.validate()?;
                self.stages = Some(stages);
            }
            _ if key.starts_with("base-intimacy.") => {
                let kind: RelationshipType = key["base-intimacy.".len()..].parse()?;
                let mut weights = self.intimacy.clone().unwrap_or_default();
                weights.base_intimacy.insert(kind, parse(key, value)?);
                weights.validate()?;
                self.intimacy = Some(weights);
            }
            _ => {
                return Err(RelioError::InvalidInput(format!(
                    "unknown setting {}; expected one of: {}",
                    key,
                    SETTABLE_KEYS.join(", ")
                )))
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_history: usize,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl ApiSettings {
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The key with all but the last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        match &self.api_key {
            None => "(not set)".to_string(),
            Some(key) => {
                let chars: Vec<char> = key.chars().collect();
                if chars.len() <= 8 {
                    "*".repeat(chars.len())
                } else {
                    let tail: String = chars[chars.len() - 4..].iter().collect();
                    format!("{}{}", "*".repeat(8), tail)
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RelioError::Config(format!("temperature must be within [0, 2]: {}", self.temperature)));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(RelioError::Config(format!("top_p must be within [0, 1]: {}", self.top_p)));
        }
        if !(-2.0..=2.0).contains(&self.frequency_penalty) {
            return Err(RelioError::Config(format!(
                "frequency_penalty must be within [-2, 2]: {}",
                self.frequency_penalty
            )));
        }
        if self.max_tokens == 0 || self.timeout_secs == 0 {
            return Err(RelioError::Config("max_tokens and timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub intimacy: IntimacyWeights,
    pub stages: StageThresholds,
    pub learn_style: bool,
    pub data_dir: PathBuf,
}

impl Settings {
    /// `--data-dir`, else `RELIO_DATA_DIR`, else the platform config dir.
    pub fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
        flag.or_else(|| std::env::var_os("RELIO_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(|| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("relio")
            })
    }

    pub fn load(data_dir: PathBuf) -> Result<Self> {
        let file = SettingsFile::load(&data_dir);
        Self::resolve(file, |name| std::env::var(name).ok(), data_dir)
    }

    /// Merges saved values, environment and defaults, in that order.
    pub fn resolve(file: SettingsFile, env: impl Fn(&str) -> Option<String>, data_dir: PathBuf) -> Result<Self> {
        fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
            let raw = env(name)?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "ignoring unparsable environment value");
                    None
                }
            }
        }
        let env_text = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let api = ApiSettings {
            api_key: file.api_key.or_else(|| env_text("RELIO_API_KEY")),
            base_url: file
                .base_url
                .or_else(|| env_text("RELIO_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: file
                .model
                .or_else(|| env_text("RELIO_MODEL"))
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: file
                .temperature
                .or_else(|| env_parse(&env, "LLM_TEMPERATURE"))
                .unwrap_or(DEFAULT_TEMPERATURE),
            top_p: file
                .top_p
                .or_else(|| env_parse(&env, "LLM_TOP_P"))
                .unwrap_or(DEFAULT_TOP_P),
            frequency_penalty: file
                .frequency_penalty
                .or_else(|| env_parse(&env, "LLM_FREQUENCY_PENALTY"))
                .unwrap_or(DEFAULT_FREQUENCY_PENALTY),
            max_history: file
                .max_history
                .or_else(|| env_parse(&env, "LLM_MAX_HISTORY"))
                .unwrap_or(DEFAULT_MAX_HISTORY),
            max_tokens: file
                .max_tokens
                .or_else(|| env_parse(&env, "LLM_MAX_TOKENS"))
                .unwrap_or(DEFAULT_MAX_TOKENS),
            timeout_secs: file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
        };
        api.validate()?;

        let intimacy = file.intimacy.unwrap_or_default();
        intimacy.validate()?;
        let stages = file.stages.unwrap_or_default();
        stages.validate()?;

        Ok(Settings {
            api,
            intimacy,
            stages,
            learn_style: file.learn_style.unwrap_or(true),
            data_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(SettingsFile::default(), env_from(&[]), PathBuf::from("/tmp/x")).unwrap();
        assert_eq!(settings.api.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.api.model, DEFAULT_MODEL);
        assert_eq!(settings.api.max_history, 6);
        assert_eq!(settings.api.max_tokens, 512);
        assert_eq!(settings.api.timeout(), Duration::from_secs(60));
        assert!(settings.api.api_key.is_none());
        assert!(settings.learn_style);
    }

    #[test]
    fn test_file_beats_env_beats_default() {
        let file = SettingsFile {
            model: Some("file-model".to_string()),
            ..Default::default()
        };
        let env = env_from(&[
            ("RELIO_MODEL", "env-model"),
            ("RELIO_API_KEY", "sk-env"),
            ("LLM_TEMPERATURE", "0.2"),
            ("LLM_MAX_HISTORY", "not a number"),
        ]);
        let settings = Settings::resolve(file, env, PathBuf::from("/tmp/x")).unwrap();

        assert_eq!(settings.api.model, "file-model");
        assert_eq!(settings.api.api_key.as_deref(), Some("sk-env"));
        assert_eq!(settings.api.temperature, 0.2);
        assert_eq!(settings.api.max_history, 6);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = SettingsFile::default();
        file.set("temperature", "3.5").unwrap();
        assert!(Settings::resolve(file, env_from(&[]), PathBuf::from("/tmp/x")).is_err());

        let mut file = SettingsFile::default();
        assert!(file.set("temperature", "warm").is_err());
        assert!(file.set("colour", "blue").is_err());
    }

    #[test]
    fn test_set_intimacy_and_stage_keys() {
        let mut file = SettingsFile::default();
        file.set("like-weight", "3").unwrap();
        file.set("decay-30-90", "0.5").unwrap();
        file.set("base-intimacy.close-friend", "40").unwrap();
        file.set("stage-close", "70").unwrap();
        file.set("drift-after-days", "45").unwrap();

        let settings = Settings::resolve(file.clone(), env_from(&[]), PathBuf::from("/tmp/x")).unwrap();
        assert_eq!(settings.intimacy.like_weight, 3);
        assert_eq!(settings.intimacy.decay_30_90, 0.5);
        assert_eq!(settings.intimacy.base_intimacy[&RelationshipType::CloseFriend], 40);
        assert_eq!(settings.intimacy.base_intimacy[&RelationshipType::Friend], 25);
        assert_eq!(settings.stages.close, 70);
        assert_eq!(settings.stages.stable, StageThresholds::default().stable);
        assert_eq!(settings.stages.drift_after_days, 45);

        // invalid values leave the file unchanged
        let before = file.clone();
        assert!(file.set("stage-close", "10").is_err());
        assert!(file.set("like-weight", "-1").is_err());
        assert!(file.set("acceptance-delta", "1.5").is_err());
        assert!(file.set("base-intimacy.close-friend", "150").is_err());
        assert!(file.set("base-intimacy.rival", "20").is_err());
        assert!(file.set("decay-7-14", "fast").is_err());
        assert_eq!(file, before);
    }

    #[test]
    fn test_set_and_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut file = SettingsFile::default();
        file.set("api-key", "sk-1234567890abcd").unwrap();
        file.set("max-tokens", "256").unwrap();
        file.set("learn-style", "false").unwrap();
        file.save(dir.path()).unwrap();

        let loaded = SettingsFile::load(dir.path());
        assert_eq!(loaded, file);

        let settings = Settings::resolve(loaded, env_from(&[]), dir.path().to_path_buf()).unwrap();
        assert_eq!(settings.api.max_tokens, 256);
        assert!(!settings.learn_style);
        assert_eq!(settings.api.masked_api_key(), "********abcd");
    }

    #[test]
    fn test_mask_short_and_missing_keys() {
        let mut api = Settings::resolve(SettingsFile::default(), env_from(&[]), PathBuf::new()).unwrap().api;
        assert_eq!(api.masked_api_key(), "(not set)");
        api.api_key = Some("abc".to_string());
        assert_eq!(api.masked_api_key(), "***");
    }

    #[test]
    fn test_chat_options_follow_settings() {
        let settings = Settings::resolve(SettingsFile::default(), env_from(&[("LLM_TOP_P", "0.9")]), PathBuf::new()).unwrap();
        let options = settings.api.chat_options();
        assert_eq!(options.top_p, 0.9);
        assert_eq!(options.model, DEFAULT_MODEL);
    }
}
