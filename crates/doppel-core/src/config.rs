use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (doppel.toml + DOPPEL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DoppelConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sleep_hours: SleepHoursConfig,
    #[serde(default)]
    pub hts: HtsConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// KV store path (counters, pauses, history, streams, caches).
    #[serde(default = "default_kv_path")]
    pub kv_path: String,
    /// MEM store path (contacts, personas, style profiles, graph).
    #[serde(default = "default_memory_path")]
    pub memory_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kv_path: default_kv_path(),
            memory_path: default_memory_path(),
        }
    }
}

/// Sliding-window rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Max messages per window before the limiter rejects.
    #[serde(default = "default_rate_threshold")]
    pub threshold: u32,
    /// Window length in seconds. The window TTL is armed exactly once,
    /// on the first message — a burst cannot reset it.
    #[serde(default = "default_rate_window")]
    pub window_seconds: u32,
    /// Set a contact pause (reason=rate_limit) on breach.
    #[serde(default = "bool_true")]
    pub auto_pause: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threshold: default_rate_threshold(),
            window_seconds: default_rate_window(),
            auto_pause: true,
        }
    }
}

/// Sleep-hour deferral window. Defaults to 23:00–07:00 (wraps midnight).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepHoursConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_sleep_start_hour")]
    pub start_hour: u8,
    #[serde(default)]
    pub start_minute: u8,
    #[serde(default = "default_sleep_end_hour")]
    pub end_hour: u8,
    #[serde(default)]
    pub end_minute: u8,
    /// Hours from UTC of the operator's local time.
    #[serde(default)]
    pub timezone_offset_hours: i8,
}

impl Default for SleepHoursConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: default_sleep_start_hour(),
            start_minute: 0,
            end_hour: default_sleep_end_hour(),
            end_minute: 0,
            timezone_offset_hours: 0,
        }
    }
}

/// Human-typing simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtsConfig {
    /// Hard cap on the total computed delay.
    #[serde(default = "default_hts_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for HtsConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: default_hts_max_delay(),
        }
    }
}

/// Admission gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Auto-approve unknown contacts that already have persisted history.
    #[serde(default = "bool_true")]
    pub auto_approve_existing: bool,
    /// Send one canned reply to unknown contacts entering pairing.
    #[serde(default = "bool_true")]
    pub auto_reply_unknown: bool,
    #[serde(default = "default_auto_reply_text")]
    pub auto_reply_text: String,
    /// Denial cooldown: denied contacts are dropped silently until expiry.
    #[serde(default = "default_deny_cooldown_hours")]
    pub deny_cooldown_hours: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            auto_approve_existing: true,
            auto_reply_unknown: true,
            auto_reply_text: default_auto_reply_text(),
            deny_cooldown_hours: default_deny_cooldown_hours(),
        }
    }
}

/// Conversation history bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_max")]
    pub max_messages: u32,
    #[serde(default = "default_history_ttl")]
    pub ttl_seconds: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_history_max(),
            ttl_seconds: default_history_ttl(),
        }
    }
}

/// Persona / style snapshot cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// Pipeline coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ceiling on in-flight messages across all contacts.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    /// How often the deferred-message scheduler polls for due entries.
    #[serde(default = "default_deferred_poll")]
    pub deferred_poll_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            deferred_poll_seconds: default_deferred_poll(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Telegram user id of the operator. Messages from this user are
    /// treated as from-me events and pause the affected conversation.
    pub operator_user_id: Option<u64>,
    /// Skip group and supergroup chats entirely.
    #[serde(default = "bool_true")]
    pub skip_groups: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    /// Model used for substantive responses.
    #[serde(default = "default_response_model")]
    pub model: String,
    /// Small/cheap model used for phatic replies and classification.
    #[serde(default = "default_classifier_model")]
    pub classifier_model: String,
}

impl DoppelConfig {
    /// Load config from a TOML file with DOPPEL_* env var overrides.
    ///
    /// Checks the explicit path argument first, then ~/.doppel/doppel.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DoppelConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DOPPEL_").split("__"))
            .extract()
            .map_err(|e| crate::error::DoppelError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn bool_true() -> bool {
    true
}
fn default_rate_threshold() -> u32 {
    10
}
fn default_rate_window() -> u32 {
    60
}
fn default_sleep_start_hour() -> u8 {
    23
}
fn default_sleep_end_hour() -> u8 {
    7
}
fn default_hts_max_delay() -> u64 {
    5_000
}
fn default_auto_reply_text() -> String {
    "Hi! I don't recognize this number yet. I'll get back to you once \
     the owner of this account has approved the conversation."
        .to_string()
}
fn default_deny_cooldown_hours() -> u32 {
    24
}
fn default_history_max() -> u32 {
    100
}
fn default_history_ttl() -> u64 {
    604_800
}
fn default_cache_ttl() -> u64 {
    1_800
}
fn default_max_concurrency() -> u32 {
    64
}
fn default_deferred_poll() -> u64 {
    5
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_response_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_classifier_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_kv_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.doppel/kv.db")
}
fn default_memory_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.doppel/memory.db")
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.doppel/doppel.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = DoppelConfig::default();
        assert_eq!(cfg.rate_limit.threshold, 10);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
        assert!(cfg.rate_limit.auto_pause);
        assert!(cfg.sleep_hours.enabled);
        assert_eq!(cfg.sleep_hours.start_hour, 23);
        assert_eq!(cfg.sleep_hours.end_hour, 7);
        assert_eq!(cfg.hts.max_delay_ms, 5_000);
        assert!(cfg.admission.auto_approve_existing);
        assert!(cfg.admission.auto_reply_unknown);
        assert_eq!(cfg.admission.deny_cooldown_hours, 24);
        assert_eq!(cfg.history.max_messages, 100);
        assert_eq!(cfg.history.ttl_seconds, 604_800);
        assert_eq!(cfg.cache.ttl_seconds, 1_800);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
            [rate_limit]
            threshold = 3
        "#;
        let cfg: DoppelConfig = figment::Figment::new()
            .merge(figment::providers::Toml::string(toml))
            .extract()
            .unwrap();
        assert_eq!(cfg.rate_limit.threshold, 3);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
        assert!(cfg.channels.telegram.is_none());
    }
}
