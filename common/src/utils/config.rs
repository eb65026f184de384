use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::AppError;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Mistral,
    Chocolatine,
}

fn default_llm_provider() -> LlmProviderKind {
    LlmProviderKind::Mistral
}

/// Alpha for hybrid fusion: a fixed weight or query-adaptive selection.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum AlphaSetting {
    Fixed(f32),
    Named(String),
}

impl AlphaSetting {
    /// Resolves to `None` for "auto", otherwise the clamped fixed weight.
    /// Environment sources deliver numbers as strings, so numeric strings
    /// are accepted too.
    pub fn fixed_value(&self) -> Result<Option<f32>, AppError> {
        match self {
            Self::Fixed(value) => Ok(Some(value.clamp(0.0, 1.0))),
            Self::Named(name) if name.eq_ignore_ascii_case("auto") => Ok(None),
            Self::Named(other) => match other.parse::<f32>() {
                Ok(value) => Ok(Some(value.clamp(0.0, 1.0))),
                Err(_) => Err(AppError::Validation(format!(
                    "HYBRID_SEARCH_ALPHA must be a float in [0,1] or \"auto\", got \"{other}\""
                ))),
            },
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub http_port: u16,
    #[serde(default = "default_api_token")]
    pub api_token: String,

    // Embedding service
    pub embedding_service_url: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,

    // Document reader service
    pub document_reader_url: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    // Reranker service
    #[serde(default)]
    pub reranker_enabled: bool,
    #[serde(default)]
    pub reranker_url: Option<String>,
    #[serde(default = "default_reranker_top_k")]
    pub reranker_top_k: usize,
    #[serde(default = "default_reranker_return_k")]
    pub reranker_return_k: usize,
    #[serde(default = "default_reranker_timeout_secs")]
    pub reranker_timeout_secs: u64,

    // Hybrid retrieval
    #[serde(default = "default_true")]
    pub hybrid_search_enabled: bool,
    #[serde(default = "default_alpha")]
    pub hybrid_search_alpha: AlphaSetting,
    #[serde(default)]
    pub use_hierarchical_chunks: bool,
    #[serde(default = "default_true")]
    pub use_adjacent_chunks: bool,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    // LLM provider
    #[serde(default = "default_llm_provider")]
    pub llm_provider: LlmProviderKind,
    pub llm_api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub llm_base_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Quality maintenance
    #[serde(default = "default_confidence_threshold")]
    pub thumbs_down_confidence_threshold: f32,
    #[serde(default = "default_true")]
    pub auto_notifications_enabled: bool,
    #[serde(default = "default_quality_schedule")]
    pub quality_analysis_schedule: String,
    #[serde(default = "default_missing_sources_threshold")]
    pub missing_sources_reingest_threshold: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    // Ingestion worker
    #[serde(default = "default_poll_interval_secs")]
    pub ingestion_poll_interval_secs: u64,
}

impl AppConfig {
    /// Wire label of the configured provider, as persisted on conversations
    /// and messages.
    pub fn llm_provider_label(&self) -> String {
        match self.llm_provider {
            LlmProviderKind::Mistral => "mistral".to_string(),
            LlmProviderKind::Chocolatine => "chocolatine".to_string(),
        }
    }
}

fn default_api_token() -> String {
    String::new()
}

fn default_embedding_dimension() -> usize {
    1024
}

fn default_embedding_batch_size() -> usize {
    32
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_reranker_top_k() -> usize {
    20
}

fn default_reranker_return_k() -> usize {
    5
}

fn default_reranker_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_alpha() -> AlphaSetting {
    AlphaSetting::Named("auto".to_string())
}

fn default_chunk_overlap() -> usize {
    400
}

fn default_llm_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_llm_model() -> String {
    "mistral-small-latest".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_confidence_threshold() -> f32 {
    0.7
}

fn default_quality_schedule() -> String {
    "03:00".to_string()
}

fn default_missing_sources_threshold() -> i64 {
    2
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_poll_interval_secs() -> u64 {
    3
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

/// Parses a "HH:MM" wall-clock schedule into (hour, minute).
pub fn parse_schedule(schedule: &str) -> Result<(u32, u32), AppError> {
    let (hour, minute) = schedule.split_once(':').ok_or_else(|| {
        AppError::Validation(format!(
            "QUALITY_ANALYSIS_SCHEDULE must be HH:MM, got \"{schedule}\""
        ))
    })?;

    let hour: u32 = hour
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid schedule hour in \"{schedule}\"")))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| AppError::Validation(format!("invalid schedule minute in \"{schedule}\"")))?;

    if hour > 23 || minute > 59 {
        return Err(AppError::Validation(format!(
            "schedule \"{schedule}\" is outside the 24h clock"
        )));
    }

    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_setting_fixed() {
        let alpha = AlphaSetting::Fixed(0.3);
        assert_eq!(alpha.fixed_value().unwrap(), Some(0.3));
    }

    #[test]
    fn test_alpha_setting_clamps_out_of_range() {
        let alpha = AlphaSetting::Fixed(1.8);
        assert_eq!(alpha.fixed_value().unwrap(), Some(1.0));
    }

    #[test]
    fn test_alpha_setting_auto() {
        let alpha = AlphaSetting::Named("auto".to_string());
        assert_eq!(alpha.fixed_value().unwrap(), None);

        let alpha = AlphaSetting::Named("AUTO".to_string());
        assert_eq!(alpha.fixed_value().unwrap(), None);
    }

    #[test]
    fn test_alpha_setting_rejects_garbage() {
        let alpha = AlphaSetting::Named("sometimes".to_string());
        assert!(alpha.fixed_value().is_err());
    }

    #[test]
    fn test_parse_schedule() {
        assert_eq!(parse_schedule("03:00").unwrap(), (3, 0));
        assert_eq!(parse_schedule("23:59").unwrap(), (23, 59));
    }

    #[test]
    fn test_parse_schedule_rejects_invalid() {
        assert!(parse_schedule("24:00").is_err());
        assert!(parse_schedule("12:60").is_err());
        assert!(parse_schedule("noon").is_err());
        assert!(parse_schedule("").is_err());
    }
}
