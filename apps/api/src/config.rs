use chat_answer::HttpAnswerConfig;
use chat_core::{ConversationRecord, TenantRecord};
use chat_limits::{CacheConfig, RateLimitConfig};
use chat_pipeline::PipelineConfig;
use serde::Deserialize;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerCfg,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub answer_service: HttpAnswerConfig,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub directory: DirectorySeed,
}

#[derive(Debug, Deserialize)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
}

/// 开发环境的内存目录种子数据
#[derive(Debug, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub tenants: Vec<TenantRecord>,
    #[serde(default)]
    pub conversations: Vec<ConversationRecord>,
}

fn default_sweep_interval() -> u64 {
    60
}

/// 配置路径取 `CHAT_CONFIG`，未设置时使用默认文件
pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let s = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path, e))?;
    let cfg = parse_config(&s)?;
    info!(path = %path, "load_config: {:?}", cfg);
    Ok(cfg)
}

pub fn parse_config(s: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = serde_yaml::from_str(s)?;
    cfg.rate_limits.validate()?;
    cfg.cache.validate()?;
    Ok(cfg)
}
