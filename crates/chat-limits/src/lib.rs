pub mod cache;
pub mod rate_limit;
pub mod store;

pub use cache::{cache_key, normalize_query, CacheConfig, ResponseCache};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitRule, RateLimiter};
pub use store::{Admission, CacheStore, MemoryStore, WindowState, WindowStore};

/// 窗口长度与 TTL 的上限（30 天）
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 3600;

/// 配置中的秒数转为时长，超过上限按上限处理
pub(crate) fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

pub(crate) fn check_duration(key: &str, secs: u64) -> chat_error::Result<()> {
    if secs > MAX_DURATION_SECS {
        return Err(chat_error::ChatError::Configuration {
            key: key.to_string(),
            reason: format!("{} exceeds the {}s limit", secs, MAX_DURATION_SECS),
        });
    }
    Ok(())
}

pub(crate) fn check_probability(key: &str, probability: f64) -> chat_error::Result<()> {
    if !(0.0..=1.0).contains(&probability) {
        return Err(chat_error::ChatError::Configuration {
            key: key.to_string(),
            reason: format!("{} is not a probability", probability),
        });
    }
    Ok(())
}

/// 按概率触发清理
pub(crate) fn should_sweep(probability: f64) -> bool {
    use rand::Rng;
    if probability <= 0.0 {
        return false;
    }
    rand::thread_rng().gen_bool(probability.min(1.0))
}
