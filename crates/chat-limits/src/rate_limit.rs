use chat_core::{OperationClass, TenantId};
use chat_error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::store::{Admission, WindowStore};

/// 单个请求分类的限流规则，`max_requests = 0` 表示不限流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateLimitRule {
    pub const fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub message: RateLimitRule,
    pub kb_query: RateLimitRule,
    pub db_lookup: RateLimitRule,
    /// 每次检查时顺带清理过期窗口的概率
    pub sweep_probability: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            message: RateLimitRule::per_minute(60),
            kb_query: RateLimitRule::per_minute(20),
            db_lookup: RateLimitRule::per_minute(30),
            sweep_probability: 0.01,
        }
    }
}

impl RateLimitConfig {
    pub fn rule(&self, class: OperationClass) -> RateLimitRule {
        match class {
            OperationClass::Message => self.message,
            OperationClass::KbQuery => self.kb_query,
            OperationClass::DbLookup => self.db_lookup,
        }
    }

    /// 启动时校验，拒绝超出上限的窗口与非法概率
    pub fn validate(&self) -> Result<()> {
        for class in OperationClass::ALL {
            let key = format!("rate_limits.{}.window_secs", class.as_str());
            crate::check_duration(&key, self.rule(class).window_secs)?;
        }
        crate::check_probability("rate_limits.sweep_probability", self.sweep_probability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub retry_after_secs: Option<u64>,
}

/// 按 (租户, 请求分类) 计数的固定窗口限流器
///
/// 固定窗口在边界处允许突发：窗口末尾的 N 个请求加上新窗口开头的 N 个请求，
/// 短时间内最多放行 2N 个。这里接受该行为，只保证"突发有界"，不保证精确的滑动速率。
///
/// 检查是同步的，不排队、不等待，超限立即拒绝。
pub struct RateLimiter {
    store: Arc<dyn WindowStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn WindowStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn check_limit(&self, tenant_id: &TenantId, class: OperationClass) -> RateLimitDecision {
        self.check_limit_at(tenant_id, class, Utc::now())
    }

    pub fn check_limit_at(
        &self,
        tenant_id: &TenantId,
        class: OperationClass,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        if crate::should_sweep(self.config.sweep_probability) {
            self.sweep_at(now);
        }

        let rule = self.config.rule(class);
        let window = crate::seconds(rule.window_secs.max(1));
        if rule.max_requests == 0 {
            return RateLimitDecision {
                allowed: true,
                remaining: u32::MAX,
                reset_at: now + window,
                retry_after_secs: None,
            };
        }

        let key = window_key(tenant_id, class);
        match self.store.try_admit(&key, rule.max_requests, window, now) {
            Admission::Admitted(state) => RateLimitDecision {
                allowed: true,
                remaining: rule.max_requests.saturating_sub(state.count),
                reset_at: state.reset_at,
                retry_after_secs: None,
            },
            Admission::Rejected(state) => {
                let retry_after_secs = retry_after_secs(state.reset_at, now);
                debug!(
                    tenant_id = %tenant_id,
                    op_class = %class,
                    count = state.count,
                    retry_after_secs,
                    "rate limit exceeded"
                );
                RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: state.reset_at,
                    retry_after_secs: Some(retry_after_secs),
                }
            }
        }
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.sweep_windows(now);
        if removed > 0 {
            debug!(removed, "swept expired rate limit windows");
        }
        removed
    }

    pub fn window_count(&self) -> usize {
        self.store.window_count()
    }
}

fn window_key(tenant_id: &TenantId, class: OperationClass) -> String {
    format!("{}:{}", tenant_id, class.as_str())
}

/// 向上取整到秒，至少 1 秒
fn retry_after_secs(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (reset_at - now).num_milliseconds().max(0) as u64;
    ((millis + 999) / 1000).max(1)
}
