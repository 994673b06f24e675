//! 按租户隔离的应答缓存
//!
//! 键由 租户 / 请求分类 / 归一化查询 组成，不同租户的条目互不可见。
//! 只缓存成功的应答，降级文本永远不写入。

use chat_core::{CachedAnswer, OperationClass, TenantId};
use chat_error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::CacheStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub kb_query_ttl_secs: u64,
    pub db_lookup_ttl_secs: u64,
    /// 普通消息默认不缓存
    pub message_ttl_secs: u64,
    pub max_entries: usize,
    pub sweep_probability: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kb_query_ttl_secs: 300,
            db_lookup_ttl_secs: 60,
            message_ttl_secs: 0,
            max_entries: 10_000,
            sweep_probability: 0.01,
        }
    }
}

impl CacheConfig {
    pub fn ttl_secs(&self, class: OperationClass) -> u64 {
        match class {
            OperationClass::Message => self.message_ttl_secs,
            OperationClass::KbQuery => self.kb_query_ttl_secs,
            OperationClass::DbLookup => self.db_lookup_ttl_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for class in OperationClass::ALL {
            let key = format!("cache.{}_ttl_secs", class.as_str());
            crate::check_duration(&key, self.ttl_secs(class))?;
        }
        crate::check_probability("cache.sweep_probability", self.sweep_probability)
    }
}

/// 查询归一化：去首尾空白、转小写、合并连续空白、去掉结尾的 `?!.`
pub fn normalize_query(query: &str) -> String {
    let collapsed = query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '?' | '!' | '.') || c.is_whitespace())
        .to_string()
}

pub fn cache_key(tenant_id: &TenantId, class: OperationClass, query: &str) -> String {
    format!("{}:{}:{}", tenant_id, class.as_str(), normalize_query(query))
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn get(&self, tenant_id: &TenantId, class: OperationClass, query: &str) -> Option<CachedAnswer> {
        self.get_at(tenant_id, class, query, Utc::now())
    }

    pub fn get_at(
        &self,
        tenant_id: &TenantId,
        class: OperationClass,
        query: &str,
        now: DateTime<Utc>,
    ) -> Option<CachedAnswer> {
        let key = cache_key(tenant_id, class, query);
        let hit = self.store.get(&key, now);
        debug!(tenant_id = %tenant_id, op_class = %class, hit = hit.is_some(), "cache lookup");
        hit
    }

    pub fn set(
        &self,
        tenant_id: &TenantId,
        class: OperationClass,
        query: &str,
        value: CachedAnswer,
    ) -> bool {
        self.set_at(tenant_id, class, query, value, Utc::now())
    }

    /// 写入缓存，返回是否实际写入
    ///
    /// TTL 为 0 的分类不缓存。条目数达到上限时先清理过期条目，
    /// 仍然满则放弃写入（覆盖已有键除外）。
    pub fn set_at(
        &self,
        tenant_id: &TenantId,
        class: OperationClass,
        query: &str,
        value: CachedAnswer,
        now: DateTime<Utc>,
    ) -> bool {
        let ttl = self.config.ttl_secs(class);
        if ttl == 0 {
            return false;
        }

        if crate::should_sweep(self.config.sweep_probability) {
            self.sweep_at(now);
        }

        let key = cache_key(tenant_id, class, query);
        if self.config.max_entries > 0
            && self.store.entry_count() >= self.config.max_entries
            && !self.store.contains(&key)
        {
            self.sweep_at(now);
            if self.store.entry_count() >= self.config.max_entries {
                warn!(
                    tenant_id = %tenant_id,
                    max_entries = self.config.max_entries,
                    "response cache full, skipping write"
                );
                return false;
            }
        }

        let expires_at = now + crate::seconds(ttl);
        self.store.set(key, value, expires_at);
        true
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.sweep_entries(now);
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.store.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
