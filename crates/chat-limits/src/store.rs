//! 限流窗口与缓存条目的存储接口
//!
//! 编排层只依赖这两个 trait。`MemoryStore` 是单进程实现，
//! 多进程部署时换成共享存储实现即可，调用方无需改动。
//! 接口是同步的：实现不得在调用路径上做阻塞 I/O。

use chat_core::CachedAnswer;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted(WindowState),
    Rejected(WindowState),
}

pub trait WindowStore: Send + Sync {
    /// 固定窗口计数：窗口已过期则惰性重置，未达上限时计数加一
    fn try_admit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> Admission;

    /// 删除已过期的窗口，返回删除数量
    fn sweep_windows(&self, now: DateTime<Utc>) -> usize;

    fn window_count(&self) -> usize;
}

pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CachedAnswer>;

    fn set(&self, key: String, value: CachedAnswer, expires_at: DateTime<Utc>);

    fn contains(&self, key: &str) -> bool;

    /// 删除已过期的条目，返回删除数量
    fn sweep_entries(&self, now: DateTime<Utc>) -> usize;

    fn entry_count(&self) -> usize;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedAnswer,
    expires_at: DateTime<Utc>,
}

/// 基于 DashMap 的进程内存储
#[derive(Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowState>,
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for MemoryStore {
    fn try_admit(&self, key: &str, limit: u32, window: Duration, now: DateTime<Utc>) -> Admission {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState {
                count: 0,
                reset_at: now + window,
            });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        if entry.count < limit {
            entry.count += 1;
            Admission::Admitted(*entry)
        } else {
            Admission::Rejected(*entry)
        }
    }

    fn sweep_windows(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, state| now < state.reset_at);
        before.saturating_sub(self.windows.len())
    }

    fn window_count(&self) -> usize {
        self.windows.len()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CachedAnswer> {
        let entry = self.entries.get(key)?;
        if now < entry.expires_at {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    fn set(&self, key: String, value: CachedAnswer, expires_at: DateTime<Utc>) {
        self.entries.insert(key, CacheEntry { value, expires_at });
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn sweep_entries(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.entries.len())
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
