use async_trait::async_trait;
use chat_core::{ChatSession, ConversationId, TenantId};
use chat_error::{ChatError, Result};
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

const SESSION_KEY_PREFIX: &str = "chat_session:";
const MAX_SESSION_TOKEN_LEN: usize = 200;

/// 会话存储
///
/// 管道只会把会话置为失效，从不删除。
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>>;

    async fn save_session(&self, session: &ChatSession) -> Result<()>;

    /// 置为失效，返回会话是否存在
    async fn deactivate_session(&self, session_id: &str) -> Result<bool> {
        match self.get_session(session_id).await? {
            Some(mut session) => {
                if session.is_active {
                    session.is_active = false;
                    self.save_session(&session).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 将所有已过期但仍标记为有效的会话置为失效
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// 基于内存的会话存储
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn save_session(&self, session: &ChatSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut sessions = self.sessions.write().await;
        let mut flipped = 0;
        for session in sessions.values_mut() {
            if session.is_active && session.is_expired_at(now) {
                session.is_active = false;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}

/// Redis 会话存储
pub struct RedisSessionStore {
    redis_client: RedisClient,
}

impl RedisSessionStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let redis_client = RedisClient::open(redis_url).map_err(|e| ChatError::Configuration {
            key: "redis_url".to_string(),
            reason: format!("Failed to connect to Redis: {}", e),
        })?;
        Ok(Self { redis_client })
    }

    async fn connection(&self) -> Result<redis::aio::Connection> {
        self.redis_client
            .get_async_connection()
            .await
            .map_err(|e| ChatError::Network {
                operation: "redis_connection".to_string(),
                message: e.to_string(),
            })
    }

    fn key(session_id: &str) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    #[instrument(skip(self))]
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let mut conn = self.connection().await?;
        let data: Option<String> =
            conn.get(Self::key(session_id))
                .await
                .map_err(|e| ChatError::Network {
                    operation: "redis_get".to_string(),
                    message: e.to_string(),
                })?;

        match data {
            Some(data) => {
                let session: ChatSession =
                    serde_json::from_str(&data).map_err(|e| ChatError::Internal {
                        message: format!("Failed to deserialize session: {}", e),
                        details: None,
                    })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &ChatSession) -> Result<()> {
        let mut conn = self.connection().await?;
        let data = serde_json::to_string(session).map_err(|e| ChatError::Internal {
            message: format!("Failed to serialize session: {}", e),
            details: None,
        })?;

        conn.set::<_, _, ()>(Self::key(&session.id), data)
            .await
            .map_err(|e| ChatError::Network {
                operation: "redis_set".to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", SESSION_KEY_PREFIX);
        let keys: Vec<String> = conn.keys(pattern).await.map_err(|e| ChatError::Network {
            operation: "redis_keys".to_string(),
            message: e.to_string(),
        })?;

        let mut flipped = 0;
        for key in keys {
            if let Ok(data) = conn.get::<_, String>(&key).await {
                if let Ok(mut session) = serde_json::from_str::<ChatSession>(&data) {
                    if session.is_active && session.is_expired_at(now) {
                        session.is_active = false;
                        self.save_session(&session).await?;
                        flipped += 1;
                    }
                }
            }
        }

        Ok(flipped)
    }
}

/// 会话校验
pub struct SessionValidator {
    store: Arc<dyn SessionStore>,
}

impl SessionValidator {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn validate_session(
        &self,
        token: &str,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
    ) -> Result<Option<ChatSession>> {
        self.validate_session_at(token, tenant_id, conversation_id, Utc::now())
            .await
    }

    /// 校验会话令牌属于该租户与会话且未过期
    ///
    /// 过期但仍标记为有效的会话在这里被惰性置为失效。
    pub async fn validate_session_at(
        &self,
        token: &str,
        tenant_id: &TenantId,
        conversation_id: &ConversationId,
        now: DateTime<Utc>,
    ) -> Result<Option<ChatSession>> {
        let token = token.trim();
        if token.is_empty() || token.len() > MAX_SESSION_TOKEN_LEN {
            return Ok(None);
        }

        let session = match self.store.get_session(token).await? {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.tenant_id != tenant_id.as_str() {
            warn!(
                tenant_id = %tenant_id,
                session_tenant = %session.tenant_id,
                "session presented for another tenant"
            );
            return Ok(None);
        }
        if session.conversation_id != conversation_id.as_str() {
            debug!(tenant_id = %tenant_id, "session belongs to another conversation");
            return Ok(None);
        }
        if !session.is_active {
            return Ok(None);
        }
        if session.is_expired_at(now) {
            debug!(tenant_id = %tenant_id, "session expired, marking inactive");
            self.store.deactivate_session(&session.id).await?;
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// 显式关闭会话，仅限会话所属租户
    pub async fn close_session(&self, token: &str, tenant_id: &TenantId) -> Result<bool> {
        match self.store.get_session(token.trim()).await? {
            Some(session) if session.tenant_id == tenant_id.as_str() => {
                self.store.deactivate_session(&session.id).await
            }
            _ => Ok(false),
        }
    }
}
